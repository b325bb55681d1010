use super::enums::{DnsResourceClass, DnsResourceType};
use super::name::{decode_name, encode_name};
use super::packet::ParseError;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Parsed RDATA for the record types the core cares about. Anything else
/// round-trips as opaque bytes via `RecordData::Other`, which is enough for
/// the cache: it only needs to store and replay wire records in their
/// wire/text form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Ns(String),
    Ptr(String),
    Mx { preference: u16, exchange: String },
    Txt(Vec<Vec<u8>>),
    Soa {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Other(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: DnsResourceType,
    pub rclass: DnsResourceClass,
    pub ttl: u32,
    pub data: RecordData,
}

impl DnsRecord {
    pub fn a(name: &str, ttl: u32, addr: Ipv4Addr) -> Self {
        Self {
            name: name.to_string(),
            rtype: DnsResourceType::A,
            rclass: DnsResourceClass::IN,
            ttl,
            data: RecordData::A(addr),
        }
    }

    pub fn aaaa(name: &str, ttl: u32, addr: Ipv6Addr) -> Self {
        Self {
            name: name.to_string(),
            rtype: DnsResourceType::AAAA,
            rclass: DnsResourceClass::IN,
            ttl,
            data: RecordData::Aaaa(addr),
        }
    }

    /// Returns the A/AAAA address carried by this record, if any.
    pub fn ip_addr(&self) -> Option<std::net::IpAddr> {
        match &self.data {
            RecordData::A(addr) => Some((*addr).into()),
            RecordData::Aaaa(addr) => Some((*addr).into()),
            _ => None,
        }
    }

    /// Returns the CNAME target, if this is a CNAME record.
    pub fn cname_target(&self) -> Option<&str> {
        match &self.data {
            RecordData::Cname(target) => Some(target),
            _ => None,
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        encode_name(&self.name, out);
        out.extend_from_slice(&u16::from(self.rtype).to_be_bytes());
        out.extend_from_slice(&u16::from(self.rclass).to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());

        let mut rdata = Vec::new();
        match &self.data {
            RecordData::A(addr) => rdata.extend_from_slice(&addr.octets()),
            RecordData::Aaaa(addr) => rdata.extend_from_slice(&addr.octets()),
            RecordData::Cname(target) | RecordData::Ns(target) | RecordData::Ptr(target) => {
                encode_name(target, &mut rdata)
            }
            RecordData::Mx { preference, exchange } => {
                rdata.extend_from_slice(&preference.to_be_bytes());
                encode_name(exchange, &mut rdata);
            }
            RecordData::Txt(chunks) => {
                for chunk in chunks {
                    rdata.push(chunk.len() as u8);
                    rdata.extend_from_slice(chunk);
                }
            }
            RecordData::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                encode_name(mname, &mut rdata);
                encode_name(rname, &mut rdata);
                rdata.extend_from_slice(&serial.to_be_bytes());
                rdata.extend_from_slice(&refresh.to_be_bytes());
                rdata.extend_from_slice(&retry.to_be_bytes());
                rdata.extend_from_slice(&expire.to_be_bytes());
                rdata.extend_from_slice(&minimum.to_be_bytes());
            }
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                rdata.extend_from_slice(&priority.to_be_bytes());
                rdata.extend_from_slice(&weight.to_be_bytes());
                rdata.extend_from_slice(&port.to_be_bytes());
                encode_name(target, &mut rdata);
            }
            RecordData::Other(bytes) => rdata.extend_from_slice(bytes),
        }

        out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(&rdata);
    }

    pub fn parse(buf: &[u8], offset: usize) -> Result<(Self, usize), ParseError> {
        let (name, mut cursor) = decode_name(buf, offset)?;
        let rtype: DnsResourceType = read_u16(buf, &mut cursor)?.into();
        let rclass: DnsResourceClass = read_u16(buf, &mut cursor)?.into();
        let ttl = read_u32(buf, &mut cursor)?;
        let rdlength = read_u16(buf, &mut cursor)? as usize;
        let rdata_start = cursor;
        let rdata_end = rdata_start
            .checked_add(rdlength)
            .filter(|end| *end <= buf.len())
            .ok_or(ParseError::Truncated)?;
        let rdata = &buf[rdata_start..rdata_end];

        let data = match rtype {
            DnsResourceType::A => {
                if rdata.len() != 4 {
                    return Err(ParseError::InvalidRdata);
                }
                RecordData::A(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]))
            }
            DnsResourceType::AAAA => {
                if rdata.len() != 16 {
                    return Err(ParseError::InvalidRdata);
                }
                let octets: [u8; 16] = rdata.try_into().unwrap();
                RecordData::Aaaa(Ipv6Addr::from(octets))
            }
            DnsResourceType::CNAME => RecordData::Cname(decode_name(buf, rdata_start)?.0),
            DnsResourceType::NS => RecordData::Ns(decode_name(buf, rdata_start)?.0),
            DnsResourceType::PTR => RecordData::Ptr(decode_name(buf, rdata_start)?.0),
            DnsResourceType::MX => {
                if rdata.len() < 2 {
                    return Err(ParseError::InvalidRdata);
                }
                let preference = u16::from_be_bytes([rdata[0], rdata[1]]);
                let (exchange, _) = decode_name(buf, rdata_start + 2)?;
                RecordData::Mx { preference, exchange }
            }
            DnsResourceType::TXT => {
                let mut chunks = Vec::new();
                let mut i = 0;
                while i < rdata.len() {
                    let len = rdata[i] as usize;
                    i += 1;
                    let end = i.checked_add(len).filter(|e| *e <= rdata.len()).ok_or(ParseError::InvalidRdata)?;
                    chunks.push(rdata[i..end].to_vec());
                    i = end;
                }
                RecordData::Txt(chunks)
            }
            DnsResourceType::SOA => {
                let (mname, next) = decode_name(buf, rdata_start)?;
                let (rname, next) = decode_name(buf, next)?;
                let mut n = next;
                let serial = read_u32(buf, &mut n)?;
                let refresh = read_u32(buf, &mut n)?;
                let retry = read_u32(buf, &mut n)?;
                let expire = read_u32(buf, &mut n)?;
                let minimum = read_u32(buf, &mut n)?;
                RecordData::Soa {
                    mname,
                    rname,
                    serial,
                    refresh,
                    retry,
                    expire,
                    minimum,
                }
            }
            DnsResourceType::SRV => {
                if rdata.len() < 6 {
                    return Err(ParseError::InvalidRdata);
                }
                let priority = u16::from_be_bytes([rdata[0], rdata[1]]);
                let weight = u16::from_be_bytes([rdata[2], rdata[3]]);
                let port = u16::from_be_bytes([rdata[4], rdata[5]]);
                let (target, _) = decode_name(buf, rdata_start + 6)?;
                RecordData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                }
            }
            _ => RecordData::Other(rdata.to_vec()),
        };

        Ok((
            Self {
                name,
                rtype,
                rclass,
                ttl,
                data,
            },
            rdata_end,
        ))
    }
}

fn read_u16(buf: &[u8], cursor: &mut usize) -> Result<u16, ParseError> {
    let bytes = buf.get(*cursor..*cursor + 2).ok_or(ParseError::Truncated)?;
    *cursor += 2;
    Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
}

fn read_u32(buf: &[u8], cursor: &mut usize) -> Result<u32, ParseError> {
    let bytes = buf.get(*cursor..*cursor + 4).ok_or(ParseError::Truncated)?;
    *cursor += 4;
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_record_round_trips() {
        let rec = DnsRecord::a("example.com.", 300, Ipv4Addr::new(93, 184, 216, 34));
        let mut buf = Vec::new();
        rec.write(&mut buf);
        let (parsed, next) = DnsRecord::parse(&buf, 0).unwrap();
        assert_eq!(parsed, rec);
        assert_eq!(next, buf.len());
    }

    #[test]
    fn cname_record_round_trips() {
        let rec = DnsRecord {
            name: "www.example.com.".to_string(),
            rtype: DnsResourceType::CNAME,
            rclass: DnsResourceClass::IN,
            ttl: 60,
            data: RecordData::Cname("example.com.".to_string()),
        };
        let mut buf = Vec::new();
        rec.write(&mut buf);
        let (parsed, _) = DnsRecord::parse(&buf, 0).unwrap();
        assert_eq!(parsed, rec);
    }

    #[test]
    fn rejects_mismatched_a_rdata_length() {
        // handcraft a record with rtype=A but 16-byte rdata
        let mut buf = Vec::new();
        encode_name("x.", &mut buf);
        buf.extend_from_slice(&1u16.to_be_bytes()); // A
        buf.extend_from_slice(&1u16.to_be_bytes()); // IN
        buf.extend_from_slice(&60u32.to_be_bytes());
        buf.extend_from_slice(&16u16.to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            DnsRecord::parse(&buf, 0),
            Err(ParseError::InvalidRdata)
        ));
    }
}
