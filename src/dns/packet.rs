use super::enums::{DnsOpcode, DnsResourceClass, DnsResourceType, ResponseCode};
use super::header::DnsHeader;
use super::question::DnsQuestion;
use super::resource::DnsRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("packet truncated")]
    Truncated,
    #[error("dns label exceeds 63 bytes")]
    LabelTooLong,
    #[error("dns label is not valid utf-8")]
    InvalidLabel,
    #[error("compression pointer does not point backwards")]
    CompressionLoop,
    #[error("rdata did not match its declared record type")]
    InvalidRdata,
}

impl From<std::io::Error> for ParseError {
    fn from(_: std::io::Error) -> Self {
        ParseError::Truncated
    }
}

/// In-memory representation of a DNS message, covering exactly the header
/// fields and sections the core needs: no EDNS OPT synthesis beyond a bare
/// UDP payload-size default, no DNSSEC RRSIG/NSEC handling.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authority: Vec<DnsRecord>,
    pub additional: Vec<DnsRecord>,
}

impl DnsPacket {
    pub fn new_query(id: u16, name: &str, qtype: DnsResourceType) -> Self {
        Self {
            header: DnsHeader {
                id,
                rd: true,
                qdcount: 1,
                ..Default::default()
            },
            questions: vec![DnsQuestion {
                name: super::name::normalize_fqdn(name),
                qtype,
                qclass: DnsResourceClass::IN,
            }],
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    pub fn rcode(&self) -> ResponseCode {
        self.header.rcode.into()
    }

    pub fn opcode(&self) -> DnsOpcode {
        self.header.opcode.into()
    }

    pub fn set_rcode(&mut self, rcode: ResponseCode) {
        self.header.rcode = rcode.into();
    }

    /// Build a response header/shell with QR=1, matching the query's id,
    /// opcode and RD flag, ready for the caller to attach records to.
    pub fn response_shell(query: &DnsPacket) -> Self {
        Self {
            header: DnsHeader {
                id: query.header.id,
                qr: true,
                opcode: query.header.opcode,
                aa: false,
                tc: false,
                rd: query.header.rd,
                ra: true,
                z: 0,
                rcode: ResponseCode::NoError.into(),
                qdcount: query.header.qdcount,
                ancount: 0,
                nscount: 0,
                arcount: 0,
            },
            questions: query.questions.clone(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut out = Vec::with_capacity(512);
        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authority.len() as u16;
        header.arcount = self.additional.len() as u16;
        header.write(&mut out)?;

        for q in &self.questions {
            q.write(&mut out);
        }
        for r in &self.answers {
            r.write(&mut out);
        }
        for r in &self.authority {
            r.write(&mut out);
        }
        for r in &self.additional {
            r.write(&mut out);
        }
        Ok(out)
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let header = DnsHeader::parse(buf)?;
        let mut cursor = DnsHeader::WIRE_LEN;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            let (q, next) = DnsQuestion::parse(buf, cursor)?;
            questions.push(q);
            cursor = next;
        }

        let mut answers = Vec::with_capacity(header.ancount as usize);
        for _ in 0..header.ancount {
            let (r, next) = DnsRecord::parse(buf, cursor)?;
            answers.push(r);
            cursor = next;
        }

        let mut authority = Vec::with_capacity(header.nscount as usize);
        for _ in 0..header.nscount {
            let (r, next) = DnsRecord::parse(buf, cursor)?;
            authority.push(r);
            cursor = next;
        }

        let mut additional = Vec::with_capacity(header.arcount as usize);
        for _ in 0..header.arcount {
            let (r, next) = DnsRecord::parse(buf, cursor)?;
            additional.push(r);
            cursor = next;
        }

        Ok(Self {
            header,
            questions,
            answers,
            authority,
            additional,
        })
    }

    /// Maximum UDP payload size this query advertised via EDNS, or the
    /// legacy 512-byte default.
    pub fn max_udp_payload_size(&self) -> u16 {
        self.additional
            .iter()
            .find(|r| r.rtype == DnsResourceType::OPT)
            .map(|r| u16::from(r.rclass))
            .filter(|&size| size >= 512)
            .unwrap_or(512)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::resource::RecordData;
    use std::net::Ipv4Addr;

    #[test]
    fn query_round_trips() {
        let q = DnsPacket::new_query(42, "Example.COM", DnsResourceType::A);
        let bytes = q.serialize().unwrap();
        let parsed = DnsPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.header.id, 42);
        assert_eq!(parsed.questions[0].name, "example.com.");
        assert_eq!(parsed.questions[0].qtype, DnsResourceType::A);
    }

    #[test]
    fn response_with_answer_round_trips() {
        let query = DnsPacket::new_query(7, "example.com.", DnsResourceType::A);
        let mut resp = DnsPacket::response_shell(&query);
        resp.answers.push(DnsRecord::a(
            "example.com.",
            300,
            Ipv4Addr::new(93, 184, 216, 34),
        ));
        let bytes = resp.serialize().unwrap();
        let parsed = DnsPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.answers.len(), 1);
        assert!(matches!(parsed.answers[0].data, RecordData::A(_)));
        assert!(parsed.header.qr);
    }

    #[test]
    fn truncated_packet_errors() {
        assert!(matches!(DnsPacket::parse(&[0u8; 2]), Err(ParseError::Truncated)));
    }
}
