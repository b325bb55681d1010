//! The 12-byte DNS header is bit-packed (the flag byte mixes 1-, 3- and
//! 4-bit fields), so it is the one place in the wire codec where
//! `bitstream-io`'s bit-level reader/writer earns its keep; everything
//! after the header is byte-aligned and is parsed with a plain cursor
//! instead (see `packet.rs`).

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};

use super::packet::ParseError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl DnsHeader {
    pub const WIRE_LEN: usize = 12;

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), ParseError> {
        let mut writer = BitWriter::endian(out, BigEndian);
        writer.write_var::<u16>(16, self.id)?;
        writer.write_var::<u8>(1, self.qr as u8)?;
        writer.write_var::<u8>(4, self.opcode)?;
        writer.write_var::<u8>(1, self.aa as u8)?;
        writer.write_var::<u8>(1, self.tc as u8)?;
        writer.write_var::<u8>(1, self.rd as u8)?;
        writer.write_var::<u8>(1, self.ra as u8)?;
        writer.write_var::<u8>(3, self.z)?;
        writer.write_var::<u8>(4, self.rcode)?;
        writer.write_var::<u16>(16, self.qdcount)?;
        writer.write_var::<u16>(16, self.ancount)?;
        writer.write_var::<u16>(16, self.nscount)?;
        writer.write_var::<u16>(16, self.arcount)?;
        Ok(())
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(ParseError::Truncated);
        }
        let mut reader = BitReader::endian(buf, BigEndian);
        Ok(Self {
            id: reader.read_var::<u16>(16)?,
            qr: reader.read_var::<u8>(1)? == 1,
            opcode: reader.read_var::<u8>(4)?,
            aa: reader.read_var::<u8>(1)? == 1,
            tc: reader.read_var::<u8>(1)? == 1,
            rd: reader.read_var::<u8>(1)? == 1,
            ra: reader.read_var::<u8>(1)? == 1,
            z: reader.read_var::<u8>(3)?,
            rcode: reader.read_var::<u8>(4)?,
            qdcount: reader.read_var::<u16>(16)?,
            ancount: reader.read_var::<u16>(16)?,
            nscount: reader.read_var::<u16>(16)?,
            arcount: reader.read_var::<u16>(16)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = DnsHeader {
            id: 0xbeef,
            qr: true,
            opcode: 0,
            aa: false,
            tc: false,
            rd: true,
            ra: true,
            z: 0,
            rcode: 0,
            qdcount: 1,
            ancount: 2,
            nscount: 0,
            arcount: 1,
        };
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert_eq!(buf.len(), DnsHeader::WIRE_LEN);
        let parsed = DnsHeader::parse(&buf).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn truncated_header_errors() {
        assert!(matches!(
            DnsHeader::parse(&[0u8; 4]),
            Err(ParseError::Truncated)
        ));
    }
}
