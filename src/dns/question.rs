use super::enums::{DnsResourceClass, DnsResourceType};
use super::name::{decode_name, encode_name};
use super::packet::ParseError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: DnsResourceType,
    pub qclass: DnsResourceClass,
}

impl DnsQuestion {
    pub fn write(&self, out: &mut Vec<u8>) {
        encode_name(&self.name, out);
        out.extend_from_slice(&u16::from(self.qtype).to_be_bytes());
        out.extend_from_slice(&u16::from(self.qclass).to_be_bytes());
    }

    pub fn parse(buf: &[u8], offset: usize) -> Result<(Self, usize), ParseError> {
        let (name, mut cursor) = decode_name(buf, offset)?;
        let qtype = u16::from_be_bytes(
            buf.get(cursor..cursor + 2)
                .ok_or(ParseError::Truncated)?
                .try_into()
                .unwrap(),
        );
        cursor += 2;
        let qclass = u16::from_be_bytes(
            buf.get(cursor..cursor + 2)
                .ok_or(ParseError::Truncated)?
                .try_into()
                .unwrap(),
        );
        cursor += 2;
        Ok((
            Self {
                name,
                qtype: qtype.into(),
                qclass: qclass.into(),
            },
            cursor,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_round_trips() {
        let q = DnsQuestion {
            name: "example.com.".to_string(),
            qtype: DnsResourceType::A,
            qclass: DnsResourceClass::IN,
        };
        let mut buf = Vec::new();
        q.write(&mut buf);
        let (parsed, next) = DnsQuestion::parse(&buf, 0).unwrap();
        assert_eq!(parsed, q);
        assert_eq!(next, buf.len());
    }
}
