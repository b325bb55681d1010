//! DNS header/record enumerations: plain enum types with explicit
//! `From<u16>`/`Into<u16>` conversions, trimmed to the record types the
//! core actually caches or synthesizes. DNSSEC, zone-transfer, and most
//! "modern web" record types are out of scope: DNSSEC validation isn't
//! performed, and authoritative zone transfer isn't part of the core at
//! all.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnsResourceType {
    Unknown(u16),
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    OPT,
    HTTPS,
    CAA,
    NAPTR,
    ANY,
}

impl Default for DnsResourceType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl From<u16> for DnsResourceType {
    fn from(value: u16) -> Self {
        match value {
            1 => Self::A,
            2 => Self::NS,
            5 => Self::CNAME,
            6 => Self::SOA,
            12 => Self::PTR,
            15 => Self::MX,
            16 => Self::TXT,
            28 => Self::AAAA,
            33 => Self::SRV,
            41 => Self::OPT,
            65 => Self::HTTPS,
            257 => Self::CAA,
            35 => Self::NAPTR,
            255 => Self::ANY,
            other => Self::Unknown(other),
        }
    }
}

impl From<DnsResourceType> for u16 {
    fn from(value: DnsResourceType) -> Self {
        match value {
            DnsResourceType::A => 1,
            DnsResourceType::NS => 2,
            DnsResourceType::CNAME => 5,
            DnsResourceType::SOA => 6,
            DnsResourceType::PTR => 12,
            DnsResourceType::MX => 15,
            DnsResourceType::TXT => 16,
            DnsResourceType::AAAA => 28,
            DnsResourceType::SRV => 33,
            DnsResourceType::OPT => 41,
            DnsResourceType::NAPTR => 35,
            DnsResourceType::HTTPS => 65,
            DnsResourceType::CAA => 257,
            DnsResourceType::ANY => 255,
            DnsResourceType::Unknown(other) => other,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnsResourceClass {
    Unknown(u16),
    IN,
    ANY,
}

impl Default for DnsResourceClass {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl From<u16> for DnsResourceClass {
    fn from(value: u16) -> Self {
        match value {
            1 => Self::IN,
            255 => Self::ANY,
            other => Self::Unknown(other),
        }
    }
}

impl From<DnsResourceClass> for u16 {
    fn from(value: DnsResourceClass) -> Self {
        match value {
            DnsResourceClass::IN => 1,
            DnsResourceClass::ANY => 255,
            DnsResourceClass::Unknown(other) => other,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnsOpcode {
    #[default]
    Query,
    IQuery,
    Status,
    Notify,
    Update,
    Other(u8),
}

impl From<u8> for DnsOpcode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Query,
            1 => Self::IQuery,
            2 => Self::Status,
            4 => Self::Notify,
            5 => Self::Update,
            other => Self::Other(other),
        }
    }
}

impl From<DnsOpcode> for u8 {
    fn from(value: DnsOpcode) -> Self {
        match value {
            DnsOpcode::Query => 0,
            DnsOpcode::IQuery => 1,
            DnsOpcode::Status => 2,
            DnsOpcode::Notify => 4,
            DnsOpcode::Update => 5,
            DnsOpcode::Other(other) => other,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseCode {
    #[default]
    NoError,
    FormatError,
    ServerFailure,
    NxDomain,
    NotImplemented,
    Refused,
    Other(u8),
}

impl ResponseCode {
    /// Answers with this rcode are cacheable; all
    /// others must never be written to the record store.
    pub fn is_cacheable(self) -> bool {
        matches!(
            self,
            ResponseCode::NoError | ResponseCode::NxDomain | ResponseCode::Refused
        )
    }
}

impl From<u8> for ResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::NoError,
            1 => Self::FormatError,
            2 => Self::ServerFailure,
            3 => Self::NxDomain,
            4 => Self::NotImplemented,
            5 => Self::Refused,
            other => Self::Other(other),
        }
    }
}

impl From<ResponseCode> for u8 {
    fn from(value: ResponseCode) -> Self {
        match value {
            ResponseCode::NoError => 0,
            ResponseCode::FormatError => 1,
            ResponseCode::ServerFailure => 2,
            ResponseCode::NxDomain => 3,
            ResponseCode::NotImplemented => 4,
            ResponseCode::Refused => 5,
            ResponseCode::Other(other) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_types() {
        for (raw, ty) in [
            (1u16, DnsResourceType::A),
            (28, DnsResourceType::AAAA),
            (5, DnsResourceType::CNAME),
            (16, DnsResourceType::TXT),
        ] {
            assert_eq!(DnsResourceType::from(raw), ty);
            assert_eq!(u16::from(ty), raw);
        }
    }

    #[test]
    fn unknown_type_round_trips() {
        let ty = DnsResourceType::from(1234);
        assert_eq!(ty, DnsResourceType::Unknown(1234));
        assert_eq!(u16::from(ty), 1234);
    }

    #[test]
    fn cacheable_rcodes() {
        assert!(ResponseCode::NoError.is_cacheable());
        assert!(ResponseCode::NxDomain.is_cacheable());
        assert!(ResponseCode::Refused.is_cacheable());
        assert!(!ResponseCode::ServerFailure.is_cacheable());
        assert!(!ResponseCode::FormatError.is_cacheable());
    }
}
