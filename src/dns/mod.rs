//! DNS wire-format message model: parsing, serialization, and the record
//! types the rest of the core needs to reason about (cache keys, answer
//! bodies, block-detection heuristics). Deliberately narrow: this is not a
//! general-purpose DNS library. DNSSEC and zone transfer are out of scope,
//! so only the record types and header fields the core actually touches
//! are modeled.

pub mod enums;
pub mod header;
pub mod name;
pub mod packet;
pub mod question;
pub mod resource;

pub use enums::{DnsOpcode, DnsResourceClass, DnsResourceType, ResponseCode};
pub use header::DnsHeader;
pub use name::{normalize_fqdn, public_suffix_root};
pub use packet::{DnsPacket, ParseError};
pub use question::DnsQuestion;
pub use resource::{DnsRecord, RecordData};
