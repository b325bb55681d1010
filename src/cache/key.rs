//! Cache key: a normalized `(fqdn, qtype, qclass)` triple with a
//! precomputed hash, paying for case-folding and hashing once at
//! construction rather than on every lookup.

use crate::dns::{DnsResourceClass, DnsResourceType};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    pub fqdn: String,
    pub qtype: DnsResourceType,
    pub qclass: DnsResourceClass,
    hash: u64,
}

impl CacheKey {
    pub fn new(fqdn: &str, qtype: DnsResourceType, qclass: DnsResourceClass) -> Self {
        let normalized = crate::dns::normalize_fqdn(fqdn);
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        normalized.hash(&mut hasher);
        qtype.hash(&mut hasher);
        qclass.hash(&mut hasher);
        Self {
            fqdn: normalized,
            qtype,
            qclass,
            hash: hasher.finish(),
        }
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.fqdn == other.fqdn && self.qtype == other.qtype && self.qclass == other.qclass
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:?}/{:?}", self.fqdn, self.qtype, self.qclass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_normalize_case_and_trailing_dot() {
        let a = CacheKey::new("Example.COM", DnsResourceType::A, DnsResourceClass::IN);
        let b = CacheKey::new("example.com.", DnsResourceType::A, DnsResourceClass::IN);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_qtype_distinct_key() {
        let a = CacheKey::new("example.com.", DnsResourceType::A, DnsResourceClass::IN);
        let b = CacheKey::new("example.com.", DnsResourceType::AAAA, DnsResourceClass::IN);
        assert_ne!(a, b);
    }
}
