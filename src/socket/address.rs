//! `Address` and its reachability `AddressScope`: small, `Copy`,
//! serde-friendly value types (in the style of `dns::enums`) rather than
//! newtype wrappers around `std::net` types, with scope derived straight
//! from the address's bit pattern.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressScope {
    HostLocal,
    LinkLocal,
    SiteLocal,
    Global,
    LocalMulticast,
    GlobalMulticast,
    Invalid,
}

impl AddressScope {
    pub fn is_multicast(self) -> bool {
        matches!(self, AddressScope::LocalMulticast | AddressScope::GlobalMulticast)
    }
}

/// Classify an IP's reachability scope from its bit pattern, using the
/// standard private/loopback/multicast allocations.
pub fn classify_scope(ip: IpAddr) -> AddressScope {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => classify_v6(v6),
    }
}

fn classify_v4(ip: Ipv4Addr) -> AddressScope {
    if ip.is_unspecified() {
        return AddressScope::Invalid;
    }
    if ip.is_loopback() {
        return AddressScope::HostLocal;
    }
    if ip.is_link_local() {
        return AddressScope::LinkLocal;
    }
    if ip.is_private() {
        return AddressScope::SiteLocal;
    }
    if ip.is_multicast() {
        // 224.0.0.0/24 is link-local scope multicast ("all hosts" etc.);
        // everything else multicast is treated as globally routed.
        return if ip.octets()[0..3] == [224, 0, 0] {
            AddressScope::LocalMulticast
        } else {
            AddressScope::GlobalMulticast
        };
    }
    if ip.is_broadcast() {
        return AddressScope::LocalMulticast;
    }
    AddressScope::Global
}

fn classify_v6(ip: Ipv6Addr) -> AddressScope {
    if ip.is_unspecified() {
        return AddressScope::Invalid;
    }
    if ip.is_loopback() {
        return AddressScope::HostLocal;
    }
    let seg0 = ip.segments()[0];
    if seg0 & 0xffc0 == 0xfe80 {
        return AddressScope::LinkLocal;
    }
    if seg0 & 0xfe00 == 0xfc00 {
        // RFC 4193 unique local addresses
        return AddressScope::SiteLocal;
    }
    if ip.is_multicast() {
        // ff0x::/16, where x is the scope nibble: 1/2 = local, else global.
        let scope_nibble = seg0 & 0x000f;
        return if scope_nibble <= 2 {
            AddressScope::LocalMulticast
        } else {
            AddressScope::GlobalMulticast
        };
    }
    AddressScope::Global
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub ip: IpAddr,
    pub port: u16,
}

impl Address {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn scope(&self) -> AddressScope {
        classify_scope(self.ip)
    }

    pub fn listens_any(&self) -> bool {
        self.ip.is_unspecified()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip {
            IpAddr::V4(v4) => write!(f, "{}:{}", v4, self.port),
            IpAddr::V6(v6) => write!(f, "[{}]:{}", v6, self.port),
        }
    }
}

impl From<std::net::SocketAddr> for Address {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_loopback_as_host_local() {
        assert_eq!(
            classify_scope("127.0.0.1".parse().unwrap()),
            AddressScope::HostLocal
        );
        assert_eq!(classify_scope("::1".parse().unwrap()), AddressScope::HostLocal);
    }

    #[test]
    fn classifies_private_ranges_as_site_local() {
        assert_eq!(
            classify_scope("10.0.0.5".parse().unwrap()),
            AddressScope::SiteLocal
        );
        assert_eq!(
            classify_scope("192.168.1.10".parse().unwrap()),
            AddressScope::SiteLocal
        );
    }

    #[test]
    fn classifies_unique_local_v6_as_site_local() {
        assert_eq!(
            classify_scope("fd00::1".parse().unwrap()),
            AddressScope::SiteLocal
        );
    }

    #[test]
    fn classifies_public_as_global() {
        assert_eq!(
            classify_scope("93.184.216.34".parse().unwrap()),
            AddressScope::Global
        );
    }

    #[test]
    fn classifies_multicast() {
        assert_eq!(
            classify_scope("224.0.0.251".parse().unwrap()),
            AddressScope::LocalMulticast
        );
        assert_eq!(
            classify_scope("ff02::fb".parse().unwrap()),
            AddressScope::LocalMulticast
        );
    }

    #[test]
    fn unspecified_is_invalid_but_listens_any() {
        let addr = Address::new("0.0.0.0".parse().unwrap(), 8080);
        assert_eq!(addr.scope(), AddressScope::Invalid);
        assert!(addr.listens_any());
    }
}
