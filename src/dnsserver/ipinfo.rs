//! Tracks which domains resolved to which IP for a given profile scope,
//! so later traffic seen for that IP can be attributed back to the
//! domain(s) that produced it. Keyed by `(profile_scope, ip)`.

use std::net::IpAddr;
use std::time::{Duration, SystemTime};

const DEFAULT_FLOOR: Duration = Duration::from_secs(24 * 3600);
const RECORD_MARGIN: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedDomain {
    pub fqdn: String,
    pub expires: SystemTime,
    pub cname_chain: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct IpInfo {
    pub profile_scope: String,
    pub ip: IpAddr,
    pub resolved_domains: Vec<ResolvedDomain>,
}

impl IpInfo {
    pub fn new(profile_scope: impl Into<String>, ip: IpAddr) -> Self {
        Self { profile_scope: profile_scope.into(), ip, resolved_domains: Vec::new() }
    }

    pub fn storage_key(&self) -> String {
        format!("cache:intel/ipInfo/{}/{}", self.profile_scope, self.ip)
    }

    /// Records that `fqdn` resolved to this IP, replacing any earlier
    /// entry for the same domain in place so insertion order for distinct
    /// domains is preserved.
    pub fn record(&mut self, fqdn: String, expires: SystemTime, cname_chain: Vec<String>) {
        if let Some(existing) = self.resolved_domains.iter_mut().find(|d| d.fqdn == fqdn) {
            existing.expires = expires;
            existing.cname_chain = cname_chain;
        } else {
            self.resolved_domains.push(ResolvedDomain { fqdn, expires, cname_chain });
        }
    }

    /// Absolute expiry for the whole entry: the latest of its domains'
    /// expiries plus a one-hour margin, floored at 24h from now so a
    /// short-TTL record doesn't cause premature eviction of the
    /// attribution history.
    pub fn expires_at(&self, now: SystemTime) -> SystemTime {
        let floor = now + DEFAULT_FLOOR;
        let latest = self
            .resolved_domains
            .iter()
            .map(|d| d.expires + RECORD_MARGIN)
            .max()
            .unwrap_or(floor);
        latest.max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_matches_layout() {
        let info = IpInfo::new("default", "1.2.3.4".parse().unwrap());
        assert_eq!(info.storage_key(), "cache:intel/ipInfo/default/1.2.3.4");
    }

    #[test]
    fn recording_same_domain_replaces_in_place() {
        let now = SystemTime::now();
        let mut info = IpInfo::new("default", "1.2.3.4".parse().unwrap());
        info.record("a.com.".into(), now, vec![]);
        info.record("b.com.".into(), now, vec![]);
        info.record("a.com.".into(), now + Duration::from_secs(60), vec![]);
        assert_eq!(info.resolved_domains.len(), 2);
        assert_eq!(info.resolved_domains[0].fqdn, "a.com.");
    }

    #[test]
    fn expiry_is_floored_at_24h() {
        let now = SystemTime::now();
        let mut info = IpInfo::new("default", "1.2.3.4".parse().unwrap());
        info.record("a.com.".into(), now + Duration::from_secs(10), vec![]);
        assert_eq!(info.expires_at(now), now + DEFAULT_FLOOR);
    }

    #[test]
    fn expiry_tracks_longest_lived_domain_past_the_floor() {
        let now = SystemTime::now();
        let mut info = IpInfo::new("default", "1.2.3.4".parse().unwrap());
        info.record("a.com.".into(), now + Duration::from_secs(30 * 3600), vec![]);
        assert_eq!(info.expires_at(now), now + Duration::from_secs(30 * 3600) + RECORD_MARGIN);
    }
}
