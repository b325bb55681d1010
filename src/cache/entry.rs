//! A single cached answer plus the freshness bookkeeping the cache needs
//! around it: expiry, soft-expiry window, and the in-flight flag that
//! keeps a background refresh from being kicked off twice for the same
//! key.

use crate::dns::{DnsPacket, ResponseCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const REFRESH_WINDOW: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct CacheEntry {
    pub answer: DnsPacket,
    pub expires: Instant,
    async_refresh_in_flight: Arc<AtomicBool>,
}

impl CacheEntry {
    pub fn new(answer: DnsPacket, expires: Instant) -> Self {
        Self {
            answer,
            expires,
            async_refresh_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn expired(&self, now: Instant) -> bool {
        now >= self.expires
    }

    pub fn expires_soon(&self, now: Instant) -> bool {
        now + REFRESH_WINDOW >= self.expires
    }

    /// Atomically marks this entry as having a refresh in flight; returns
    /// `true` if this call is the one that set it (so the caller should
    /// actually enqueue the refresh), `false` if one was already pending.
    pub fn mark_refresh_in_flight(&self) -> bool {
        self.async_refresh_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn clear_refresh_in_flight(&self) {
        self.async_refresh_in_flight.store(false, Ordering::Release);
    }

    pub fn rcode(&self) -> ResponseCode {
        self.answer.rcode()
    }
}

/// Determines cacheability and the TTL to write an answer with. The
/// general case clamps the record-derived TTL into `[60, 86400]` seconds;
/// connectivity-probe and error/empty answers instead use their own fixed
/// sub-bound rather than being floored up to 60s, since those are meant to
/// be revalidated far sooner.
pub fn cache_ttl(answer: &DnsPacket, is_connectivity_probe_domain: bool, offline: bool) -> Option<Duration> {
    if !answer.rcode().is_cacheable() {
        return None;
    }

    if is_connectivity_probe_domain {
        return Some(Duration::from_secs(3));
    }
    if answer.rcode() != ResponseCode::NoError {
        return Some(Duration::from_secs(10));
    }
    if offline {
        return Some(Duration::from_secs(60));
    }
    if answer.answers.is_empty() {
        return Some(Duration::from_secs(60));
    }

    let min_ttl = answer.answers.iter().map(|r| r.ttl).min().unwrap_or(60);
    Some(Duration::from_secs(min_ttl as u64).clamp(Duration::from_secs(60), Duration::from_secs(86400)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsRecord, DnsResourceType};

    fn answer_with_ttl(ttl: u32) -> DnsPacket {
        let query = DnsPacket::new_query(1, "example.com.", DnsResourceType::A);
        let mut resp = DnsPacket::response_shell(&query);
        resp.answers.push(DnsRecord::a("example.com.", ttl, "1.2.3.4".parse().unwrap()));
        resp
    }

    #[test]
    fn ttl_clamped_to_floor() {
        let answer = answer_with_ttl(5);
        let ttl = cache_ttl(&answer, false, false).unwrap();
        assert_eq!(ttl, Duration::from_secs(60));
    }

    #[test]
    fn ttl_clamped_to_ceiling() {
        let answer = answer_with_ttl(1_000_000);
        let ttl = cache_ttl(&answer, false, false).unwrap();
        assert_eq!(ttl, Duration::from_secs(86400));
    }

    #[test]
    fn connectivity_probe_domain_gets_three_second_ttl() {
        let answer = answer_with_ttl(300);
        let ttl = cache_ttl(&answer, true, false).unwrap();
        assert_eq!(ttl, Duration::from_secs(3));
    }

    #[test]
    fn refused_is_not_cacheable_via_servfail() {
        let mut answer = answer_with_ttl(300);
        answer.set_rcode(ResponseCode::ServerFailure);
        assert!(cache_ttl(&answer, false, false).is_none());
    }

    #[test]
    fn refresh_in_flight_flag_is_idempotent() {
        let entry = CacheEntry::new(answer_with_ttl(60), Instant::now());
        assert!(entry.mark_refresh_in_flight());
        assert!(!entry.mark_refresh_in_flight());
        entry.clear_refresh_in_flight();
        assert!(entry.mark_refresh_in_flight());
    }
}
