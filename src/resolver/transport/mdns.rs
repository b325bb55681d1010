//! Multicast DNS queries against `224.0.0.251:5353` / `[ff02::fb]:5353`,
//! plus opportunistic scavenging of unsolicited answers seen on the wire
//! into the shared cache. Scavenging is rate-limited and restricted to
//! the multicast zone so a hostile LAN host can't poison unrelated
//! lookups by flooding us with spoofed records.

use crate::cache::{CacheKey, DnsCache};
use crate::dns::{DnsPacket, DnsRecord, DnsResourceClass, DnsResourceType};
use crate::error::{CoreError, Result};
use crate::resolver::transport::DnsTransport;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::trace;

const BUFFER_SIZE: usize = 4096;
const MDNS_V4: &str = "224.0.0.251:5353";
const MDNS_V6: &str = "[ff02::fb]:5353";
const SCAVENGE_TTL_FLOOR: u32 = 60;

fn is_scavengeable_zone(name: &str) -> bool {
    name.ends_with(".local.") || name.ends_with(".254.169.in-addr.arpa.")
}

pub struct MdnsTransport {
    v4_target: SocketAddr,
    v6_target: SocketAddr,
    cache: Option<Arc<DnsCache>>,
    scavenge_limiter: DefaultDirectRateLimiter,
}

impl MdnsTransport {
    pub fn new(cache: Option<Arc<DnsCache>>) -> Self {
        Self {
            v4_target: MDNS_V4.parse().unwrap(),
            v6_target: MDNS_V6.parse().unwrap(),
            cache,
            scavenge_limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::new(20).unwrap())),
        }
    }

    /// Feeds every A/AAAA/PTR record from `packet` that falls inside the
    /// multicast zone into the cache, each under its own single-record
    /// answer so one poisoned record can't drag the rest down with it.
    fn scavenge(&self, packet: &DnsPacket) {
        let Some(cache) = &self.cache else { return };
        for record in &packet.answers {
            if !matches!(record.rtype, DnsResourceType::A | DnsResourceType::AAAA | DnsResourceType::PTR) {
                continue;
            }
            if !is_scavengeable_zone(&record.name) {
                continue;
            }
            if self.scavenge_limiter.check().is_err() {
                trace!("mdns scavenge rate limit hit, dropping record for {}", record.name);
                continue;
            }
            let mut synthetic = DnsPacket::response_shell(&DnsPacket::new_query(0, &record.name, record.rtype));
            let mut floored = record.clone();
            floored.ttl = floored.ttl.max(SCAVENGE_TTL_FLOOR);
            synthetic.answers.push(floored);
            let key = CacheKey::new(&record.name, record.rtype, DnsResourceClass::IN);
            cache.put(key, synthetic, false, false);
        }
    }

    async fn query_via(&self, target: SocketAddr, bind: &str, query: &DnsPacket, deadline: Duration) -> Result<DnsPacket> {
        let socket = UdpSocket::bind(bind).await.map_err(|e| CoreError::Io(e.to_string()))?;
        let bytes = query.serialize().map_err(|e| CoreError::Failure(e.to_string()))?;
        socket.send_to(&bytes, target).await.map_err(|e| CoreError::Io(e.to_string()))?;

        let question = query.questions.first().ok_or_else(|| CoreError::Invalid("empty question section".into()))?;
        let deadline_at = tokio::time::Instant::now() + deadline;
        let mut buf = [0u8; BUFFER_SIZE];

        loop {
            let remaining = deadline_at.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(CoreError::Timeout);
            }
            let n = match tokio::time::timeout(remaining, socket.recv(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(CoreError::Io(e.to_string())),
                Err(_) => return Err(CoreError::Timeout),
            };
            let reply = match DnsPacket::parse(&buf[..n]) {
                Ok(p) => p,
                Err(_) => continue,
            };
            self.scavenge(&reply);
            let answers_question = reply
                .answers
                .iter()
                .any(|r| r.rtype == question.qtype && r.name.eq_ignore_ascii_case(&question.name));
            if answers_question || reply.questions.iter().any(|q| q.name.eq_ignore_ascii_case(&question.name)) {
                return Ok(reply);
            }
        }
    }
}

#[async_trait]
impl DnsTransport for MdnsTransport {
    async fn query(&self, query: &DnsPacket, deadline: Duration) -> Result<DnsPacket> {
        match self.v4_target {
            SocketAddr::V4(_) => self.query_via(self.v4_target, "0.0.0.0:0", query, deadline).await,
            SocketAddr::V6(_) => self.query_via(self.v6_target, "[::]:0", query, deadline).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::DnsResourceType;

    #[test]
    fn local_suffix_is_scavengeable() {
        assert!(is_scavengeable_zone("printer.local."));
        assert!(!is_scavengeable_zone("example.com."));
    }

    #[tokio::test]
    async fn scavenge_writes_into_cache() {
        let cache = Arc::new(DnsCache::new(Arc::new(crate::cache::InMemoryRecordStore::new())));
        let transport = MdnsTransport::new(Some(cache.clone()));
        let q = DnsPacket::new_query(1, "printer.local.", DnsResourceType::A);
        let mut reply = DnsPacket::response_shell(&q);
        reply.answers.push(DnsRecord::a("printer.local.", 10, "192.168.1.50".parse().unwrap()));
        transport.scavenge(&reply);
        let key = CacheKey::new("printer.local.", DnsResourceType::A, DnsResourceClass::IN);
        let entry = cache.get(&key).await;
        assert!(entry.is_some());
    }

    #[tokio::test]
    async fn scavenge_ignores_non_local_zone() {
        let cache = Arc::new(DnsCache::new(Arc::new(crate::cache::InMemoryRecordStore::new())));
        let transport = MdnsTransport::new(Some(cache.clone()));
        let q = DnsPacket::new_query(1, "example.com.", DnsResourceType::A);
        let mut reply = DnsPacket::response_shell(&q);
        reply.answers.push(DnsRecord::a("example.com.", 10, "1.2.3.4".parse().unwrap()));
        transport.scavenge(&reply);
        let key = CacheKey::new("example.com.", DnsResourceType::A, DnsResourceClass::IN);
        assert!(cache.get(&key).await.is_none());
    }
}
