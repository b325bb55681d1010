//! Two-layer DNS answer cache: a bounded in-memory LRU in front of a
//! pluggable `RecordStore`, with delayed batched writes and a three-strike
//! reset to shake off a poisoned entry without needing an operator to
//! intervene.

pub mod entry;
pub mod key;
pub mod store;

pub use entry::{cache_ttl, CacheEntry, REFRESH_WINDOW};
pub use key::CacheKey;
pub use store::{DelayedWriter, InMemoryRecordStore, RecordStore};

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const HOT_LAYER_CAPACITY: usize = 256;
const STRIKE_THRESHOLD: u32 = 3;
const STRIKE_GRACE_REQUESTS: u32 = 7;

#[derive(Default)]
struct Strikes {
    consecutive: u32,
    reset_locked: bool,
    requests_since_reset: u32,
}

pub struct DnsCache {
    hot: RwLock<lru::LruCache<CacheKey, CacheEntry>>,
    store: Arc<dyn RecordStore>,
    writer: DelayedWriter,
    strikes: DashMap<CacheKey, Strikes>,
}

impl DnsCache {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let writer = DelayedWriter::spawn(store.clone());
        Self {
            hot: RwLock::new(lru::LruCache::new(std::num::NonZeroUsize::new(HOT_LAYER_CAPACITY).unwrap())),
            store,
            writer,
            strikes: DashMap::new(),
        }
    }

    /// Looks up `key`, counting it toward the three-strike reset window
    /// before returning whatever is cached (possibly stale — the caller
    /// decides whether a stale or soon-expiring entry is still usable).
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if self.record_request_and_maybe_reset(key) {
            self.reset(key).await;
            return None;
        }

        if let Some(entry) = self.hot.write().get(key).cloned() {
            return Some(entry);
        }
        if let Some(entry) = self.store.read(key).await {
            self.hot.write().put(key.clone(), entry.clone());
            return Some(entry);
        }
        None
    }

    /// Writes `answer` under `key` if it is cacheable, through both
    /// layers. Returns `false` if the answer's rcode makes it
    /// non-cacheable and nothing was written.
    pub fn put(
        &self,
        key: CacheKey,
        answer: crate::dns::DnsPacket,
        is_connectivity_probe_domain: bool,
        offline: bool,
    ) -> bool {
        let Some(ttl) = cache_ttl(&answer, is_connectivity_probe_domain, offline) else {
            return false;
        };
        let entry = CacheEntry::new(answer, Instant::now() + ttl);
        self.hot.write().put(key.clone(), entry.clone());
        self.writer.put(key.clone(), entry);
        if let Some(mut strikes) = self.strikes.get_mut(&key) {
            strikes.consecutive = 0;
        }
        true
    }

    /// Purges `key` from both layers. The in-memory layer is removed
    /// first and the delete enqueued on the same ordered writer queue as
    /// any prior `put`, so a write that was already in flight for this
    /// key cannot land after the delete and resurrect the row.
    pub async fn reset(&self, key: &CacheKey) {
        self.hot.write().pop(key);
        self.writer.delete(key.clone());
        debug!("cache reset for {key}");
    }

    fn record_request_and_maybe_reset(&self, key: &CacheKey) -> bool {
        let mut strikes = self.strikes.entry(key.clone()).or_default();
        if strikes.reset_locked {
            strikes.requests_since_reset += 1;
            if strikes.requests_since_reset >= STRIKE_GRACE_REQUESTS {
                strikes.reset_locked = false;
                strikes.requests_since_reset = 0;
                strikes.consecutive = 0;
            }
            return false;
        }
        strikes.consecutive += 1;
        if strikes.consecutive >= STRIKE_THRESHOLD {
            strikes.consecutive = 0;
            strikes.reset_locked = true;
            strikes.requests_since_reset = 0;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsPacket, DnsResourceClass, DnsResourceType};

    fn key() -> CacheKey {
        CacheKey::new("example.com.", DnsResourceType::A, DnsResourceClass::IN)
    }

    fn answer() -> DnsPacket {
        let query = DnsPacket::new_query(1, "example.com.", DnsResourceType::A);
        let mut resp = DnsPacket::response_shell(&query);
        resp.answers.push(crate::dns::DnsRecord::a(
            "example.com.",
            300,
            "1.2.3.4".parse().unwrap(),
        ));
        resp
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = DnsCache::new(Arc::new(InMemoryRecordStore::new()));
        assert!(cache.put(key(), answer(), false, false));
        let entry = cache.get(&key()).await.unwrap();
        assert_eq!(entry.answer.answers.len(), 1);
    }

    #[tokio::test]
    async fn non_cacheable_rcode_rejected() {
        let cache = DnsCache::new(Arc::new(InMemoryRecordStore::new()));
        let mut bad = answer();
        bad.set_rcode(crate::dns::ResponseCode::ServerFailure);
        assert!(!cache.put(key(), bad, false, false));
    }

    #[tokio::test]
    async fn third_consecutive_request_resets() {
        let cache = DnsCache::new(Arc::new(InMemoryRecordStore::new()));
        cache.put(key(), answer(), false, false);
        assert!(cache.get(&key()).await.is_some()); // 1
        assert!(cache.get(&key()).await.is_some()); // 2
        assert!(cache.get(&key()).await.is_none(), "3rd consecutive request forces a reset"); // 3
    }

    #[tokio::test]
    async fn reset_removes_entry() {
        let cache = DnsCache::new(Arc::new(InMemoryRecordStore::new()));
        cache.put(key(), answer(), false, false);
        cache.reset(&key()).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cache.get(&key()).await.is_none());
    }
}
