//! `RecordStore`: the external collaborator the cache writes through, with
//! writes batched and flushed on a short delay rather than hitting the
//! backing store on every `put`. A narrow async trait plus a concrete
//! in-memory implementation standing in for whatever real store a
//! deployment wires up.

use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn write(&self, key: CacheKey, entry: CacheEntry);
    async fn read(&self, key: &CacheKey) -> Option<CacheEntry>;
    async fn delete(&self, key: &CacheKey);
}

/// In-memory stand-in for a real backing store (disk, a settings service,
/// whatever a given deployment provides). Good enough for tests and for
/// running without any external persistence configured.
#[derive(Default)]
pub struct InMemoryRecordStore {
    rows: DashMap<CacheKey, CacheEntry>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn write(&self, key: CacheKey, entry: CacheEntry) {
        self.rows.insert(key, entry);
    }

    async fn read(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.rows.get(key).map(|r| r.value().clone())
    }

    async fn delete(&self, key: &CacheKey) {
        self.rows.remove(key);
    }
}

enum WriteOp {
    Put(CacheKey, CacheEntry),
    Delete(CacheKey),
}

/// Coalesces writes over a short window before flushing them to the
/// backing `RecordStore`, so a burst of cache updates doesn't turn into a
/// burst of store round-trips.
pub struct DelayedWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
}

const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(250);

impl DelayedWriter {
    pub fn spawn(store: Arc<dyn RecordStore>) -> Self {
        Self::spawn_with_delay(store, DEFAULT_FLUSH_DELAY)
    }

    pub fn spawn_with_delay(store: Arc<dyn RecordStore>, delay: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();
        tokio::spawn(async move {
            let mut pending: Vec<WriteOp> = Vec::new();
            loop {
                tokio::select! {
                    op = rx.recv() => {
                        match op {
                            Some(op) => pending.push(op),
                            None => break,
                        }
                    }
                    _ = tokio::time::sleep(delay), if !pending.is_empty() => {
                        flush(&store, &mut pending).await;
                    }
                }
            }
            flush(&store, &mut pending).await;
        });
        Self { tx }
    }

    pub fn put(&self, key: CacheKey, entry: CacheEntry) {
        let _ = self.tx.send(WriteOp::Put(key, entry));
    }

    pub fn delete(&self, key: CacheKey) {
        let _ = self.tx.send(WriteOp::Delete(key));
    }
}

async fn flush(store: &Arc<dyn RecordStore>, pending: &mut Vec<WriteOp>) {
    if pending.is_empty() {
        return;
    }
    trace!("flushing {} pending cache writes", pending.len());
    for op in pending.drain(..) {
        match op {
            WriteOp::Put(key, entry) => store.write(key, entry).await,
            WriteOp::Delete(key) => store.delete(&key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsPacket, DnsResourceType};
    use std::time::Instant;

    fn key() -> CacheKey {
        CacheKey::new("example.com.", DnsResourceType::A, crate::dns::DnsResourceClass::IN)
    }

    fn entry() -> CacheEntry {
        CacheEntry::new(
            DnsPacket::new_query(1, "example.com.", DnsResourceType::A),
            Instant::now() + Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn delayed_writer_eventually_flushes() {
        let store: Arc<InMemoryRecordStore> = Arc::new(InMemoryRecordStore::new());
        let writer = DelayedWriter::spawn_with_delay(store.clone(), Duration::from_millis(10));
        writer.put(key(), entry());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.read(&key()).await.is_some());
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryRecordStore::new();
        store.write(key(), entry()).await;
        assert!(store.read(&key()).await.is_some());
        store.delete(&key()).await;
        assert!(store.read(&key()).await.is_none());
    }
}
