//! Detects interface changes (link up/down, new adapter, address churn)
//! by hashing the sorted interface name list on an interval, and fires a
//! broadcast notification when it differs from the last poll. The core
//! subscribes to invalidate anything keyed off "what does the network
//! look like right now" — socket tables, the pid index, resolver scope
//! routing, device location caches.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

const ONLINE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const OFFLINE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Reads the current set of network interfaces. Swappable so tests don't
/// depend on the host's actual adapters.
pub trait InterfaceSource: Send + Sync {
    fn interface_names(&self) -> Vec<String>;
}

pub struct SysinfoInterfaceSource;

impl InterfaceSource for SysinfoInterfaceSource {
    fn interface_names(&self) -> Vec<String> {
        let networks = sysinfo::Networks::new_with_refreshed_list();
        let mut names: Vec<String> = networks.iter().map(|(name, _)| name.clone()).collect();
        names.sort();
        names
    }
}

fn hash_interfaces(names: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    names.hash(&mut hasher);
    hasher.finish()
}

pub struct NetworkChanged {
    source: Box<dyn InterfaceSource>,
    last_hash: AtomicU64,
    tx: broadcast::Sender<()>,
}

impl NetworkChanged {
    pub fn new(source: Box<dyn InterfaceSource>) -> Self {
        let (tx, _rx) = broadcast::channel(4);
        Self { source, last_hash: AtomicU64::new(0), tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Polls once, returning `true` if the interface set changed since
    /// the last poll (the first poll never reports a change).
    pub fn poll_once(&self) -> bool {
        let names = self.source.interface_names();
        let hash = hash_interfaces(&names);
        let previous = self.last_hash.swap(hash, Ordering::SeqCst);
        if previous == 0 {
            return false;
        }
        if previous != hash {
            debug!("network interface set changed");
            let _ = self.tx.send(());
            true
        } else {
            false
        }
    }

    pub async fn run(&self, online: &std::sync::atomic::AtomicBool) {
        loop {
            self.poll_once();
            let interval = if online.load(Ordering::Relaxed) { ONLINE_POLL_INTERVAL } else { OFFLINE_POLL_INTERVAL };
            tokio::time::sleep(interval).await;
        }
    }
}
