//! Maps `(uid, inode)` pairs to owning PIDs by walking `/proc/<pid>/fd` and
//! resolving the `socket:[<inode>]` symlink target. Grounded on the
//! teacher's process-enumeration use of the `sysinfo` crate for the list of
//! live PIDs, combined with a direct `/proc` walk for the fd-to-inode
//! resolution `sysinfo` itself doesn't expose.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, trace};

pub const PID_UNIDENTIFIED: i64 = -1;

/// How PIDs are discovered and their open file descriptors enumerated.
/// Swappable so tests can supply a fixed fd table without touching the
/// real filesystem.
pub trait ProcessSource: Send + Sync {
    fn live_pids(&self) -> Vec<i64>;
    fn uid_of(&self, pid: i64) -> Option<u32>;
    fn socket_inodes_of(&self, pid: i64) -> Vec<u64>;
}

pub struct ProcFdSource {
    system: parking_lot::Mutex<sysinfo::System>,
}

impl ProcFdSource {
    pub fn new() -> Self {
        Self {
            system: parking_lot::Mutex::new(sysinfo::System::new()),
        }
    }
}

impl Default for ProcFdSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for ProcFdSource {
    fn live_pids(&self) -> Vec<i64> {
        let mut system = self.system.lock();
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        system
            .processes()
            .keys()
            .map(|pid| pid.as_u32() as i64)
            .collect()
    }

    fn uid_of(&self, pid: i64) -> Option<u32> {
        let system = self.system.lock();
        system
            .process(sysinfo::Pid::from_u32(pid as u32))
            .and_then(|p| p.user_id())
            .map(|uid| **uid)
    }

    fn socket_inodes_of(&self, pid: i64) -> Vec<u64> {
        let dir = format!("/proc/{pid}/fd");
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| std::fs::read_link(entry.path()).ok())
            .filter_map(|target| {
                let s = target.to_str()?;
                let inner = s.strip_prefix("socket:[")?.strip_suffix(']')?;
                inner.parse::<u64>().ok()
            })
            .collect()
    }
}

struct Index {
    by_uid: HashMap<u32, Vec<i64>>,
    built_at: Instant,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            by_uid: HashMap::new(),
            built_at: Instant::now(),
        }
    }
}

struct InFlight {
    notify: broadcast::Sender<()>,
}

/// uid → [pid] map, rebuilt on demand and coalesced single-flight across
/// concurrent callers who all miss at once.
pub struct PidIndex {
    source: std::sync::Arc<dyn ProcessSource>,
    index: RwLock<Index>,
    in_flight: RwLock<Option<InFlight>>,
    // (uid, inode) -> pid, populated as findPid resolves individual rows;
    // avoids re-walking every fd table on every lookup for a uid we've
    // already resolved this inode for.
    resolved: RwLock<HashMap<(u32, u64), i64>>,
}

impl PidIndex {
    pub fn new(source: std::sync::Arc<dyn ProcessSource>) -> Self {
        Self {
            source,
            index: RwLock::new(Index::default()),
            in_flight: RwLock::new(None),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    pub fn built_at(&self) -> Instant {
        self.index.read().built_at
    }

    /// Walks every candidate pid for `uid` and tries to resolve `inode`.
    /// Rebuilds the uid index once (single-flight) on a miss, then retries
    /// with `k * 3ms` backoff for k=1..5 to cover a race where the kernel
    /// hasn't yet published the new fd.
    pub async fn find_pid(&self, uid: u32, inode: u64) -> i64 {
        if let Some(&pid) = self.resolved.read().get(&(uid, inode)) {
            return pid;
        }

        if let Some(pid) = self.scan_uid(uid, inode) {
            self.resolved.write().insert((uid, inode), pid);
            return pid;
        }

        self.rebuild().await;
        if let Some(pid) = self.scan_uid(uid, inode) {
            self.resolved.write().insert((uid, inode), pid);
            return pid;
        }

        for k in 1..=5u64 {
            tokio::time::sleep(Duration::from_millis(k * 3)).await;
            if let Some(pid) = self.scan_uid(uid, inode) {
                self.resolved.write().insert((uid, inode), pid);
                return pid;
            }
        }

        trace!("pid index miss for uid={uid} inode={inode}");
        PID_UNIDENTIFIED
    }

    fn scan_uid(&self, uid: u32, inode: u64) -> Option<i64> {
        let pids = self.index.read().by_uid.get(&uid).cloned()?;
        for pid in pids {
            if self.source.socket_inodes_of(pid).contains(&inode) {
                return Some(pid);
            }
        }
        None
    }

    async fn rebuild(&self) {
        let mut rx = {
            let mut guard = self.in_flight.write();
            if let Some(in_flight) = guard.as_ref() {
                in_flight.notify.subscribe()
            } else {
                let (tx, rx) = broadcast::channel(1);
                *guard = Some(InFlight { notify: tx });
                drop(guard);
                self.rebuild_now();
                let mut done_guard = self.in_flight.write();
                if let Some(done) = done_guard.take() {
                    let _ = done.notify.send(());
                }
                rx
            }
        };
        let _ = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
    }

    fn rebuild_now(&self) {
        let pids = self.source.live_pids();
        let mut by_uid: HashMap<u32, Vec<i64>> = HashMap::new();
        for pid in pids {
            if let Some(uid) = self.source.uid_of(pid) {
                by_uid.entry(uid).or_default().push(pid);
            }
        }
        for pids in by_uid.values_mut() {
            pids.sort_unstable();
        }
        let mut index = self.index.write();
        index.by_uid = by_uid;
        index.built_at = Instant::now();
        debug!("pid index rebuilt, {} uids tracked", index.by_uid.len());
    }

    /// Invalidates all cached resolution results; called on network-change
    /// events that may have invalidated socket ownership assumptions.
    pub fn invalidate(&self) {
        self.resolved.write().clear();
    }
}
