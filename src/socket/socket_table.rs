//! `SocketTable`: snapshot-cached enumeration of kernel TCP/UDP endpoints,
//! refreshed from `/proc/net/{tcp,tcp6,udp,udp6}` on Linux. Concurrent
//! refreshes are single-flighted and the snapshot carries a monotonically
//! increasing iteration counter so callers can tell whether the table has
//! moved since they last looked, without taking a lock on every lookup.

use crate::error::{CoreError, Result};
use crate::socket::address::Address;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Listen,
    Established,
}

/// `pid = UNIDENTIFIED` means "lookup pending"; `pid = UNDEFINED` means
/// "attempted and failed permanently for this row".
pub const PID_UNIDENTIFIED: i64 = -1;
pub const PID_UNDEFINED: i64 = -2;

#[derive(Clone, Debug)]
pub struct ConnectionRow {
    pub local: Address,
    pub remote: Address,
    pub pid: i64,
    pub uid: u32,
    pub inode: u64,
    pub protocol: Protocol,
    pub family: Family,
    pub state: ConnectionState,
}

impl ConnectionRow {
    pub fn listens_any(&self) -> bool {
        self.local.listens_any()
    }
}

/// Acquires the raw rows for one (family, protocol) pair. Implementations
/// are swappable at build/run time; `ProcNetSource` is the Linux `/proc`
/// based one, used by default. Errors here are logged but never
/// propagated past `fetch` — the snapshot's freshness is the sole
/// contract, not any particular acquisition attempt's success.
pub trait SocketSource: Send + Sync {
    fn read_rows(&self, family: Family, protocol: Protocol) -> std::io::Result<Vec<ConnectionRow>>;
}

/// Parses `/proc/net/{tcp,tcp6,udp,udp6}`. On non-Linux platforms, or where
/// the file is unreadable, `read_rows` returns an empty table rather than
/// erroring the whole snapshot; a different `SocketSource` (e.g. a
/// platform connection-table API wrapper) can be substituted.
pub struct ProcNetSource;

const TCP_LISTEN_STATE: &str = "0A";

impl SocketSource for ProcNetSource {
    fn read_rows(&self, family: Family, protocol: Protocol) -> std::io::Result<Vec<ConnectionRow>> {
        let path = match (family, protocol) {
            (Family::V4, Protocol::Tcp) => "/proc/net/tcp",
            (Family::V6, Protocol::Tcp) => "/proc/net/tcp6",
            (Family::V4, Protocol::Udp) => "/proc/net/udp",
            (Family::V6, Protocol::Udp) => "/proc/net/udp6",
        };
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!("socket table source {} unavailable: {}", path, e);
                return Ok(Vec::new());
            }
        };
        let mut rows = Vec::new();
        for line in contents.lines().skip(1) {
            if let Some(row) = parse_proc_net_line(line, family, protocol) {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

fn parse_proc_net_line(line: &str, family: Family, protocol: Protocol) -> Option<ConnectionRow> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }
    let local = parse_hex_addr(fields[1], family)?;
    let remote = parse_hex_addr(fields[2], family)?;
    let proc_state = fields[3];
    let uid: u32 = fields[7].parse().ok()?;
    let inode: u64 = fields[9].parse().ok()?;

    let state = if protocol == Protocol::Tcp && proc_state == TCP_LISTEN_STATE {
        ConnectionState::Listen
    } else if protocol == Protocol::Udp && remote.port == 0 {
        ConnectionState::Listen
    } else {
        ConnectionState::Established
    };

    Some(ConnectionRow {
        local,
        remote,
        pid: PID_UNIDENTIFIED,
        uid,
        inode,
        protocol,
        family,
        state,
    })
}

fn parse_hex_addr(field: &str, family: Family) -> Option<Address> {
    let (ip_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let ip = match family {
        Family::V4 => {
            let raw = u32::from_str_radix(ip_hex, 16).ok()?;
            std::net::Ipv4Addr::from(raw.to_le_bytes()).into()
        }
        Family::V6 => {
            if ip_hex.len() != 32 {
                return None;
            }
            let mut octets = [0u8; 16];
            for (i, chunk) in (0..4).enumerate() {
                let word = u32::from_str_radix(&ip_hex[chunk * 8..chunk * 8 + 8], 16).ok()?;
                let bytes = word.to_le_bytes();
                octets[i * 4..i * 4 + 4].copy_from_slice(&bytes);
            }
            std::net::Ipv6Addr::from(octets).into()
        }
    };
    Some(Address::new(ip, port))
}

#[derive(Clone, Default)]
struct Snapshot {
    connections: Arc<Vec<ConnectionRow>>,
    listeners: Arc<Vec<ConnectionRow>>,
    fetched_at: Option<Instant>,
    update_iter: u64,
}

struct InFlight {
    notify: broadcast::Sender<()>,
}

enum InFlightState {
    Joined(broadcast::Receiver<()>),
    Started(broadcast::Receiver<()>),
}

/// One `SocketTable` instance per (family, protocol). Exactly one fetch
/// may be in flight at a time; concurrent callers coalesce onto it via the
/// broadcast signal.
pub struct SocketTable {
    family: Family,
    protocol: Protocol,
    source: Arc<dyn SocketSource>,
    snapshot: RwLock<Snapshot>,
    in_flight: RwLock<Option<InFlight>>,
    update_iter: AtomicU64,
}

const MAX_CONSECUTIVE_ATTEMPTS: u32 = 100;

impl SocketTable {
    pub fn new(family: Family, protocol: Protocol, source: Arc<dyn SocketSource>) -> Self {
        Self {
            family,
            protocol,
            source,
            snapshot: RwLock::new(Snapshot::default()),
            in_flight: RwLock::new(None),
            update_iter: AtomicU64::new(0),
        }
    }

    pub fn current_iter(&self) -> u64 {
        self.update_iter.load(Ordering::Acquire)
    }

    /// Atomically checks for an in-flight refresh and either subscribes to
    /// it or starts a new one. Synchronous so the lock guard never needs to
    /// cross an `.await` point.
    fn join_or_start_in_flight(&self) -> InFlightState {
        let mut guard = self.in_flight.write();
        if let Some(in_flight) = guard.as_ref() {
            InFlightState::Joined(in_flight.notify.subscribe())
        } else {
            let (tx, rx) = broadcast::channel(1);
            *guard = Some(InFlight { notify: tx });
            InFlightState::Started(rx)
        }
    }

    /// `fetch(prev_iter)`: returns the cached snapshot immediately if it is
    /// already newer than `prev_iter`; otherwise coalesces with any
    /// in-flight refresh, or starts one.
    pub async fn fetch(
        &self,
        prev_iter: u64,
    ) -> Result<(Arc<Vec<ConnectionRow>>, Arc<Vec<ConnectionRow>>, u64)> {
        if prev_iter < self.current_iter() {
            let snap = self.snapshot.read();
            return Ok((snap.connections.clone(), snap.listeners.clone(), snap.update_iter));
        }

        // Single-flight: either wait on an in-flight refresh, or become it.
        let mut rx = match self.join_or_start_in_flight() {
            InFlightState::Joined(rx) => rx,
            InFlightState::Started(rx) => {
                self.refresh().await;
                let mut done_guard = self.in_flight.write();
                if let Some(done) = done_guard.take() {
                    let _ = done.notify.send(());
                }
                drop(done_guard);
                rx
            }
        };

        // Wait for whichever refresh we coalesced onto to finish (no-op if
        // we were the one driving it; the channel was already signalled).
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await;

        let snap = self.snapshot.read();
        Ok((snap.connections.clone(), snap.listeners.clone(), snap.update_iter))
    }

    async fn refresh(&self) {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if attempts > MAX_CONSECUTIVE_ATTEMPTS {
                warn!(
                    "socket table refresh for {:?}/{:?} aborted after {} attempts",
                    self.family, self.protocol, MAX_CONSECUTIVE_ATTEMPTS
                );
                return;
            }
            match self.source.read_rows(self.family, self.protocol) {
                Ok(rows) => {
                    let mut connections = Vec::new();
                    let mut listeners = Vec::new();
                    for row in rows {
                        if row.state == ConnectionState::Listen {
                            listeners.push(row);
                        } else {
                            connections.push(row);
                        }
                    }
                    let new_iter = self.update_iter.fetch_add(1, Ordering::AcqRel) + 1;
                    let mut snap = self.snapshot.write();
                    snap.connections = Arc::new(connections);
                    snap.listeners = Arc::new(listeners);
                    snap.fetched_at = Some(Instant::now());
                    snap.update_iter = new_iter;
                    trace!(
                        "socket table {:?}/{:?} refreshed, iter={}",
                        self.family, self.protocol, new_iter
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        "socket table refresh attempt {} for {:?}/{:?} failed: {}",
                        attempts, self.family, self.protocol, e
                    );
                    // Fall through and retry; the stale snapshot is returned
                    // as-is by `fetch` once the loop gives up.
                    continue;
                }
            }
        }
    }
}

/// Fixed key identifying one of the four (family, protocol) socket tables
/// the core keeps resident for the lifetime of the process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub family: Family,
    pub protocol: Protocol,
}

/// The full set of resident socket tables, keyed by (family, protocol).
pub struct SocketTables {
    tables: HashMap<TableKey, Arc<SocketTable>>,
}

impl SocketTables {
    pub fn new(source: Arc<dyn SocketSource>) -> Self {
        let mut tables = HashMap::new();
        for family in [Family::V4, Family::V6] {
            for protocol in [Protocol::Tcp, Protocol::Udp] {
                tables.insert(
                    TableKey { family, protocol },
                    Arc::new(SocketTable::new(family, protocol, source.clone())),
                );
            }
        }
        Self { tables }
    }

    pub fn get(&self, family: Family, protocol: Protocol) -> Arc<SocketTable> {
        self.tables
            .get(&TableKey { family, protocol })
            .expect("all four (family, protocol) tables are always present")
            .clone()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<SocketTable>> {
        self.tables.values()
    }
}

/// No-op source used when the platform has nothing to parse; keeps
/// `SocketTables` constructible in tests and on unsupported platforms
/// without special-casing callers (mirrors FlowLookup's "unresolved" path).
pub struct EmptySource;

impl SocketSource for EmptySource {
    fn read_rows(&self, _family: Family, _protocol: Protocol) -> std::io::Result<Vec<ConnectionRow>> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "no socket source configured on this platform",
        ))
    }
}

pub fn default_source() -> Arc<dyn SocketSource> {
    Arc::new(ProcNetSource)
}
