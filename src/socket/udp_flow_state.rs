//! Per-bind direction memory for UDP flows: the direction of the first
//! observed packet between a local bind and a remote endpoint is recorded
//! and never flipped thereafter. Sharded with a `DashMap`-of-maps, avoiding
//! a single global lock across unrelated binds.

use crate::socket::address::Address;
use dashmap::DashMap;
use std::time::{Duration, Instant};

const ENTRY_MAX_AGE: Duration = Duration::from_secs(72 * 3600);
const CROWDED_BIND_MAX_AGE: Duration = Duration::from_secs(3 * 3600);
const CROWDED_BIND_THRESHOLD: usize = 256;

#[derive(Copy, Clone, Debug)]
struct UdpFlow {
    inbound: bool,
    last_seen: Instant,
}

/// Keyed first by bind address, then by remote address, giving a
/// two-level lookup for the direction-memory and sweep operations below.
#[derive(Default)]
pub struct UdpFlowState {
    binds: DashMap<Address, DashMap<Address, UdpFlow>>,
}

impl UdpFlowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored (or newly recorded) direction for this
    /// (bind, remote) pair. `observed_inbound` is the direction of the
    /// packet that triggered this call; it is recorded only if this is
    /// the first packet ever seen for the pair.
    pub fn get_direction(&self, bind: Address, remote: Address, observed_inbound: bool) -> bool {
        let remotes = self.binds.entry(bind).or_default();
        let mut entry = remotes.entry(remote).or_insert_with(|| UdpFlow {
            inbound: observed_inbound,
            last_seen: Instant::now(),
        });
        entry.last_seen = Instant::now();
        entry.inbound
    }

    /// Prunes entries for binds no longer present in the live socket
    /// snapshot, and ages out stale entries for binds that are still
    /// live: anything older than 72h always, and anything older than 3h
    /// when a bind is carrying more than 256 remotes.
    pub fn sweep(&self, live_binds: &[Address]) {
        let live: std::collections::HashSet<Address> = live_binds.iter().copied().collect();
        self.binds.retain(|bind, _| live.contains(bind));

        let now = Instant::now();
        for entry in self.binds.iter() {
            let remotes = entry.value();
            let crowded = remotes.len() > CROWDED_BIND_THRESHOLD;
            let max_age = if crowded { CROWDED_BIND_MAX_AGE } else { ENTRY_MAX_AGE };
            remotes.retain(|_, flow| now.duration_since(flow.last_seen) < max_age);
        }
    }

    pub fn bind_count(&self) -> usize {
        self.binds.len()
    }

    pub fn entry_count(&self, bind: Address) -> usize {
        self.binds.get(&bind).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str, port: u16) -> Address {
        Address::new(ip.parse().unwrap(), port)
    }

    #[test]
    fn first_packet_direction_wins() {
        let state = UdpFlowState::new();
        let bind = addr("0.0.0.0", 12345);
        let remote = addr("8.8.8.8", 53);

        let dir1 = state.get_direction(bind, remote, false);
        assert!(!dir1);
        // second call claims inbound=true but the recorded direction must
        // not flip.
        let dir2 = state.get_direction(bind, remote, true);
        assert!(!dir2);
        assert_eq!(state.entry_count(bind), 1);
    }

    #[test]
    fn distinct_remotes_tracked_independently() {
        let state = UdpFlowState::new();
        let bind = addr("0.0.0.0", 12345);
        state.get_direction(bind, addr("8.8.8.8", 53), false);
        state.get_direction(bind, addr("1.1.1.1", 53), true);
        assert_eq!(state.entry_count(bind), 2);
    }

    #[test]
    fn sweep_drops_binds_not_in_snapshot() {
        let state = UdpFlowState::new();
        let bind = addr("0.0.0.0", 12345);
        state.get_direction(bind, addr("8.8.8.8", 53), false);
        assert_eq!(state.bind_count(), 1);
        state.sweep(&[]);
        assert_eq!(state.bind_count(), 0);
    }

    #[test]
    fn sweep_keeps_live_binds() {
        let state = UdpFlowState::new();
        let bind = addr("0.0.0.0", 12345);
        state.get_direction(bind, addr("8.8.8.8", 53), false);
        state.sweep(&[bind]);
        assert_eq!(state.bind_count(), 1);
        assert_eq!(state.entry_count(bind), 1);
    }
}
