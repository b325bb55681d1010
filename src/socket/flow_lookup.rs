//! Resolves a packet's 5-tuple to an owning process, consulting
//! `SocketTable`, `PidIndex`, and `UdpFlowState`. The bounded retry loop
//! alternates between "refresh the source of truth" and "back off
//! briefly", the same shape used for upstream resolver retries elsewhere
//! in this crate, reused here for the kernel-table race this lookup has
//! to ride out.

use crate::error::Result;
use crate::socket::address::{classify_scope, Address};
use crate::socket::pid_index::{PidIndex, PID_UNIDENTIFIED};
use crate::socket::socket_table::{ConnectionRow, Family, Protocol, SocketTables};
use std::sync::Arc;
use std::time::Duration;

pub const PID_UNDEFINED: i64 = -2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Copy, Clone, Debug)]
pub struct PacketInfo {
    pub direction: Direction,
    pub protocol: Protocol,
    pub family: Family,
    pub local: Address,
    pub remote: Address,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlowResult {
    pub pid: i64,
    pub inbound: bool,
}

const MAX_ATTEMPTS: u32 = 14;
const FAST_MAX_ATTEMPTS: u32 = 4;
const RETRY_STEP: Duration = Duration::from_millis(3);

fn dual_family(family: Family) -> Family {
    match family {
        Family::V4 => Family::V6,
        Family::V6 => Family::V4,
    }
}

pub struct FlowLookup {
    tables: Arc<SocketTables>,
    pid_index: Arc<PidIndex>,
    udp_state: Arc<crate::socket::udp_flow_state::UdpFlowState>,
}

impl FlowLookup {
    pub fn new(
        tables: Arc<SocketTables>,
        pid_index: Arc<PidIndex>,
        udp_state: Arc<crate::socket::udp_flow_state::UdpFlowState>,
    ) -> Self {
        Self {
            tables,
            pid_index,
            udp_state,
        }
    }

    pub async fn lookup(&self, pkt: PacketInfo, fast: bool) -> Result<FlowResult> {
        match pkt.protocol {
            Protocol::Tcp => self.lookup_tcp(pkt, fast).await,
            Protocol::Udp => self.lookup_udp(pkt, fast).await,
        }
    }

    async fn lookup_tcp(&self, pkt: PacketInfo, fast: bool) -> Result<FlowResult> {
        let max_attempts = if fast { FAST_MAX_ATTEMPTS } else { MAX_ATTEMPTS };
        let main_table = self.tables.get(pkt.family, Protocol::Tcp);
        let dual_table = self.tables.get(dual_family(pkt.family), Protocol::Tcp);
        let mut main_iter = 0u64;
        let mut dual_iter = 0u64;

        for attempt in 1..=max_attempts {
            let (main_conns, main_listeners, new_main_iter) = main_table.fetch(main_iter).await?;
            main_iter = new_main_iter;
            if let Some(hit) = match_tcp(&pkt, &main_conns, &main_listeners) {
                let pid = self.resolve_pid(&hit.row).await;
                return Ok(FlowResult {
                    pid,
                    inbound: hit.inbound,
                });
            }

            let (dual_conns, dual_listeners, new_dual_iter) = dual_table.fetch(dual_iter).await?;
            dual_iter = new_dual_iter;
            if let Some(hit) = match_tcp(&pkt, &dual_conns, &dual_listeners) {
                let pid = self.resolve_pid(&hit.row).await;
                return Ok(FlowResult {
                    pid,
                    inbound: hit.inbound,
                });
            }

            if attempt == max_attempts {
                break;
            }
            if attempt % 2 == 0 {
                tokio::time::sleep(RETRY_STEP * attempt).await;
            } else {
                // force a fresh fetch next loop by not advancing prev_iter past current
                main_iter = main_iter.saturating_sub(1);
            }
        }

        Ok(FlowResult {
            pid: PID_UNDEFINED,
            inbound: pkt.direction == Direction::Inbound,
        })
    }

    async fn lookup_udp(&self, pkt: PacketInfo, fast: bool) -> Result<FlowResult> {
        let max_attempts = if fast { FAST_MAX_ATTEMPTS } else { MAX_ATTEMPTS };
        let main_table = self.tables.get(pkt.family, Protocol::Udp);
        let dual_table = self.tables.get(dual_family(pkt.family), Protocol::Udp);
        let mut main_iter = 0u64;
        let mut dual_iter = 0u64;

        let mut matched_row: Option<ConnectionRow> = None;

        for attempt in 1..=max_attempts {
            let (_, main_listeners, new_main_iter) = main_table.fetch(main_iter).await?;
            main_iter = new_main_iter;
            if let Some(row) = match_udp_bind(&pkt, &main_listeners) {
                matched_row = Some(row);
                break;
            }

            let (_, dual_listeners, new_dual_iter) = dual_table.fetch(dual_iter).await?;
            dual_iter = new_dual_iter;
            if let Some(row) = match_udp_bind(&pkt, &dual_listeners) {
                matched_row = Some(row);
                break;
            }

            if attempt == max_attempts {
                break;
            }
            if attempt % 2 == 0 {
                tokio::time::sleep(RETRY_STEP * attempt).await;
            } else {
                main_iter = main_iter.saturating_sub(1);
            }
        }

        let Some(row) = matched_row else {
            return Ok(FlowResult {
                pid: PID_UNDEFINED,
                inbound: pkt.direction == Direction::Inbound,
            });
        };

        let pid = self.resolve_pid(&row).await;

        if pkt.remote.port == 0 {
            // caller is merely probing; pass the observed direction through
            // untouched rather than committing it to UdpFlowState.
            return Ok(FlowResult {
                pid,
                inbound: pkt.direction == Direction::Inbound,
            });
        }

        let inbound = self
            .udp_state
            .get_direction(pkt.local, pkt.remote, pkt.direction == Direction::Inbound);
        Ok(FlowResult { pid, inbound })
    }

    async fn resolve_pid(&self, row: &ConnectionRow) -> i64 {
        if row.pid >= 0 {
            return row.pid;
        }
        self.pid_index.find_pid(row.uid, row.inode).await
    }
}

struct TcpHit {
    row: ConnectionRow,
    inbound: bool,
}

fn match_tcp(pkt: &PacketInfo, conns: &[ConnectionRow], listeners: &[ConnectionRow]) -> Option<TcpHit> {
    for row in listeners {
        let listens_any = row.listens_any();
        if row.local.port == pkt.local.port && (listens_any || row.local.ip == pkt.local.ip) {
            return Some(TcpHit {
                row: row.clone(),
                inbound: true,
            });
        }
    }
    for row in conns {
        if row.local == pkt.local && row.remote == pkt.remote {
            return Some(TcpHit {
                row: row.clone(),
                inbound: false,
            });
        }
    }
    None
}

fn match_udp_bind(pkt: &PacketInfo, binds: &[ConnectionRow]) -> Option<ConnectionRow> {
    let local_multicast = classify_scope(pkt.local.ip).is_multicast();
    for row in binds {
        let listens_any = row.listens_any();
        if row.local.port != pkt.local.port {
            continue;
        }
        if listens_any || row.local.ip == pkt.local.ip || local_multicast {
            return Some(row.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::pid_index::{PidIndex, ProcessSource};
    use crate::socket::socket_table::{ConnectionState, EmptySource, SocketSource};
    use crate::socket::udp_flow_state::UdpFlowState;

    struct StaticSource {
        rows: Vec<ConnectionRow>,
    }
    impl SocketSource for StaticSource {
        fn read_rows(&self, family: Family, protocol: Protocol) -> std::io::Result<Vec<ConnectionRow>> {
            Ok(self
                .rows
                .iter()
                .filter(|r| r.family == family && r.protocol == protocol)
                .cloned()
                .collect())
        }
    }

    struct EmptyProcSource;
    impl ProcessSource for EmptyProcSource {
        fn live_pids(&self) -> Vec<i64> {
            Vec::new()
        }
        fn uid_of(&self, _pid: i64) -> Option<u32> {
            None
        }
        fn socket_inodes_of(&self, _pid: i64) -> Vec<u64> {
            Vec::new()
        }
    }

    fn addr(ip: &str, port: u16) -> Address {
        Address::new(ip.parse().unwrap(), port)
    }

    fn make_lookup(rows: Vec<ConnectionRow>) -> FlowLookup {
        let source: Arc<dyn SocketSource> = Arc::new(StaticSource { rows });
        let tables = Arc::new(SocketTables::new(source));
        let pid_index = Arc::new(PidIndex::new(Arc::new(EmptyProcSource)));
        let udp_state = Arc::new(UdpFlowState::new());
        FlowLookup::new(tables, pid_index, udp_state)
    }

    #[tokio::test]
    async fn tcp_connection_fast_path() {
        let row = ConnectionRow {
            local: addr("10.0.0.5", 54321),
            remote: addr("93.184.216.34", 443),
            pid: 1234,
            uid: 1000,
            inode: 1,
            protocol: Protocol::Tcp,
            family: Family::V4,
            state: ConnectionState::Established,
        };
        let lookup = make_lookup(vec![row]);
        let pkt = PacketInfo {
            direction: Direction::Outbound,
            protocol: Protocol::Tcp,
            family: Family::V4,
            local: addr("10.0.0.5", 54321),
            remote: addr("93.184.216.34", 443),
        };
        let result = lookup.lookup(pkt, false).await.unwrap();
        assert_eq!(result.pid, 1234);
        assert!(!result.inbound);
    }

    #[tokio::test]
    async fn tcp_listener_attribution() {
        let row = ConnectionRow {
            local: addr("0.0.0.0", 8080),
            remote: addr("0.0.0.0", 0),
            pid: 555,
            uid: 1000,
            inode: 1,
            protocol: Protocol::Tcp,
            family: Family::V4,
            state: ConnectionState::Listen,
        };
        let lookup = make_lookup(vec![row]);
        let pkt = PacketInfo {
            direction: Direction::Inbound,
            protocol: Protocol::Tcp,
            family: Family::V4,
            local: addr("10.0.0.5", 8080),
            remote: addr("203.0.113.9", 51000),
        };
        let result = lookup.lookup(pkt, false).await.unwrap();
        assert_eq!(result.pid, 555);
        assert!(result.inbound);
    }

    #[tokio::test]
    async fn unresolved_tcp_returns_undefined_fast() {
        let lookup = make_lookup(vec![]);
        let pkt = PacketInfo {
            direction: Direction::Outbound,
            protocol: Protocol::Tcp,
            family: Family::V4,
            local: addr("10.0.0.5", 1),
            remote: addr("10.0.0.9", 2),
        };
        let result = lookup.lookup(pkt, true).await.unwrap();
        assert_eq!(result.pid, PID_UNDEFINED);
    }

    #[tokio::test]
    async fn udp_first_packet_direction_recorded() {
        let row = ConnectionRow {
            local: addr("0.0.0.0", 12345),
            remote: addr("0.0.0.0", 0),
            pid: 77,
            uid: 1000,
            inode: 1,
            protocol: Protocol::Udp,
            family: Family::V4,
            state: ConnectionState::Listen,
        };
        let lookup = make_lookup(vec![row]);
        let pkt_out = PacketInfo {
            direction: Direction::Outbound,
            protocol: Protocol::Udp,
            family: Family::V4,
            local: addr("0.0.0.0", 12345),
            remote: addr("8.8.8.8", 53),
        };
        let result1 = lookup.lookup(pkt_out, false).await.unwrap();
        assert!(!result1.inbound);

        let pkt_in = PacketInfo {
            direction: Direction::Inbound,
            ..pkt_out
        };
        let result2 = lookup.lookup(pkt_in, false).await.unwrap();
        assert!(!result2.inbound, "first packet's direction must stick");
    }

    #[tokio::test]
    async fn empty_source_never_panics() {
        let tables = Arc::new(SocketTables::new(Arc::new(EmptySource)));
        let pid_index = Arc::new(PidIndex::new(Arc::new(EmptyProcSource)));
        let udp_state = Arc::new(UdpFlowState::new());
        let lookup = FlowLookup::new(tables, pid_index, udp_state);
        let pkt = PacketInfo {
            direction: Direction::Outbound,
            protocol: Protocol::Tcp,
            family: Family::V4,
            local: addr("10.0.0.5", 1),
            remote: addr("10.0.0.9", 2),
        };
        let result = lookup.lookup(pkt, true).await.unwrap();
        assert_eq!(result.pid, PID_UNDEFINED);
    }
}
