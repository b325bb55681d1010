//! Process/flow attribution: turning a packet's 5-tuple into an owning
//! process, via a cached view of the kernel's connection tables, a
//! uid-to-pid index, and per-UDP-bind direction memory.

pub mod address;
pub mod flow_lookup;
pub mod pid_index;
pub mod socket_table;
pub mod udp_flow_state;

pub use address::{classify_scope, Address, AddressScope};
pub use flow_lookup::{Direction, FlowLookup, FlowResult, PacketInfo, PID_UNDEFINED};
pub use pid_index::{PidIndex, ProcessSource, PID_UNIDENTIFIED};
pub use socket_table::{
    default_source, ConnectionRow, ConnectionState, Family, Protocol, SocketSource, SocketTable,
    SocketTables,
};
pub use udp_flow_state::UdpFlowState;
