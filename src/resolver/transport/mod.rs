//! Per-transport query execution. Each transport implements the same
//! narrow contract — serialize, send, wait, deserialize — and the
//! differences (connection reuse, TLS, HTTP framing, multicast) stay
//! local to each submodule.

pub mod doh;
pub mod env;
pub mod mdns;
pub mod plain;
pub mod tcp;

use crate::dns::DnsPacket;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

#[async_trait]
pub trait DnsTransport: Send + Sync {
    async fn query(&self, query: &DnsPacket, deadline: Duration) -> Result<DnsPacket>;

    /// Forces the transport to discard any cached/persistent connection
    /// state and reconnect on the next query.
    async fn force_reconnect(&self) {}
}

pub fn effective_deadline(remaining_ctx_deadline: Option<Duration>) -> Duration {
    match remaining_ctx_deadline {
        Some(d) if d < DEFAULT_QUERY_TIMEOUT => d,
        _ => DEFAULT_QUERY_TIMEOUT,
    }
}

pub(crate) fn timeout_err() -> CoreError {
    CoreError::Timeout
}

pub use doh::DohTransport;
pub use env::EnvTransport;
pub use mdns::MdnsTransport;
pub use plain::PlainTransport;
pub use tcp::TcpTransport;
