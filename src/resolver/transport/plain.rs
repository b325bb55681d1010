//! One UDP exchange per query, buffer size 1024: a fresh ephemeral socket
//! per query, `connect()`-ed to the upstream so the OS filters unrelated
//! replies.

use crate::dns::DnsPacket;
use crate::error::{CoreError, Result};
use crate::resolver::transport::DnsTransport;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

const BUFFER_SIZE: usize = 1024;

pub struct PlainTransport {
    upstream: SocketAddr,
}

impl PlainTransport {
    pub fn new(upstream: SocketAddr) -> Self {
        Self { upstream }
    }
}

#[async_trait]
impl DnsTransport for PlainTransport {
    async fn query(&self, query: &DnsPacket, deadline: Duration) -> Result<DnsPacket> {
        let bind_addr: SocketAddr = if self.upstream.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| CoreError::Io(e.to_string()))?;
        socket.connect(self.upstream).await.map_err(|e| CoreError::Io(e.to_string()))?;

        let bytes = query.serialize().map_err(|e| CoreError::Failure(e.to_string()))?;
        socket.send(&bytes).await.map_err(|e| CoreError::Io(e.to_string()))?;

        let mut buf = [0u8; BUFFER_SIZE];
        let n = match tokio::time::timeout(deadline, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("plain udp transport error to {}: {}", self.upstream, e);
                return Err(CoreError::Failure(e.to_string()));
            }
            Err(_) => return Err(CoreError::Timeout),
        };

        DnsPacket::parse(&buf[..n]).map_err(|e| CoreError::Failure(e.to_string()))
    }
}
