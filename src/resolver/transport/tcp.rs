//! Persistent, multiplexed TCP (and DoT) transport. A single connection
//! carries many in-flight queries, matched to replies by the DNS
//! transaction id; a background reader task owns the socket's read half
//! and fans replies out to whichever query is waiting on that id.

use crate::dns::DnsPacket;
use crate::error::{CoreError, Result};
use crate::resolver::transport::DnsTransport;
use async_trait::async_trait;
use dashmap::DashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Connections are torn down and rebuilt after this much idle lifetime,
/// regardless of errors, to bound how long a single upstream can hold a
/// stale keepalive open.
const DEFAULT_CLIENT_TTL: Duration = Duration::from_secs(5 * 60);

trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexStream for T {}

struct Connection {
    write_half: AsyncMutex<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>,
    pending: Arc<DashMap<u16, oneshot::Sender<DnsPacket>>>,
    created_at: Instant,
    reader_task: tokio::task::JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

pub enum TlsMode {
    Plain,
    Dot { server_name: String },
}

pub struct TcpTransport {
    upstream: SocketAddr,
    tls: TlsMode,
    conn: AsyncMutex<Option<Connection>>,
    next_id_hint: AtomicU16,
}

impl TcpTransport {
    pub fn new(upstream: SocketAddr, tls: TlsMode) -> Self {
        Self {
            upstream,
            tls,
            conn: AsyncMutex::new(None),
            next_id_hint: AtomicU16::new(rand::random()),
        }
    }

    fn tls_connector(server_name: &str) -> Result<(TlsConnector, ServerName<'static>)> {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let mut config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"dot".to_vec()];
        let name = ServerName::try_from(server_name.to_string()).map_err(|_| {
            CoreError::Config(crate::error::ConfigError::ParseError(format!(
                "invalid dot server name: {server_name}"
            )))
        })?;
        Ok((TlsConnector::from(Arc::new(config)), name))
    }

    async fn dial(&self) -> Result<Connection> {
        let tcp = TcpStream::connect(self.upstream).await.map_err(|e| CoreError::Io(e.to_string()))?;
        tcp.set_nodelay(true).ok();

        let (read_half, write_half): (Box<dyn AsyncRead + Send + Unpin>, Box<dyn AsyncWrite + Send + Unpin>) =
            match &self.tls {
                TlsMode::Plain => {
                    let (r, w) = tokio::io::split(tcp);
                    (Box::new(r), Box::new(w))
                }
                TlsMode::Dot { server_name } => {
                    let (connector, name) = Self::tls_connector(server_name)?;
                    let stream = connector
                        .connect(name, tcp)
                        .await
                        .map_err(|e| CoreError::Io(e.to_string()))?;
                    let (r, w) = tokio::io::split(stream);
                    (Box::new(r), Box::new(w))
                }
            };

        let pending: Arc<DashMap<u16, oneshot::Sender<DnsPacket>>> = Arc::new(DashMap::new());
        let reader_pending = pending.clone();
        let reader_task = tokio::spawn(async move {
            if let Err(e) = read_loop(read_half, reader_pending.clone()).await {
                debug!("tcp transport reader exiting: {}", e);
            }
            // dropping the remaining senders wakes any query still waiting
            // on a reply that will now never arrive.
            reader_pending.clear();
        });

        Ok(Connection {
            write_half: AsyncMutex::new(write_half),
            pending,
            created_at: Instant::now(),
            reader_task,
        })
    }

    async fn ensure_connection<'a>(&'a self, guard: &mut tokio::sync::MutexGuard<'a, Option<Connection>>) -> Result<()> {
        let needs_new = match guard.as_ref() {
            None => true,
            Some(c) => c.created_at.elapsed() >= DEFAULT_CLIENT_TTL,
        };
        if needs_new {
            **guard = Some(self.dial().await?);
        }
        Ok(())
    }

    fn next_id(&self, pending: &DashMap<u16, oneshot::Sender<DnsPacket>>) -> u16 {
        let start = self.next_id_hint.fetch_add(1, Ordering::Relaxed);
        let mut id = start;
        loop {
            if !pending.contains_key(&id) {
                return id;
            }
            id = id.wrapping_add(1);
            if id == start {
                // table is saturated (65536 in-flight queries); caller will
                // simply overwrite the oldest entry.
                return id;
            }
        }
    }
}

async fn read_loop(
    mut read_half: Box<dyn AsyncRead + Send + Unpin>,
    pending: Arc<DashMap<u16, oneshot::Sender<DnsPacket>>>,
) -> io::Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        read_half.read_exact(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut msg = vec![0u8; len];
        read_half.read_exact(&mut msg).await?;

        let packet = match DnsPacket::parse(&msg) {
            Ok(p) => p,
            Err(e) => {
                warn!("tcp transport: malformed reply discarded: {}", e);
                continue;
            }
        };
        if let Some((_, tx)) = pending.remove(&packet.header.id) {
            let _ = tx.send(packet);
        }
    }
}

#[async_trait]
impl DnsTransport for TcpTransport {
    async fn query(&self, query: &DnsPacket, deadline: Duration) -> Result<DnsPacket> {
        let mut guard = self.conn.lock().await;
        self.ensure_connection(&mut guard).await?;

        let conn = guard.as_ref().expect("connection established above");
        let id = self.next_id(&conn.pending);
        let mut framed_query = query.clone();
        framed_query.header.id = id;

        let bytes = framed_query.serialize().map_err(|e| CoreError::Failure(e.to_string()))?;
        let mut framed = Vec::with_capacity(bytes.len() + 2);
        framed.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        framed.extend_from_slice(&bytes);

        let (tx, rx) = oneshot::channel();
        conn.pending.insert(id, tx);

        let write_result = {
            let mut w = conn.write_half.lock().await;
            w.write_all(&framed).await
        };
        if let Err(e) = write_result {
            conn.pending.remove(&id);
            *guard = None;
            return Err(CoreError::Io(e.to_string()));
        }

        drop(guard);

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(packet)) => Ok(packet),
            Ok(Err(_)) => Err(CoreError::Failure("tcp transport reader dropped".into())),
            Err(_) => Err(CoreError::Timeout),
        }
    }

    async fn force_reconnect(&self) {
        let mut guard = self.conn.lock().await;
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsRecord, DnsResourceType};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn plain_tcp_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut len_buf = [0u8; 2];
            sock.read_exact(&mut len_buf).await.unwrap();
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut msg = vec![0u8; len];
            sock.read_exact(&mut msg).await.unwrap();
            let query = DnsPacket::parse(&msg).unwrap();
            let mut resp = DnsPacket::response_shell(&query);
            resp.answers.push(DnsRecord::a("example.com.", 60, "93.184.216.34".parse().unwrap()));
            let bytes = resp.serialize().unwrap();
            sock.write_all(&(bytes.len() as u16).to_be_bytes()).await.unwrap();
            sock.write_all(&bytes).await.unwrap();
        });

        let transport = TcpTransport::new(addr, TlsMode::Plain);
        let query = DnsPacket::new_query(1, "example.com.", DnsResourceType::A);
        let answer = transport.query(&query, Duration::from_secs(2)).await.unwrap();
        assert_eq!(answer.answers.len(), 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn force_reconnect_drops_cached_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });
        let transport = TcpTransport::new(addr, TlsMode::Plain);
        {
            let mut guard = transport.conn.lock().await;
            transport.ensure_connection(&mut guard).await.unwrap();
            assert!(guard.is_some());
        }
        transport.force_reconnect().await;
        let guard = transport.conn.lock().await;
        assert!(guard.is_none());
    }
}
