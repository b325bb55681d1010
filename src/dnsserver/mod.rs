//! The UDP-facing DNS listener: validates incoming queries, attributes
//! them to a process, applies the failing-queries shield and offline
//! handling, and otherwise hands them to `DnsResolver`.

pub mod ipinfo;
pub mod policy;

pub use ipinfo::IpInfo;
pub use policy::{AllowAllPolicy, PolicyHook, PostResolveVerdict, PreResolveVerdict};

use crate::dns::{DnsPacket, DnsResourceClass, DnsResourceType, ResponseCode};
use crate::error::{CoreError, Result};
use crate::metrics::CoreMetrics;
use crate::rate_limiter::DnsRateLimiter;
use crate::resolver::transport::env::{CAPTIVE_PORTAL_ZONE, ROUTER_ZONE, SELF_CHECK_SUFFIX};
use crate::resolver::DnsResolver;
use crate::socket::{Direction, FlowLookup, PacketInfo, Protocol};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

const SHIELD_MIN_DELAY: Duration = Duration::from_millis(900);
const SHIELD_MAX_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_BIND: &str = "127.0.0.1:53";
const UDP_BUFFER_SIZE: usize = 1500;

fn is_internal_special_use(fqdn: &str) -> bool {
    fqdn.ends_with(SELF_CHECK_SUFFIX) || fqdn == ROUTER_ZONE || fqdn == CAPTIVE_PORTAL_ZONE
}

fn is_localhost_zone(fqdn: &str) -> bool {
    fqdn == "localhost." || fqdn.ends_with(".localhost.")
}

#[derive(Default)]
struct ShieldState {
    last_failure: Option<Instant>,
    consecutive_failures: u32,
}

/// Delays re-querying a recently-failing `(fqdn, qtype)` pair so a client
/// retrying aggressively doesn't turn one failure into a flood of them.
#[derive(Default)]
struct FailingQueriesShield {
    state: DashMap<(String, DnsResourceType), ShieldState>,
}

impl FailingQueriesShield {
    fn delay_for(&self, fqdn: &str, qtype: DnsResourceType) -> Duration {
        let Some(entry) = self.state.get(&(fqdn.to_string(), qtype)) else { return Duration::ZERO };
        let Some(last_failure) = entry.last_failure else { return Duration::ZERO };
        let elapsed = last_failure.elapsed();
        let backoff = (SHIELD_MIN_DELAY * entry.consecutive_failures.min(8)).min(SHIELD_MAX_DELAY);
        backoff.saturating_sub(elapsed)
    }

    fn record_failure(&self, fqdn: &str, qtype: DnsResourceType) {
        let mut entry = self.state.entry((fqdn.to_string(), qtype)).or_default();
        entry.last_failure = Some(Instant::now());
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
    }

    fn record_success(&self, fqdn: &str, qtype: DnsResourceType) {
        self.state.remove(&(fqdn.to_string(), qtype));
    }
}

pub struct DnsServer {
    bind: SocketAddr,
    resolver: Arc<DnsResolver>,
    flow_lookup: Arc<FlowLookup>,
    policy: Arc<dyn PolicyHook>,
    shield: FailingQueriesShield,
    online: AtomicBool,
    rate_limiter: Option<Arc<DnsRateLimiter>>,
    metrics: Option<Arc<CoreMetrics>>,
}

impl DnsServer {
    pub fn new(resolver: Arc<DnsResolver>, flow_lookup: Arc<FlowLookup>, policy: Arc<dyn PolicyHook>) -> Self {
        Self {
            bind: DEFAULT_BIND.parse().unwrap(),
            resolver,
            flow_lookup,
            policy,
            shield: FailingQueriesShield::default(),
            online: AtomicBool::new(true),
            rate_limiter: None,
            metrics: None,
        }
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<DnsRateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<CoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    pub async fn run(&self) -> Result<()> {
        let socket = UdpSocket::bind(self.bind).await.map_err(|e| CoreError::Io(e.to_string()))?;
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        loop {
            let (n, peer) = socket.recv_from(&mut buf).await.map_err(|e| CoreError::Io(e.to_string()))?;
            let response = self.handle_datagram(&buf[..n], peer).await;
            if let Some(response) = response {
                if let Err(e) = socket.send_to(&response, peer).await {
                    warn!("dns server failed to reply to {}: {}", peer, e);
                }
            }
        }
    }

    /// Builds the reply bytes for one inbound datagram, or `None` if the
    /// packet was unparseable and no reply can even be framed.
    pub async fn handle_datagram(&self, bytes: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
        let query = match DnsPacket::parse(bytes) {
            Ok(q) => q,
            Err(e) => {
                debug!("dropping malformed dns datagram from {}: {}", peer, e);
                return None;
            }
        };

        let response = self.handle_query(&query, peer).await;
        response.serialize().ok()
    }

    async fn handle_query(&self, query: &DnsPacket, peer: SocketAddr) -> DnsPacket {
        let started = Instant::now();
        let response = self.handle_query_inner(query, peer).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_query(response.rcode(), started.elapsed());
        }
        response
    }

    async fn handle_query_inner(&self, query: &DnsPacket, peer: SocketAddr) -> DnsPacket {
        let mut response = DnsPacket::response_shell(query);

        if let Some(limiter) = &self.rate_limiter {
            if !limiter.check_query_allowed(peer.ip()) {
                response.set_rcode(ResponseCode::Refused);
                return response;
            }
        }

        if query.questions.len() != 1 {
            response.set_rcode(ResponseCode::Refused);
            return response;
        }
        let question = &query.questions[0];
        if question.qclass != DnsResourceClass::IN {
            response.set_rcode(ResponseCode::Refused);
            return response;
        }
        if question.name.is_empty() || question.name.len() > 255 {
            response.set_rcode(ResponseCode::FormatError);
            return response;
        }

        if is_localhost_zone(&question.name) {
            match question.qtype {
                DnsResourceType::A => {
                    response.answers.push(crate::dns::DnsRecord::a(&question.name, 60, "127.0.0.1".parse().unwrap()));
                }
                DnsResourceType::AAAA => {
                    response.answers.push(crate::dns::DnsRecord::aaaa(&question.name, 60, "::1".parse().unwrap()));
                }
                _ => {}
            }
            return response;
        }

        let internal = is_internal_special_use(&question.name);
        let is_probe = question.name.ends_with(SELF_CHECK_SUFFIX);

        match self.policy.pre_resolve(&question.name, peer.ip()) {
            PreResolveVerdict::Block => {
                response.set_rcode(ResponseCode::Refused);
                return response;
            }
            PreResolveVerdict::Synthesize(answer) => return *answer,
            PreResolveVerdict::Allow => {}
        }

        let shield_delay = self.shield.delay_for(&question.name, question.qtype);
        if !shield_delay.is_zero() {
            if let Some(metrics) = &self.metrics {
                metrics.record_shield_delay();
            }
            tokio::time::sleep(shield_delay).await;
        }

        let offline = !self.online.load(Ordering::Relaxed);
        if offline && !internal && !is_probe {
            if let Some(cached) = self.resolver.cached_answer(&question.name, question.qtype, question.qclass).await {
                let mut reply = cached;
                reply.header.id = query.header.id;
                return reply;
            }
            response.set_rcode(ResponseCode::ServerFailure);
            return response;
        }

        let _attribution = self.attribute_client(peer).await;

        match self.resolver.resolve(query, internal, is_probe, offline).await {
            Ok(mut answer) => {
                self.shield.record_success(&question.name, question.qtype);
                answer.header.id = query.header.id;
                match self.policy.post_resolve(&question.name, peer.ip(), &answer) {
                    PostResolveVerdict::Allow => answer,
                    PostResolveVerdict::Block => {
                        let mut blocked = DnsPacket::response_shell(query);
                        blocked.set_rcode(ResponseCode::Refused);
                        blocked
                    }
                }
            }
            Err(e) => {
                debug!("resolve failed for {}: {}", question.name, e);
                self.shield.record_failure(&question.name, question.qtype);
                response.set_rcode(ResponseCode::ServerFailure);
                response
            }
        }
    }

    async fn attribute_client(&self, peer: SocketAddr) -> Option<i64> {
        let local = crate::socket::Address::new(self.bind.ip(), self.bind.port());
        let remote = crate::socket::Address::new(peer.ip(), peer.port());
        let pkt = PacketInfo {
            direction: Direction::Inbound,
            protocol: Protocol::Udp,
            family: family_of(peer.ip()),
            local,
            remote,
        };
        match self.flow_lookup.lookup(pkt, true).await {
            Ok(result) => Some(result.pid),
            Err(_) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_attribution_failure();
                }
                None
            }
        }
    }
}

fn family_of(ip: IpAddr) -> crate::socket::Family {
    match ip {
        IpAddr::V4(_) => crate::socket::Family::V4,
        IpAddr::V6(_) => crate::socket::Family::V6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DnsCache, InMemoryRecordStore};
    use crate::resolver::{Policy, ResolverSet};
    use crate::socket::{PidIndex, ProcessSource};
    use crate::socket::socket_table::{EmptySource, SocketTables};
    use crate::socket::udp_flow_state::UdpFlowState;

    struct EmptyProcSource;
    impl ProcessSource for EmptyProcSource {
        fn live_pids(&self) -> Vec<i64> {
            vec![]
        }
        fn uid_of(&self, _pid: i64) -> Option<u32> {
            None
        }
        fn socket_inodes_of(&self, _pid: i64) -> Vec<u64> {
            vec![]
        }
    }

    fn make_server() -> DnsServer {
        let set = Arc::new(ResolverSet::new(Policy::default()));
        let cache = Arc::new(DnsCache::new(Arc::new(InMemoryRecordStore::new())));
        let resolver = Arc::new(DnsResolver::new(set, cache));
        let tables = Arc::new(SocketTables::new(Arc::new(EmptySource)));
        let pid_index = Arc::new(PidIndex::new(Arc::new(EmptyProcSource)));
        let udp_state = Arc::new(UdpFlowState::new());
        let flow_lookup = Arc::new(FlowLookup::new(tables, pid_index, udp_state));
        DnsServer::new(resolver, flow_lookup, Arc::new(AllowAllPolicy))
    }

    #[tokio::test]
    async fn multi_question_query_is_refused() {
        let server = make_server();
        let mut query = DnsPacket::new_query(1, "example.com.", DnsResourceType::A);
        query.questions.push(query.questions[0].clone());
        let response = server.handle_query(&query, "127.0.0.1:9999".parse().unwrap()).await;
        assert_eq!(response.rcode(), ResponseCode::Refused);
    }

    #[tokio::test]
    async fn localhost_zone_short_circuits() {
        let server = make_server();
        let query = DnsPacket::new_query(1, "localhost.", DnsResourceType::A);
        let response = server.handle_query(&query, "127.0.0.1:9999".parse().unwrap()).await;
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].data, crate::dns::RecordData::A("127.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn offline_non_probe_query_gets_servfail() {
        let server = make_server();
        server.set_online(false);
        let query = DnsPacket::new_query(1, "example.com.", DnsResourceType::A);
        let response = server.handle_query(&query, "127.0.0.1:9999".parse().unwrap()).await;
        assert_eq!(response.rcode(), ResponseCode::ServerFailure);
    }

    #[tokio::test]
    async fn no_resolvers_configured_yields_servfail() {
        let server = make_server();
        let query = DnsPacket::new_query(1, "example.com.", DnsResourceType::A);
        let response = server.handle_query(&query, "127.0.0.1:9999".parse().unwrap()).await;
        assert_eq!(response.rcode(), ResponseCode::ServerFailure);
    }

    #[test]
    fn shield_delays_grow_then_clear_on_success() {
        let shield = FailingQueriesShield::default();
        assert_eq!(shield.delay_for("example.com.", DnsResourceType::A), Duration::ZERO);
        shield.record_failure("example.com.", DnsResourceType::A);
        assert!(shield.delay_for("example.com.", DnsResourceType::A) > Duration::ZERO);
        shield.record_success("example.com.", DnsResourceType::A);
        assert_eq!(shield.delay_for("example.com.", DnsResourceType::A), Duration::ZERO);
    }
}
