//! Ties a `ResolverSet`, a per-resolver transport, the cache and the
//! block-detection heuristics together into the one entry point the DNS
//! server calls: "resolve this question".

use crate::cache::{CacheEntry, CacheKey, DnsCache};
use crate::dns::{DnsPacket, DnsResourceClass, DnsResourceType};
use crate::error::{CoreError, Result};
use crate::resolver::config_url::{BlockDetection, ResolverHost, TransportKind};
use crate::resolver::query_pipeline::is_upstream_blocked;
use crate::resolver::transport::{
    effective_deadline, DnsTransport, DohTransport, EnvTransport, MdnsTransport, PlainTransport, TcpTransport,
};
use crate::resolver::transport::tcp::TlsMode;
use crate::resolver::{Resolver, ResolverSet, RouteQuery};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

fn build_transport(resolver: &Resolver, env_state: Arc<crate::resolver::transport::env::EnvState>) -> Arc<dyn DnsTransport> {
    let spec = &resolver.spec;
    match spec.transport {
        TransportKind::Plain | TransportKind::Tcp => {
            let ip = match &spec.host {
                ResolverHost::Ip(ip) => *ip,
                ResolverHost::Domain(_) => spec.ip.unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
            };
            let addr = SocketAddr::new(ip, spec.port);
            if spec.transport == TransportKind::Plain {
                Arc::new(PlainTransport::new(addr))
            } else {
                Arc::new(TcpTransport::new(addr, TlsMode::Plain))
            }
        }
        TransportKind::Dot => {
            let ip = match &spec.host {
                ResolverHost::Ip(ip) => *ip,
                ResolverHost::Domain(_) => spec.ip.unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
            };
            let server_name = spec.verify.clone().unwrap_or_else(|| match &spec.host {
                ResolverHost::Domain(d) => d.clone(),
                ResolverHost::Ip(ip) => ip.to_string(),
            });
            let addr = SocketAddr::new(ip, spec.port);
            Arc::new(TcpTransport::new(addr, TlsMode::Dot { server_name }))
        }
        TransportKind::Doh => {
            let host = match &spec.host {
                ResolverHost::Domain(d) => d.clone(),
                ResolverHost::Ip(ip) => ip.to_string(),
            };
            let path = spec.path.clone().unwrap_or_else(|| "/dns-query".to_string());
            Arc::new(DohTransport::new(format!("https://{host}:{}{path}", spec.port)))
        }
        TransportKind::Mdns => Arc::new(MdnsTransport::new(None)),
        TransportKind::Env => Arc::new(EnvTransport::new(env_state)),
    }
}

pub struct DnsResolver {
    resolvers: Arc<ResolverSet>,
    transports: HashMap<String, Arc<dyn DnsTransport>>,
    cache: Arc<DnsCache>,
    env_state: Arc<crate::resolver::transport::env::EnvState>,
}

impl DnsResolver {
    pub fn new(resolvers: Arc<ResolverSet>, cache: Arc<DnsCache>) -> Self {
        let env_state = Arc::new(crate::resolver::transport::env::EnvState::default());
        let mut transports = HashMap::new();
        for resolver in resolvers.all() {
            let transport = build_transport(&resolver, env_state.clone());
            transports.insert(resolver.id().to_string(), transport);
        }
        Self { resolvers, transports, cache, env_state }
    }

    /// Re-derives the transport table after `ResolverSet::replace_all`.
    pub fn rebuild_transports(&mut self) {
        self.transports.clear();
        for resolver in self.resolvers.all() {
            let transport = build_transport(&resolver, self.env_state.clone());
            self.transports.insert(resolver.id().to_string(), transport);
        }
    }

    pub fn env_state(&self) -> &Arc<crate::resolver::transport::env::EnvState> {
        &self.env_state
    }

    /// Looks up the most recent cached answer for a question, regardless
    /// of freshness. Used for the offline fallback path, which would
    /// rather hand back a stale answer than nothing at all.
    pub async fn cached_answer(&self, fqdn: &str, qtype: DnsResourceType, qclass: DnsResourceClass) -> Option<DnsPacket> {
        let key = CacheKey::new(fqdn, qtype, qclass);
        self.cache.get(&key).await.map(|entry| entry.answer)
    }

    /// Resolves one question, routing across candidate resolvers per the
    /// current policy and trying the next candidate on any `Continue`-style
    /// failure. `offline` controls whether this is treated as a connectivity
    /// probe/degraded lookup for cache TTL purposes.
    ///
    /// A cache hit that `expires_soon()` is still returned immediately, but
    /// also kicks off a single background re-resolve so the entry is fresh
    /// again before it actually expires; `mark_refresh_in_flight` makes sure
    /// only one such task is ever in flight per entry.
    pub async fn resolve(
        self: &Arc<Self>,
        query: &DnsPacket,
        is_internal_special_use: bool,
        is_connectivity_probe: bool,
        offline: bool,
    ) -> Result<DnsPacket> {
        let question = query.questions.first().ok_or_else(|| CoreError::Invalid("empty question section".into()))?;
        let key = CacheKey::new(&question.name, question.qtype, question.qclass);

        if !is_internal_special_use {
            if let Some(entry) = self.cache.get(&key).await {
                let now = Instant::now();
                if !entry.expired(now) {
                    if entry.expires_soon(now) && entry.mark_refresh_in_flight() {
                        self.spawn_background_refresh(query.clone(), key.clone(), is_connectivity_probe, offline, entry.clone());
                    }
                    return Ok(entry.answer);
                }
            }
        }

        self.route_and_query(query, &key, is_internal_special_use, is_connectivity_probe, offline).await
    }

    /// Re-resolves `query` in the background on behalf of an entry that is
    /// still usable but inside its soft-expiry window. Clears the entry's
    /// in-flight flag on failure so a later lookup can retry; a success
    /// replaces the entry outright via `cache.put`, which carries its own
    /// fresh (unset) flag.
    fn spawn_background_refresh(
        self: &Arc<Self>,
        query: DnsPacket,
        key: CacheKey,
        is_connectivity_probe: bool,
        offline: bool,
        stale_entry: CacheEntry,
    ) {
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = resolver.route_and_query(&query, &key, false, is_connectivity_probe, offline).await {
                debug!("background refresh for {key} failed: {}", e);
                stale_entry.clear_refresh_in_flight();
            }
        });
    }

    async fn route_and_query(
        &self,
        query: &DnsPacket,
        key: &CacheKey,
        is_internal_special_use: bool,
        is_connectivity_probe: bool,
        offline: bool,
    ) -> Result<DnsPacket> {
        let question = query.questions.first().ok_or_else(|| CoreError::Invalid("empty question section".into()))?;
        let route = self.resolvers.route(RouteQuery {
            fqdn: &question.name,
            is_internal_special_use,
            is_connectivity_probe,
        });

        if route.resolvers.is_empty() {
            return Err(CoreError::NoCompliance);
        }

        let mut last_err = CoreError::NoCompliance;
        for resolver in &route.resolvers {
            let Some(transport) = self.transports.get(resolver.id()) else { continue };
            let deadline = effective_deadline(None);
            match transport.query(query, deadline).await {
                Ok(answer) => {
                    if is_upstream_blocked(resolver.spec.blocked_if, &answer) {
                        resolver.note_failure(offline);
                        last_err = CoreError::BlockedUpstream { resolver_name: resolver.id().to_string() };
                        if !route.try_all {
                            continue;
                        }
                        continue;
                    }
                    resolver.note_success();
                    if !is_internal_special_use {
                        self.cache.put(key.clone(), answer.clone(), is_connectivity_probe, offline);
                    }
                    return Ok(answer);
                }
                Err(CoreError::Timeout) => {
                    if resolver.note_failure(offline) {
                        warn!("resolver {} crossed failure threshold", resolver.id());
                    }
                    last_err = CoreError::Timeout;
                }
                Err(e) => {
                    debug!("resolver {} query failed: {}", resolver.id(), e);
                    resolver.note_failure(offline);
                    last_err = e;
                }
            }
        }

        self.resolvers.refresh_all_failing_alert();
        Err(last_err)
    }
}

pub fn dns_key(fqdn: &str, qtype: DnsResourceType) -> CacheKey {
    CacheKey::new(fqdn, qtype, DnsResourceClass::IN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryRecordStore;
    use crate::resolver::Policy;

    #[tokio::test]
    async fn empty_resolver_set_yields_no_compliance() {
        let set = Arc::new(ResolverSet::new(Policy::default()));
        let cache = Arc::new(DnsCache::new(Arc::new(InMemoryRecordStore::new())));
        let resolver = Arc::new(DnsResolver::new(set, cache));
        let query = DnsPacket::new_query(1, "example.com.", DnsResourceType::A);
        let result = resolver.resolve(&query, false, false, false).await;
        assert!(matches!(result, Err(CoreError::NoCompliance)));
    }
}
