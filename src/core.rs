//! Composition root: wires every component together. Kept separate from
//! `main.rs` so integration tests and alternate entry points (the compat
//! probe CLI, benches) can construct a working core with mock
//! collaborators instead of touching the real network and `/proc`.

use crate::cache::{DnsCache, InMemoryRecordStore};
use crate::compat_probe::CompatProbe;
use crate::config::CoreConfig;
use crate::dnsserver::{AllowAllPolicy, DnsServer, PolicyHook};
use crate::metrics::CoreMetrics;
use crate::online::{HttpCaptivePortalProbe, NetworkChanged, OnlineMonitor, SysinfoInterfaceSource};
use crate::rate_limiter::DnsRateLimiter;
use crate::resolver::{DnsResolver, Resolver, ResolverSet, Source};
use crate::socket::socket_table::{default_source, SocketTables};
use crate::socket::udp_flow_state::UdpFlowState;
use crate::socket::{FlowLookup, PidIndex, ProcessSource};
use std::net::SocketAddr;
use std::sync::Arc;

/// Everything the core needs at runtime, assembled once at startup.
pub struct Core {
    pub dns_server: Arc<DnsServer>,
    pub dns_resolver: Arc<DnsResolver>,
    pub resolver_set: Arc<ResolverSet>,
    pub flow_lookup: Arc<FlowLookup>,
    pub online_monitor: Arc<OnlineMonitor>,
    pub network_changed: Arc<NetworkChanged>,
    pub compat_probe: Arc<CompatProbe>,
    pub metrics: Arc<CoreMetrics>,
}

pub struct CoreBuilder {
    bind: SocketAddr,
    policy: Arc<dyn PolicyHook>,
    process_source: Option<Arc<dyn ProcessSource>>,
    captive_portal_url: String,
    resolver_urls: Vec<String>,
    routing_policy: crate::resolver::Policy,
    rate_limit: crate::rate_limiter::RateLimitConfig,
    compat_probe_interval: std::time::Duration,
}

impl Default for CoreBuilder {
    fn default() -> Self {
        let defaults = CoreConfig::default();
        Self {
            bind: defaults.bind_addr,
            policy: Arc::new(AllowAllPolicy),
            process_source: None,
            captive_portal_url: defaults.captive_portal_url,
            resolver_urls: defaults.resolver_urls,
            routing_policy: defaults.policy,
            rate_limit: defaults.rate_limit,
            compat_probe_interval: defaults.compat_probe_interval,
        }
    }
}

impl CoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds every builder field from a validated `CoreConfig`, leaving
    /// `with_policy`/`with_process_source` as the only post-hoc overrides
    /// (those have no config-file representation).
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            bind: config.bind_addr,
            policy: Arc::new(AllowAllPolicy),
            process_source: None,
            captive_portal_url: config.captive_portal_url.clone(),
            resolver_urls: config.resolver_urls.clone(),
            routing_policy: config.policy.clone(),
            rate_limit: config.rate_limit.clone(),
            compat_probe_interval: config.compat_probe_interval,
        }
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn PolicyHook>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_process_source(mut self, source: Arc<dyn ProcessSource>) -> Self {
        self.process_source = Some(source);
        self
    }

    pub fn build(self) -> Core {
        let resolver_set = Arc::new(ResolverSet::new(self.routing_policy));
        for url in &self.resolver_urls {
            match crate::resolver::config_url::parse(url) {
                Ok(spec) => resolver_set.add(Arc::new(Resolver::new(spec, Source::Configured))),
                Err(e) => tracing::warn!("dropping unparseable resolver url {url}: {e}"),
            }
        }
        let env_spec = crate::resolver::config_url::parse("env://local/")
            .expect("the built-in env:// resolver url is a fixed, always-valid literal");
        resolver_set.add(Arc::new(Resolver::new(env_spec, Source::Env)));

        let cache = Arc::new(DnsCache::new(Arc::new(InMemoryRecordStore::new())));
        let dns_resolver = Arc::new(DnsResolver::new(resolver_set.clone(), cache));

        let process_source = self
            .process_source
            .unwrap_or_else(|| Arc::new(crate::socket::pid_index::ProcFdSource::new()));
        let tables = Arc::new(SocketTables::new(default_source()));
        let pid_index = Arc::new(PidIndex::new(process_source));
        let udp_state = Arc::new(UdpFlowState::new());
        let flow_lookup = Arc::new(FlowLookup::new(tables, pid_index, udp_state));

        let metrics = Arc::new(CoreMetrics::default());
        let rate_limiter = Arc::new(DnsRateLimiter::new(self.rate_limit).with_metrics(metrics.clone()));

        let dns_server = Arc::new(
            DnsServer::new(dns_resolver.clone(), flow_lookup.clone(), self.policy)
                .with_bind(self.bind)
                .with_rate_limiter(rate_limiter)
                .with_metrics(metrics.clone()),
        );

        let env_fqdn = format!("connectivity{}", crate::resolver::transport::env::SELF_CHECK_SUFFIX);
        let dns_probe = Arc::new(DnsResolverReachabilityProbe { resolver: dns_resolver.clone(), fqdn: env_fqdn });
        let online_monitor = Arc::new(OnlineMonitor::new(
            Arc::new(HttpCaptivePortalProbe::new(self.captive_portal_url)),
            dns_probe,
        ));
        let network_changed = Arc::new(NetworkChanged::new(Box::new(SysinfoInterfaceSource)));
        let compat_probe = Arc::new(CompatProbe::new(dns_resolver.clone()).with_interval(self.compat_probe_interval));

        Core {
            dns_server,
            dns_resolver,
            resolver_set,
            flow_lookup,
            online_monitor,
            network_changed,
            compat_probe,
            metrics,
        }
    }
}

struct DnsResolverReachabilityProbe {
    resolver: Arc<DnsResolver>,
    fqdn: String,
}

#[async_trait::async_trait]
impl crate::online::DnsReachabilityProbe for DnsResolverReachabilityProbe {
    async fn probe(&self) -> bool {
        let query = crate::dns::DnsPacket::new_query(1, &self.fqdn, crate::dns::DnsResourceType::A);
        self.resolver.resolve(&query, true, true, false).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_assembles_every_component() {
        let core = CoreBuilder::new().build();
        assert_eq!(core.online_monitor.status(), crate::online::OnlineStatus::Unknown);
        assert!(Arc::strong_count(&core.dns_resolver) >= 2);
    }
}
