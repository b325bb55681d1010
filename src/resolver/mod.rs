//! Upstream resolver selection: scope-based routing over four resolver
//! categories (configured, system, LAN-local, mdns/env), per-resolver
//! failure bookkeeping, and a background sweeper that re-probes resolvers
//! that have tripped their failure threshold.

pub mod config_url;
pub mod dns_resolver;
pub mod query_pipeline;
pub mod transport;

pub use dns_resolver::DnsResolver;

pub use config_url::{BlockDetection, ResolverHost, ResolverSpec, TransportKind};

use crate::socket::address::{classify_scope, AddressScope};
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Configured,
    System,
    Mdns,
    Env,
}

#[derive(Default)]
struct FailureState {
    fails: u32,
    first_fail_at: Option<Instant>,
    last_fail_at: Option<Instant>,
}

pub struct Resolver {
    pub spec: ResolverSpec,
    pub source: Source,
    failing: AtomicBool,
    fails: Mutex<FailureState>,
    id: String,
}

const FAIL_THRESHOLD: u32 = 5;
const FAIL_WINDOW: Duration = Duration::from_secs(FAIL_THRESHOLD as u64 * 10);

impl Resolver {
    pub fn new(spec: ResolverSpec, source: Source) -> Self {
        let id = match &spec.host {
            ResolverHost::Ip(ip) => ip.to_string(),
            ResolverHost::Domain(d) => d.clone(),
        };
        Self {
            spec,
            source,
            failing: AtomicBool::new(false),
            fails: Mutex::new(FailureState::default()),
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::Acquire)
    }

    pub fn scope(&self) -> Option<AddressScope> {
        match &self.spec.host {
            ResolverHost::Ip(ip) => Some(classify_scope(*ip)),
            ResolverHost::Domain(_) => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.scope(), Some(AddressScope::SiteLocal) | Some(AddressScope::LinkLocal))
    }

    pub fn is_insecure_transport(&self) -> bool {
        matches!(self.spec.transport, TransportKind::Plain | TransportKind::Tcp)
    }

    /// Identifies this resolver by the domain name it was configured with,
    /// to let callers avoid bootstrapping loops (looking up a DoH/DoT
    /// resolver's own hostname through itself).
    pub fn identifying_domain(&self) -> Option<&str> {
        match &self.spec.host {
            ResolverHost::Domain(d) => Some(d.as_str()),
            ResolverHost::Ip(_) => None,
        }
    }

    pub fn note_success(&self) {
        self.failing.store(false, Ordering::Release);
        let mut state = self.fails.lock();
        *state = FailureState::default();
    }

    /// Records a failure unless `offline` is set (failures while the
    /// device itself is offline don't indict the resolver). Returns
    /// `true` if this call crossed the resolver into `failing`.
    pub fn note_failure(&self, offline: bool) -> bool {
        if offline {
            return false;
        }
        let now = Instant::now();
        let mut state = self.fails.lock();
        if let Some(first) = state.first_fail_at {
            if now.duration_since(first) > FAIL_WINDOW {
                *state = FailureState::default();
            }
        }
        if state.first_fail_at.is_none() {
            state.first_fail_at = Some(now);
        }
        state.last_fail_at = Some(now);
        state.fails += 1;
        if state.fails >= FAIL_THRESHOLD && !self.failing.swap(true, Ordering::AcqRel) {
            warn!("resolver {} crossed failure threshold, marking failing", self.id);
            return true;
        }
        false
    }

    pub fn clear_failing_on_probe_success(&self) {
        if self.failing.swap(false, Ordering::AcqRel) {
            info!("resolver {} recovered on re-probe", self.id);
        }
        *self.fails.lock() = FailureState::default();
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RouteQuery<'a> {
    pub fqdn: &'a str,
    pub is_internal_special_use: bool,
    pub is_connectivity_probe: bool,
}

#[derive(Default, Debug, Clone)]
pub struct Policy {
    pub insecure_protocols_forbidden: bool,
    pub system_nameservers_forbidden: bool,
    pub mdns_forbidden: bool,
}

pub struct RouteResult {
    pub resolvers: Vec<Arc<Resolver>>,
    pub try_all: bool,
}

pub struct ResolverSet {
    resolvers: parking_lot::RwLock<Vec<Arc<Resolver>>>,
    policy: parking_lot::RwLock<Policy>,
    online: AtomicBool,
    all_failing_alert_active: AtomicBool,
}

/// `.local.` (mDNS) and the link-local reverse zones: `169.254.in-addr.arpa.`
/// for IPv4 link-local, and the `ip6.arpa.` nibble zone for `fe80::/10`.
fn is_multicast_zone(fqdn: &str) -> bool {
    if fqdn.ends_with(".local.") {
        return true;
    }
    if fqdn.ends_with(".254.169.in-addr.arpa.") {
        return true;
    }
    // fe80::/10 reversed-nibble zones all share this prefix: the top 12
    // bits of fe80 are fixed, leaving the 5th nibble as 8-b.
    const FE80_NIBBLE_ZONES: &[&str] = &[".8.e.f.ip6.arpa.", ".9.e.f.ip6.arpa.", ".a.e.f.ip6.arpa.", ".b.e.f.ip6.arpa."];
    FE80_NIBBLE_ZONES.iter().any(|z| fqdn.ends_with(z))
}

fn is_special_use_zone(fqdn: &str) -> bool {
    const ZONES: &[&str] = &[".home.arpa.", ".onion.", ".localhost.", ".local.", ".intranet.", ".internal."];
    ZONES.iter().any(|z| fqdn.ends_with(z))
}

impl ResolverSet {
    pub fn new(policy: Policy) -> Self {
        Self {
            resolvers: parking_lot::RwLock::new(Vec::new()),
            policy: parking_lot::RwLock::new(policy),
            online: AtomicBool::new(true),
            all_failing_alert_active: AtomicBool::new(false),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn replace_all(&self, resolvers: Vec<Arc<Resolver>>) {
        *self.resolvers.write() = resolvers;
    }

    pub fn add(&self, resolver: Arc<Resolver>) {
        self.resolvers.write().push(resolver);
    }

    fn by_source(&self, source: Source) -> Vec<Arc<Resolver>> {
        self.resolvers.read().iter().filter(|r| r.source == source).cloned().collect()
    }

    fn local_resolvers(&self) -> Vec<Arc<Resolver>> {
        self.resolvers.read().iter().filter(|r| r.is_local()).cloned().collect()
    }

    fn searching_for(&self, fqdn: &str) -> Vec<Arc<Resolver>> {
        self.resolvers
            .read()
            .iter()
            .filter(|r| r.spec.search_scopes.iter().any(|scope| fqdn.ends_with(scope.as_str())))
            .cloned()
            .collect()
    }

    /// Routes `query` to the candidate resolver list, per the six-step
    /// scope-routing ladder, then applies the standing filters (failing
    /// state, forbidden-protocol/source policy, link-local availability,
    /// search-only scoping, and the anti-bootstrapping-loop self-reference
    /// check).
    pub fn route(&self, query: RouteQuery<'_>) -> RouteResult {
        let (mut candidates, try_all) = if query.is_internal_special_use {
            (self.by_source(Source::Env), false)
        } else if query.is_connectivity_probe {
            let mut v = self.by_source(Source::System);
            v.extend(self.local_resolvers());
            v.extend(self.by_source(Source::Configured));
            (v, false)
        } else {
            let searching = self.searching_for(query.fqdn);
            if !searching.is_empty() {
                (searching, false)
            } else if is_multicast_zone(query.fqdn) {
                let mut v = self.by_source(Source::Mdns);
                v.extend(self.local_resolvers());
                v.extend(self.by_source(Source::System));
                (v, true)
            } else if is_special_use_zone(query.fqdn) {
                (self.local_resolvers(), true)
            } else {
                (self.by_source(Source::Configured), false)
            }
        };

        candidates.retain(|r| self.passes_filters(r, query.fqdn));
        let mut seen: Vec<*const Resolver> = Vec::with_capacity(candidates.len());
        candidates.retain(|r| {
            let ptr = Arc::as_ptr(r);
            if seen.contains(&ptr) {
                false
            } else {
                seen.push(ptr);
                true
            }
        });

        RouteResult {
            resolvers: candidates,
            try_all,
        }
    }

    fn passes_filters(&self, resolver: &Resolver, fqdn: &str) -> bool {
        if resolver.is_failing() {
            return false;
        }
        if resolver.spec.link_local && !self.online.load(Ordering::Acquire) {
            return false;
        }
        let policy = self.policy.read();
        if policy.insecure_protocols_forbidden && resolver.is_insecure_transport() {
            return false;
        }
        if policy.system_nameservers_forbidden && resolver.source == Source::System {
            return false;
        }
        if policy.mdns_forbidden && resolver.source == Source::Mdns {
            return false;
        }
        drop(policy);
        if resolver.spec.search_only && !resolver.spec.search_scopes.iter().any(|s| fqdn.ends_with(s.as_str())) {
            return false;
        }
        if let Some(domain) = resolver.identifying_domain() {
            if crate::dns::normalize_fqdn(domain) == fqdn {
                return false;
            }
        }
        true
    }

    /// Records the outcome of a query against `resolver`; emits/clears
    /// the all-resolvers-failing alert as resolvers cross or recover from
    /// their failure threshold.
    pub fn record_outcome(&self, resolver: &Resolver, success: bool) {
        if success {
            resolver.note_success();
        } else {
            resolver.note_failure(!self.online.load(Ordering::Acquire));
        }
        self.refresh_all_failing_alert();
    }

    fn refresh_all_failing_alert(&self) {
        let configured = self.by_source(Source::Configured);
        if configured.is_empty() {
            return;
        }
        let all_failing = configured.iter().all(|r| r.is_failing());
        let online = self.online.load(Ordering::Acquire);
        if all_failing && online {
            if !self.all_failing_alert_active.swap(true, Ordering::AcqRel) {
                warn!("all configured resolvers are failing while online");
            }
        } else if self.all_failing_alert_active.swap(false, Ordering::AcqRel) {
            info!("at least one configured resolver has recovered");
        }
    }

    pub fn failing_resolvers(&self) -> Vec<Arc<Resolver>> {
        self.resolvers.read().iter().filter(|r| r.is_failing()).cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<Resolver>> {
        self.resolvers.read().clone()
    }
}

/// Periodically re-probes every currently-failing resolver with the
/// synthetic probe domain; a successful probe clears `failing`.
pub async fn run_failure_sweeper<F, Fut>(set: Arc<ResolverSet>, retry_rate: Duration, probe: F)
where
    F: Fn(Arc<Resolver>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = bool> + Send,
{
    let mut ticker = tokio::time::interval(retry_rate);
    loop {
        ticker.tick().await;
        for resolver in set.failing_resolvers() {
            if probe(resolver.clone()).await {
                resolver.clear_failing_on_probe_success();
                set.refresh_all_failing_alert();
            }
        }
    }
}
