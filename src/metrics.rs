//! Prometheus metrics registry for the core. Kept separate from the
//! components it measures (`DnsServer`, `OnlineMonitor`, `DnsResolver`) so
//! none of them need to know `prometheus` exists; they take an
//! `Option<Arc<CoreMetrics>>` and call a narrow recording method.

use crate::dns::ResponseCode;
use crate::online::OnlineStatus;
use prometheus::{
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder, histogram_opts, opts,
};
use std::time::Duration;

pub struct CoreMetrics {
    registry: Registry,

    queries_total: IntCounterVec,
    query_duration: Histogram,
    shield_delays_total: IntCounter,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    online_status: IntGauge,
    attribution_failures: IntCounter,
    resolver_failures: IntCounterVec,
    rate_limited_total: IntCounter,
}

impl CoreMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queries_total = IntCounterVec::new(
            opts!("sentrynet_dns_queries_total", "DNS queries handled, by response code"),
            &["rcode"],
        )?;
        let query_duration = Histogram::with_opts(histogram_opts!(
            "sentrynet_dns_query_duration_seconds",
            "Time from receiving a query to sending its reply"
        ))?;
        let shield_delays_total = IntCounter::with_opts(opts!(
            "sentrynet_shield_delays_total",
            "Queries held back by the failing-queries shield"
        ))?;
        let cache_hits = IntCounter::with_opts(opts!("sentrynet_cache_hits_total", "DNS cache hits"))?;
        let cache_misses = IntCounter::with_opts(opts!("sentrynet_cache_misses_total", "DNS cache misses"))?;
        let online_status = IntGauge::with_opts(opts!(
            "sentrynet_online_status",
            "Current OnlineStatus as its numeric discriminant (0=Unknown..5=Online)"
        ))?;
        let attribution_failures = IntCounter::with_opts(opts!(
            "sentrynet_attribution_failures_total",
            "DNS queries that could not be attributed to a local process"
        ))?;
        let resolver_failures = IntCounterVec::new(
            opts!("sentrynet_resolver_failures_total", "Upstream resolver query failures, by resolver id"),
            &["resolver"],
        )?;
        let rate_limited_total = IntCounter::with_opts(opts!(
            "sentrynet_rate_limited_total",
            "Queries rejected by the listener's rate limiter"
        ))?;

        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;
        registry.register(Box::new(shield_delays_total.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(online_status.clone()))?;
        registry.register(Box::new(attribution_failures.clone()))?;
        registry.register(Box::new(resolver_failures.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;

        Ok(Self {
            registry,
            queries_total,
            query_duration,
            shield_delays_total,
            cache_hits,
            cache_misses,
            online_status,
            attribution_failures,
            resolver_failures,
            rate_limited_total,
        })
    }

    pub fn record_query(&self, rcode: ResponseCode, elapsed: Duration) {
        self.queries_total.with_label_values(&[rcode_label(rcode)]).inc();
        self.query_duration.observe(elapsed.as_secs_f64());
    }

    pub fn record_shield_delay(&self) {
        self.shield_delays_total.inc();
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.inc();
    }

    pub fn set_online_status(&self, status: OnlineStatus) {
        self.online_status.set(status as i64);
    }

    pub fn record_attribution_failure(&self) {
        self.attribution_failures.inc();
    }

    pub fn record_resolver_failure(&self, resolver_id: &str) {
        self.resolver_failures.with_label_values(&[resolver_id]).inc();
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_total.inc();
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Default for CoreMetrics {
    fn default() -> Self {
        Self::new().expect("metric registration is static and cannot fail")
    }
}

fn rcode_label(rcode: ResponseCode) -> &'static str {
    match rcode {
        ResponseCode::NoError => "noerror",
        ResponseCode::FormatError => "formerr",
        ResponseCode::ServerFailure => "servfail",
        ResponseCode::NxDomain => "nxdomain",
        ResponseCode::NotImplemented => "notimp",
        ResponseCode::Refused => "refused",
        ResponseCode::Other(_) => "other",
    }
}
