//! Runtime configuration surface: everything that can be set on the
//! command line, via environment variables, or in a TOML file, plus the
//! validation that turns a `CoreConfig` into something safe to build a
//! `Core` from.

use crate::error::ConfigError;
use crate::rate_limiter::RateLimitConfig;
use crate::resolver::Policy;
use std::net::SocketAddr;
use std::time::Duration;

/// Everything `main` needs to assemble a `Core`. Fields mirror
/// `CoreBuilder`'s surface plus the ambient knobs (logging, metrics,
/// rate limiting) a builder has no opinion about.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Address the DNS server listens on.
    pub bind_addr: SocketAddr,

    /// Address the HTTP metrics/health server listens on, if enabled.
    pub http_bind_addr: Option<SocketAddr>,

    /// `scheme://host[:port]...` resolver URLs, parsed by
    /// `resolver::config_url::parse`.
    pub resolver_urls: Vec<String>,

    /// URL probed by the captive-portal HTTP check.
    pub captive_portal_url: String,

    /// Interval between compat-probe self-check cycles.
    pub compat_probe_interval: Duration,

    /// `trace`/`debug`/`info`/`warn`/`error`, passed straight to
    /// `tracing_subscriber::EnvFilter`.
    pub log_level: String,

    /// Resolver routing policy (protocol/source restrictions).
    pub policy: Policy,

    pub rate_limit: RateLimitConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:53".parse().unwrap(),
            http_bind_addr: Some("127.0.0.1:953".parse().unwrap()),
            resolver_urls: vec!["dns://1.1.1.1".to_string(), "dns://9.9.9.9".to_string()],
            captive_portal_url: "http://connectivity-check.example.net/generate_204".to_string(),
            compat_probe_interval: Duration::from_secs(30),
            log_level: "info".to_string(),
            policy: Policy::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Builds a config from environment variables layered over the
    /// defaults, e.g. `SENTRYNET_BIND`, `SENTRYNET_RESOLVERS` (comma
    /// separated), `SENTRYNET_LOG_LEVEL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(bind) = std::env::var("SENTRYNET_BIND") {
            config.bind_addr = bind
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddress(bind.clone()))?;
        }
        if let Ok(http_bind) = std::env::var("SENTRYNET_HTTP_BIND") {
            if http_bind.is_empty() {
                config.http_bind_addr = None;
            } else {
                config.http_bind_addr = Some(
                    http_bind
                        .parse()
                        .map_err(|_| ConfigError::InvalidBindAddress(http_bind.clone()))?,
                );
            }
        }
        if let Ok(resolvers) = std::env::var("SENTRYNET_RESOLVERS") {
            config.resolver_urls = resolvers.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(level) = std::env::var("SENTRYNET_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(url) = std::env::var("SENTRYNET_CAPTIVE_PORTAL_URL") {
            config.captive_portal_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Applies a partial TOML document on top of this config, leaving any
    /// key it doesn't mention untouched. Used for config-file hot reload.
    pub fn apply_partial_update(&mut self, value: &toml::Value) -> Result<(), ConfigError> {
        let table = value
            .as_table()
            .ok_or_else(|| ConfigError::ParseError("config root must be a table".to_string()))?;

        if let Some(v) = table.get("bind_addr").and_then(|v| v.as_str()) {
            self.bind_addr = v
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddress(v.to_string()))?;
        }
        if let Some(v) = table.get("http_bind_addr") {
            match v.as_str() {
                Some("") | None => self.http_bind_addr = None,
                Some(s) => {
                    self.http_bind_addr =
                        Some(s.parse().map_err(|_| ConfigError::InvalidBindAddress(s.to_string()))?);
                }
            }
        }
        if let Some(v) = table.get("resolver_urls").and_then(|v| v.as_array()) {
            self.resolver_urls = v
                .iter()
                .filter_map(|item| item.as_str().map(|s| s.to_string()))
                .collect();
        }
        if let Some(v) = table.get("captive_portal_url").and_then(|v| v.as_str()) {
            self.captive_portal_url = v.to_string();
        }
        if let Some(v) = table.get("compat_probe_interval_secs").and_then(|v| v.as_integer()) {
            self.compat_probe_interval = Duration::from_secs(v.max(1) as u64);
        }
        if let Some(v) = table.get("log_level").and_then(|v| v.as_str()) {
            self.log_level = v.to_string();
        }
        if let Some(v) = table.get("insecure_protocols_forbidden").and_then(|v| v.as_bool()) {
            self.policy.insecure_protocols_forbidden = v;
        }
        if let Some(v) = table.get("system_nameservers_forbidden").and_then(|v| v.as_bool()) {
            self.policy.system_nameservers_forbidden = v;
        }
        if let Some(v) = table.get("mdns_forbidden").and_then(|v| v.as_bool()) {
            self.policy.mdns_forbidden = v;
        }
        if let Some(v) = table.get("enable_rate_limiting").and_then(|v| v.as_bool()) {
            self.rate_limit.enable_rate_limiting = v;
        }
        if let Some(v) = table.get("queries_per_second_per_ip").and_then(|v| v.as_integer()) {
            self.rate_limit.queries_per_second_per_ip = v.max(1) as u32;
        }

        Ok(())
    }

    /// Rejects configs that would fail at `Core` construction time:
    /// unparseable resolver URLs, an HTTP bind address colliding with the
    /// DNS bind address, or a zero-length compat-probe interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for url in &self.resolver_urls {
            crate::resolver::config_url::parse(url)?;
        }
        if let Some(http_bind) = self.http_bind_addr {
            if http_bind == self.bind_addr {
                return Err(ConfigError::InvalidBindAddress(format!(
                    "http bind address {http_bind} collides with the dns bind address"
                )));
            }
        }
        if self.compat_probe_interval.is_zero() {
            return Err(ConfigError::ParseError(
                "compat_probe_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
