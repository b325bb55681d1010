//! Device reachability monitoring: classifies the current network
//! situation into a small status tier so the rest of the core can decide
//! whether to trust an upstream answer, fall back to cache, or hand back
//! SERVFAIL outright.

pub mod network_changed;

pub use network_changed::{InterfaceSource, NetworkChanged, SysinfoInterfaceSource};

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

const OFFLINE_RECHECK: Duration = Duration::from_secs(10);
const DEGRADED_RECHECK: Duration = Duration::from_secs(5);
const ONLINE_RECHECK: Duration = Duration::from_secs(60);
const CAPTIVE_PORTAL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OnlineStatus {
    Unknown = 0,
    Offline = 1,
    Limited = 2,
    Portal = 3,
    SemiOnline = 4,
    Online = 5,
}

impl OnlineStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => OnlineStatus::Offline,
            2 => OnlineStatus::Limited,
            3 => OnlineStatus::Portal,
            4 => OnlineStatus::SemiOnline,
            5 => OnlineStatus::Online,
            _ => OnlineStatus::Unknown,
        }
    }

    pub fn is_online_enough(self) -> bool {
        matches!(self, OnlineStatus::SemiOnline | OnlineStatus::Online)
    }
}

#[async_trait]
pub trait CaptivePortalProbe: Send + Sync {
    /// Returns `Some(true)` if the probe reached the real target
    /// unredirected, `Some(false)` if a captive portal intercepted it,
    /// `None` if the probe couldn't complete at all (likely offline).
    async fn probe(&self) -> Option<bool>;
}

pub struct HttpCaptivePortalProbe {
    client: Client,
    url: String,
}

impl HttpCaptivePortalProbe {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(CAPTIVE_PORTAL_TIMEOUT)
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl CaptivePortalProbe for HttpCaptivePortalProbe {
    async fn probe(&self) -> Option<bool> {
        match self.client.get(&self.url).send().await {
            Ok(resp) => Some(resp.status().is_success()),
            Err(e) if e.is_timeout() || e.is_connect() => None,
            Err(_) => Some(false),
        }
    }
}

#[async_trait]
pub trait DnsReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

pub struct OnlineMonitor {
    status: AtomicU8,
    http_probe: Arc<dyn CaptivePortalProbe>,
    dns_probe: Arc<dyn DnsReachabilityProbe>,
    change_tx: broadcast::Sender<OnlineStatus>,
}

impl OnlineMonitor {
    pub fn new(http_probe: Arc<dyn CaptivePortalProbe>, dns_probe: Arc<dyn DnsReachabilityProbe>) -> Self {
        let (change_tx, _rx) = broadcast::channel(8);
        Self { status: AtomicU8::new(OnlineStatus::Unknown as u8), http_probe, dns_probe, change_tx }
    }

    pub fn status(&self) -> OnlineStatus {
        OnlineStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OnlineStatus> {
        self.change_tx.subscribe()
    }

    fn set_status(&self, new_status: OnlineStatus) {
        let previous = self.status.swap(new_status as u8, Ordering::SeqCst);
        if previous != new_status as u8 {
            debug!("online status changed to {:?}", new_status);
            let _ = self.change_tx.send(new_status);
        }
    }

    /// Runs one classification pass: DNS reachability first (cheapest,
    /// catches plain offline), then the captive-portal HTTP probe to
    /// distinguish a portal intercept from genuine connectivity.
    pub async fn check_once(&self) -> OnlineStatus {
        let dns_ok = self.dns_probe.probe().await;
        if !dns_ok {
            self.set_status(OnlineStatus::Offline);
            return OnlineStatus::Offline;
        }

        let status = match self.http_probe.probe().await {
            None => OnlineStatus::Limited,
            Some(false) => OnlineStatus::Portal,
            Some(true) => OnlineStatus::Online,
        };
        self.set_status(status);
        status
    }

    pub fn recheck_interval(&self) -> Duration {
        match self.status() {
            OnlineStatus::Offline | OnlineStatus::Unknown => OFFLINE_RECHECK,
            OnlineStatus::Limited | OnlineStatus::Portal => DEGRADED_RECHECK,
            OnlineStatus::SemiOnline | OnlineStatus::Online => ONLINE_RECHECK,
        }
    }

    pub async fn run(&self, network_changed: &NetworkChanged) {
        let mut changes = network_changed.subscribe();
        loop {
            let interval = self.recheck_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.check_once().await;
                }
                changed = changes.recv() => {
                    if changed.is_ok() {
                        self.check_once().await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedHttpProbe(Option<bool>);
    #[async_trait]
    impl CaptivePortalProbe for FixedHttpProbe {
        async fn probe(&self) -> Option<bool> {
            self.0
        }
    }

    struct FixedDnsProbe(bool);
    #[async_trait]
    impl DnsReachabilityProbe for FixedDnsProbe {
        async fn probe(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn dns_failure_means_offline_regardless_of_http() {
        let monitor = OnlineMonitor::new(Arc::new(FixedHttpProbe(Some(true))), Arc::new(FixedDnsProbe(false)));
        assert_eq!(monitor.check_once().await, OnlineStatus::Offline);
    }

    #[tokio::test]
    async fn portal_intercept_is_detected() {
        let monitor = OnlineMonitor::new(Arc::new(FixedHttpProbe(Some(false))), Arc::new(FixedDnsProbe(true)));
        assert_eq!(monitor.check_once().await, OnlineStatus::Portal);
    }

    #[tokio::test]
    async fn unreachable_http_probe_is_limited_not_offline() {
        let monitor = OnlineMonitor::new(Arc::new(FixedHttpProbe(None)), Arc::new(FixedDnsProbe(true)));
        assert_eq!(monitor.check_once().await, OnlineStatus::Limited);
    }

    #[tokio::test]
    async fn fully_reachable_is_online() {
        let monitor = OnlineMonitor::new(Arc::new(FixedHttpProbe(Some(true))), Arc::new(FixedDnsProbe(true)));
        assert_eq!(monitor.check_once().await, OnlineStatus::Online);
    }

    #[tokio::test]
    async fn status_change_is_broadcast() {
        let monitor = OnlineMonitor::new(Arc::new(FixedHttpProbe(Some(true))), Arc::new(FixedDnsProbe(true)));
        let mut rx = monitor.subscribe();
        monitor.check_once().await;
        assert_eq!(rx.recv().await.unwrap(), OnlineStatus::Online);
    }
}
