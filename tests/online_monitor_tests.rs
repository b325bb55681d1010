use async_trait::async_trait;
use sentrynet_core::online::{CaptivePortalProbe, DnsReachabilityProbe, OnlineMonitor, OnlineStatus};
use std::sync::Arc;

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
async fn dns_unreachable_reports_offline_regardless_of_http_probe() {
    let monitor = OnlineMonitor::new(Arc::new(FixedHttpProbe(Some(true))), Arc::new(FixedDnsProbe(false)));
    assert_eq!(monitor.check_once().await, OnlineStatus::Offline);
}

#[tokio::test]
async fn a_redirected_http_probe_reports_a_captive_portal() {
    let monitor = OnlineMonitor::new(Arc::new(FixedHttpProbe(Some(false))), Arc::new(FixedDnsProbe(true)));
    assert_eq!(monitor.check_once().await, OnlineStatus::Portal);
}

#[tokio::test]
async fn a_timed_out_http_probe_reports_limited_connectivity() {
    let monitor = OnlineMonitor::new(Arc::new(FixedHttpProbe(None)), Arc::new(FixedDnsProbe(true)));
    assert_eq!(monitor.check_once().await, OnlineStatus::Limited);
}

#[tokio::test]
async fn a_clean_http_probe_reports_fully_online() {
    let monitor = OnlineMonitor::new(Arc::new(FixedHttpProbe(Some(true))), Arc::new(FixedDnsProbe(true)));
    assert_eq!(monitor.check_once().await, OnlineStatus::Online);
    assert_eq!(monitor.status(), OnlineStatus::Online);
}

#[tokio::test]
async fn status_changes_are_published_to_subscribers() {
    let monitor = OnlineMonitor::new(Arc::new(FixedHttpProbe(Some(true))), Arc::new(FixedDnsProbe(true)));
    let mut changes = monitor.subscribe();
    monitor.check_once().await;
    let status = changes.recv().await.expect("status change should be published");
    assert_eq!(status, OnlineStatus::Online);
}
