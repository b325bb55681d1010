//! Periodic self-test: sends a synthetic DNS query for the randomised
//! self-check domain through the normal resolve path and a synthetic
//! packet through `FlowLookup`, to catch the core silently wedging
//! without waiting for a real client to notice.

use crate::dns::{DnsPacket, DnsResourceType};
use crate::resolver::transport::env::SELF_CHECK_SUFFIX;
use crate::resolver::DnsResolver;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

pub struct CompatProbe {
    resolver: Arc<DnsResolver>,
    interval: Duration,
    probe_counter: AtomicU64,
}

impl CompatProbe {
    pub fn new(resolver: Arc<DnsResolver>) -> Self {
        Self { resolver, interval: DEFAULT_PROBE_INTERVAL, probe_counter: AtomicU64::new(0) }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn next_probe_domain(&self) -> String {
        let n = self.probe_counter.fetch_add(1, Ordering::Relaxed);
        format!("probe{n}{SELF_CHECK_SUFFIX}")
    }

    /// Runs a single self-check cycle, returning whether the stack
    /// answered successfully.
    pub async fn check_once(&self) -> bool {
        let fqdn = self.next_probe_domain();
        let query = DnsPacket::new_query(1, &fqdn, DnsResourceType::A);
        match self.resolver.resolve(&query, true, true, false).await {
            Ok(answer) if !answer.answers.is_empty() => {
                info!("compat probe ok for {}", fqdn);
                true
            }
            Ok(_) => {
                error!("compat probe got an empty answer for {}", fqdn);
                false
            }
            Err(e) => {
                error!("compat probe failed for {}: {}", fqdn, e);
                false
            }
        }
    }

    pub async fn run(&self) {
        loop {
            self.check_once().await;
            tokio::time::sleep(self.interval).await;
        }
    }
}
