//! Synthesises answers for the internal special-use zones without
//! touching the network: the compat-probe self-check domain, the
//! default-gateway lookup, and the detected-captive-portal lookup.
//! Answers from this transport are never cached by callers.

use crate::dns::{DnsPacket, DnsRecord, DnsResourceType, ResponseCode};
use crate::error::{CoreError, Result};
use crate::resolver::transport::DnsTransport;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub const SELF_CHECK_SUFFIX: &str = ".self-check.portmaster.home.arpa.";
pub const ROUTER_ZONE: &str = "router.local.portmaster.home.arpa.";
pub const CAPTIVE_PORTAL_ZONE: &str = "captiveportal.local.portmaster.home.arpa.";

#[derive(Default)]
pub struct EnvState {
    pub default_gateway: RwLock<Option<IpAddr>>,
    pub captive_portal_ip: RwLock<Option<IpAddr>>,
}

pub struct EnvTransport {
    state: std::sync::Arc<EnvState>,
}

impl EnvTransport {
    pub fn new(state: std::sync::Arc<EnvState>) -> Self {
        Self { state }
    }
}

fn random_probe_ip() -> Ipv4Addr {
    // TEST-NET-1 (RFC 5737): safe to synthesize without colliding with a
    // real routable address.
    Ipv4Addr::new(192, 0, 2, rand::random())
}

#[async_trait]
impl DnsTransport for EnvTransport {
    async fn query(&self, query: &DnsPacket, _deadline: Duration) -> Result<DnsPacket> {
        let question = query.questions.first().ok_or_else(|| CoreError::Invalid("empty question section".into()))?;
        let fqdn = &question.name;

        let mut response = DnsPacket::response_shell(query);

        if fqdn.ends_with(SELF_CHECK_SUFFIX) {
            if question.qtype == DnsResourceType::A {
                response.answers.push(DnsRecord::a(fqdn, 0, random_probe_ip()));
            }
            return Ok(response);
        }

        if fqdn == ROUTER_ZONE {
            if let (DnsResourceType::A, Some(IpAddr::V4(gw))) = (question.qtype, *self.state.default_gateway.read()) {
                response.answers.push(DnsRecord::a(fqdn, 0, gw));
                return Ok(response);
            }
            response.set_rcode(ResponseCode::NxDomain);
            return Ok(response);
        }

        if fqdn == CAPTIVE_PORTAL_ZONE {
            if let (DnsResourceType::A, Some(IpAddr::V4(ip))) = (question.qtype, *self.state.captive_portal_ip.read()) {
                response.answers.push(DnsRecord::a(fqdn, 0, ip));
                return Ok(response);
            }
            response.set_rcode(ResponseCode::NxDomain);
            return Ok(response);
        }

        response.set_rcode(ResponseCode::NxDomain);
        Ok(response)
    }
}
