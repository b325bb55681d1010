//! Block-detection heuristics shared by every transport: a transport
//! sends the wire query and gets back a raw answer, and this module
//! decides whether that answer actually means "blocked by the upstream"
//! rather than "here's your data".

use crate::dns::{DnsPacket, ResponseCode};
use crate::resolver::config_url::BlockDetection;
use std::net::IpAddr;

pub fn is_upstream_blocked(detection: BlockDetection, answer: &DnsPacket) -> bool {
    match detection {
        BlockDetection::Disabled => false,
        BlockDetection::Refused => answer.rcode() == ResponseCode::Refused,
        BlockDetection::ZeroIp => {
            !answer.answers.is_empty()
                && answer.answers.iter().all(|r| match r.ip_addr() {
                    Some(IpAddr::V4(v4)) => v4.is_unspecified(),
                    Some(IpAddr::V6(v6)) => v6.is_unspecified(),
                    None => false,
                })
        }
        BlockDetection::Empty => {
            answer.rcode() == ResponseCode::NxDomain
                && answer.answers.is_empty()
                && answer.authority.is_empty()
                && answer.additional.is_empty()
        }
    }
}
