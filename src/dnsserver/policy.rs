//! Pre/post-resolve policy hook. The server consults this before sending
//! a query upstream and again after an answer comes back, so a caller
//! embedding this core can veto or rewrite traffic without touching the
//! resolution pipeline itself.

use crate::dns::DnsPacket;
use std::net::IpAddr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreResolveVerdict {
    Allow,
    Block,
    /// Answer the query locally with a synthesized response instead of
    /// going to any resolver.
    Synthesize(Box<DnsPacket>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostResolveVerdict {
    Allow,
    Block,
}

pub trait PolicyHook: Send + Sync {
    fn pre_resolve(&self, fqdn: &str, client: IpAddr) -> PreResolveVerdict {
        let _ = (fqdn, client);
        PreResolveVerdict::Allow
    }

    fn post_resolve(&self, fqdn: &str, client: IpAddr, answer: &DnsPacket) -> PostResolveVerdict {
        let _ = (fqdn, client, answer);
        PostResolveVerdict::Allow
    }
}

pub struct AllowAllPolicy;

impl PolicyHook for AllowAllPolicy {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::DnsResourceType;

    #[test]
    fn default_hook_allows_everything() {
        let hook = AllowAllPolicy;
        let client: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(hook.pre_resolve("example.com.", client), PreResolveVerdict::Allow);
        let q = DnsPacket::new_query(1, "example.com.", DnsResourceType::A);
        let resp = DnsPacket::response_shell(&q);
        assert_eq!(hook.post_resolve("example.com.", client, &resp), PostResolveVerdict::Allow);
    }
}
