//! Parses a resolver configuration URL:
//! `scheme://host[:port][/path]?name=...&verify=...&ip=...&blockedif={empty|refused|zeroip|disabled}&search=d1,d2,...&search-only&link-local`
//!
//! This is the one bit-stable configuration surface besides the DNS wire
//! format itself, so the grammar is parsed by hand rather than leaned on a
//! generic URL crate's query-string handling, in the same spirit as the
//! resolver-URL scheme validation the dependency-free config-validation
//! layer already does elsewhere in this crate.

use crate::error::ConfigError;
use std::net::IpAddr;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Plain,
    Tcp,
    Dot,
    Doh,
    Mdns,
    Env,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockDetection {
    Refused,
    ZeroIp,
    Empty,
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolverHost {
    Ip(IpAddr),
    Domain(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolverSpec {
    pub transport: TransportKind,
    pub host: ResolverHost,
    pub port: u16,
    pub path: Option<String>,
    pub name: Option<String>,
    pub verify: Option<String>,
    pub ip: Option<IpAddr>,
    pub blocked_if: BlockDetection,
    pub search_scopes: Vec<String>,
    pub search_only: bool,
    pub link_local: bool,
}

fn default_port(transport: TransportKind) -> u16 {
    match transport {
        TransportKind::Plain | TransportKind::Tcp => 53,
        TransportKind::Dot => 853,
        TransportKind::Doh => 443,
        TransportKind::Mdns | TransportKind::Env => 0,
    }
}

fn parse_scheme(scheme: &str) -> Result<TransportKind, ConfigError> {
    match scheme {
        "dns" => Ok(TransportKind::Plain),
        "tcp" => Ok(TransportKind::Tcp),
        "dot" | "tls" => Ok(TransportKind::Dot),
        "doh" | "https" => Ok(TransportKind::Doh),
        "mdns" => Ok(TransportKind::Mdns),
        "env" => Ok(TransportKind::Env),
        other => Err(ConfigError::InvalidScheme(other.to_string())),
    }
}

pub fn parse(raw: &str) -> Result<ResolverSpec, ConfigError> {
    let (scheme, rest) = raw
        .split_once("://")
        .ok_or_else(|| ConfigError::ParseError(format!("missing scheme in {raw}")))?;
    let transport = parse_scheme(scheme)?;

    let (authority_and_path, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };
    let (authority, path) = match authority_and_path.split_once('/') {
        Some((a, p)) => (a, Some(format!("/{p}"))),
        None => (authority_and_path, None),
    };

    let (host_str, port) = match authority.rsplit_once(':') {
        Some((h, p)) if !h.is_empty() && p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
            let port: u16 = p
                .parse()
                .map_err(|_| ConfigError::ParseError(format!("invalid port in {raw}")))?;
            (h, port)
        }
        _ => (authority, default_port(transport)),
    };
    if host_str.is_empty() {
        return Err(ConfigError::ParseError(format!("missing host in {raw}")));
    }

    let host = match host_str.parse::<IpAddr>() {
        Ok(ip) => ResolverHost::Ip(ip),
        Err(_) => ResolverHost::Domain(host_str.to_string()),
    };

    let mut name = None;
    let mut verify = None;
    let mut ip = None;
    let mut blocked_if = default_block_detection(transport);
    let mut search_scopes = Vec::new();
    let mut search_only = false;
    let mut link_local = false;

    if let Some(query) = query {
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some(("name", v)) => name = Some(v.to_string()),
                Some(("verify", v)) => verify = Some(v.to_string()),
                Some(("ip", v)) => {
                    ip = Some(
                        v.parse::<IpAddr>()
                            .map_err(|_| ConfigError::ParseError(format!("invalid ip= in {raw}")))?,
                    )
                }
                Some(("blockedif", v)) => blocked_if = parse_block_detection(v, raw)?,
                Some(("search", v)) => {
                    search_scopes = v.split(',').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
                }
                Some((key, _)) => {
                    return Err(ConfigError::ParseError(format!("unknown query parameter '{key}' in {raw}")))
                }
                None if pair == "search-only" => search_only = true,
                None if pair == "link-local" => link_local = true,
                None => return Err(ConfigError::ParseError(format!("malformed query parameter '{pair}' in {raw}"))),
            }
        }
    }

    let spec = ResolverSpec {
        transport,
        host,
        port,
        path,
        name,
        verify,
        ip,
        blocked_if,
        search_scopes,
        search_only,
        link_local,
    };

    validate(&spec, raw)?;
    Ok(spec)
}

fn default_block_detection(transport: TransportKind) -> BlockDetection {
    match transport {
        TransportKind::Env => BlockDetection::Disabled,
        _ => BlockDetection::Refused,
    }
}

fn parse_block_detection(v: &str, raw: &str) -> Result<BlockDetection, ConfigError> {
    match v {
        "refused" => Ok(BlockDetection::Refused),
        "zeroip" => Ok(BlockDetection::ZeroIp),
        "empty" => Ok(BlockDetection::Empty),
        "disabled" => Ok(BlockDetection::Disabled),
        other => Err(ConfigError::ParseError(format!("invalid blockedif={other} in {raw}"))),
    }
}

/// For DoT/DoH, exactly one of (host is IP, `verify=` set) or (host is
/// domain, `ip=` optionally set) must hold — the server's identity must
/// either be self-evident from the IP or externally verifiable via a TLS
/// server-name override.
fn validate(spec: &ResolverSpec, raw: &str) -> Result<(), ConfigError> {
    if matches!(spec.transport, TransportKind::Dot | TransportKind::Doh) {
        let host_is_ip = matches!(spec.host, ResolverHost::Ip(_));
        if host_is_ip && spec.verify.is_none() {
            return Err(ConfigError::MissingVerifyOrIp(raw.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_dns_url() {
        let spec = parse("dns://1.1.1.1").unwrap();
        assert_eq!(spec.transport, TransportKind::Plain);
        assert_eq!(spec.port, 53);
        assert_eq!(spec.host, ResolverHost::Ip("1.1.1.1".parse().unwrap()));
    }

    #[test]
    fn parses_dot_with_verify_domain() {
        let spec = parse("dot://1.1.1.1?verify=cloudflare-dns.com").unwrap();
        assert_eq!(spec.transport, TransportKind::Dot);
        assert_eq!(spec.port, 853);
        assert_eq!(spec.verify.as_deref(), Some("cloudflare-dns.com"));
    }

    #[test]
    fn dot_with_ip_host_and_no_verify_is_rejected() {
        assert!(matches!(
            parse("dot://1.1.1.1"),
            Err(ConfigError::MissingVerifyOrIp(_))
        ));
    }

    #[test]
    fn dot_with_domain_host_and_no_ip_is_allowed() {
        let spec = parse("dot://dns.cloudflare.com").unwrap();
        assert_eq!(spec.host, ResolverHost::Domain("dns.cloudflare.com".to_string()));
    }

    #[test]
    fn parses_doh_with_path_and_search_scopes() {
        let spec = parse("https://dns.google/dns-query?search=corp.example.,internal.example.&search-only").unwrap();
        assert_eq!(spec.transport, TransportKind::Doh);
        assert_eq!(spec.path.as_deref(), Some("/dns-query"));
        assert_eq!(spec.search_scopes, vec!["corp.example.", "internal.example."]);
        assert!(spec.search_only);
    }

    #[test]
    fn parses_explicit_port_and_blockedif() {
        let spec = parse("tcp://9.9.9.9:5353?blockedif=zeroip&link-local").unwrap();
        assert_eq!(spec.port, 5353);
        assert_eq!(spec.blocked_if, BlockDetection::ZeroIp);
        assert!(spec.link_local);
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(matches!(parse("ftp://1.1.1.1"), Err(ConfigError::InvalidScheme(_))));
    }
}
