use sentrynet_core::resolver::{config_url, Policy, Resolver, ResolverSet, RouteQuery, Source};
use std::sync::Arc;

fn resolver(url: &str, source: Source) -> Arc<Resolver> {
    Arc::new(Resolver::new(config_url::parse(url).unwrap(), source))
}

#[test]
fn plain_query_routes_to_configured_resolvers_only() {
    let set = ResolverSet::new(Policy::default());
    set.add(resolver("dns://1.1.1.1", Source::Configured));
    set.add(resolver("dns://192.168.1.1", Source::System));

    let route = set.route(RouteQuery {
        fqdn: "example.com.",
        is_internal_special_use: false,
        is_connectivity_probe: false,
    });

    assert_eq!(route.resolvers.len(), 1);
    assert_eq!(route.resolvers[0].source, Source::Configured);
}

#[test]
fn a_resolver_stops_being_routed_to_once_it_crosses_the_failure_threshold() {
    let set = ResolverSet::new(Policy::default());
    let r = resolver("dns://1.1.1.1", Source::Configured);
    set.add(r.clone());

    for _ in 0..5 {
        set.record_outcome(&r, false);
    }

    assert!(r.is_failing());
    let route = set.route(RouteQuery {
        fqdn: "example.com.",
        is_internal_special_use: false,
        is_connectivity_probe: false,
    });
    assert!(route.resolvers.is_empty());
}

#[test]
fn a_success_clears_accumulated_failures() {
    let set = ResolverSet::new(Policy::default());
    let r = resolver("dns://1.1.1.1", Source::Configured);
    set.add(r.clone());

    set.record_outcome(&r, false);
    set.record_outcome(&r, false);
    set.record_outcome(&r, true);
    assert!(!r.is_failing());
}

#[test]
fn insecure_transports_are_excluded_when_the_policy_forbids_them() {
    let mut policy = Policy::default();
    policy.insecure_protocols_forbidden = true;
    let set = ResolverSet::new(policy);
    set.add(resolver("dns://1.1.1.1", Source::Configured));

    let route = set.route(RouteQuery {
        fqdn: "example.com.",
        is_internal_special_use: false,
        is_connectivity_probe: false,
    });
    assert!(route.resolvers.is_empty());
}
