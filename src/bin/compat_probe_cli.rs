//! Standalone self-check: builds just enough of the core to exercise the
//! resolve path end to end, without binding a DNS listener. Useful for a
//! `postStart` probe or a manual "is resolution even working" check.

use clap::Parser;
use sentrynet_core::cache::{DnsCache, InMemoryRecordStore};
use sentrynet_core::compat_probe::CompatProbe;
use sentrynet_core::resolver::{DnsResolver, Policy, Resolver, ResolverSet, Source};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(about = "Runs a single compat-probe resolution cycle and reports the outcome")]
struct Args {
    /// Resolver URLs to probe through, e.g. dns://1.1.1.1 dot://1.1.1.1?verify=cloudflare-dns.com
    #[arg(required = true)]
    resolvers: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let policy_set = Arc::new(ResolverSet::new(Policy::default()));
    for url in &args.resolvers {
        match sentrynet_core::resolver::config_url::parse(url) {
            Ok(spec) => policy_set.add(Arc::new(Resolver::new(spec, Source::Configured))),
            Err(e) => {
                eprintln!("skipping invalid resolver url {url}: {e}");
            }
        }
    }
    // The compat probe always resolves through the env:// zone regardless
    // of what's configured, so register it too.
    let env_spec = sentrynet_core::resolver::config_url::parse("env://local/").unwrap();
    policy_set.add(Arc::new(Resolver::new(env_spec, Source::Env)));

    let cache = Arc::new(DnsCache::new(Arc::new(InMemoryRecordStore::new())));
    let resolver = Arc::new(DnsResolver::new(policy_set, cache));
    let probe = CompatProbe::new(resolver);

    if probe.check_once().await {
        println!("ok");
        ExitCode::SUCCESS
    } else {
        println!("failed");
        ExitCode::FAILURE
    }
}
