//! Entry point: loads configuration, assembles a `Core`, and spawns every
//! long-lived worker loop (DNS listener, online monitor, network-change
//! poller, compat probe, resolver failure sweeper, and the optional HTTP
//! surface), then waits for ctrl-c to shut them down in order.

use clap::Parser;
use sentrynet_core::config::CoreConfig;
use sentrynet_core::config_reload::ConfigReloader;
use sentrynet_core::core::CoreBuilder;
use sentrynet_core::dns::DnsResourceType;
use sentrynet_core::graceful_shutdown::GracefulShutdown;
use sentrynet_core::http_server::HttpServer;
use sentrynet_core::resolver::run_failure_sweeper;
use sentrynet_core::DnsPacket;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(about = "Host-based DNS interception and reachability agent")]
struct Args {
    /// Path to a TOML config file, applied as a partial overlay on top of
    /// the `SENTRYNET_*` environment defaults. Enables hot-reload when set.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> CoreConfig {
    let mut config = CoreConfig::from_env().unwrap_or_else(|e| {
        eprintln!("invalid environment configuration, falling back to defaults: {e}");
        CoreConfig::default()
    });

    if let Some(path) = &args.config {
        match std::fs::read_to_string(path) {
            Ok(contents) => match contents.parse::<toml::Value>() {
                Ok(value) => {
                    if let Err(e) = config.apply_partial_update(&value) {
                        eprintln!("config file {} rejected: {e}", path.display());
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    eprintln!("config file {} is not valid toml: {e}", path.display());
                    std::process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("could not read config file {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = config.validate() {
        eprintln!("configuration is invalid: {e}");
        std::process::exit(1);
    }

    config
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = load_config(&args);

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.log_level.clone()))
        .init();

    info!("starting with bind={} http_bind={:?}", config.bind_addr, config.http_bind_addr);

    let core = CoreBuilder::from_config(&config).build();
    let shutdown = GracefulShutdown::new();

    let mut config_reloader = None;
    if let Some(path) = &args.config {
        let reloader = ConfigReloader::new(config.clone(), Some(path.to_string_lossy().into_owned()));
        if let Err(e) = reloader.start_watching().await {
            warn!("config hot-reload watcher failed to start: {}", e);
        }
        config_reloader = Some(Arc::new(reloader));
    }

    let dns_server = core.dns_server.clone();
    let mut dns_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            result = dns_server.run() => {
                if let Err(e) = result {
                    error!("dns server exited: {}", e);
                }
            }
            _ = dns_shutdown.recv() => {
                info!("dns server stopping");
            }
        }
    });

    let online_monitor = core.online_monitor.clone();
    let network_changed_for_monitor = core.network_changed.clone();
    let mut online_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = online_monitor.run(&network_changed_for_monitor) => {}
            _ = online_shutdown.recv() => {
                info!("online monitor stopping");
            }
        }
    });

    // Network interface polling needs its own view of "are we online" to
    // pick a poll interval; kept in sync with the real status below.
    let network_changed = core.network_changed.clone();
    let network_online = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let network_online_poll = network_online.clone();
    let mut network_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = network_changed.run(&network_online_poll) => {}
            _ = network_shutdown.recv() => {
                info!("network change poller stopping");
            }
        }
    });

    {
        let dns_server = core.dns_server.clone();
        let resolver_set = core.resolver_set.clone();
        let mut changes = core.online_monitor.subscribe();
        tokio::spawn(async move {
            while let Ok(status) = changes.recv().await {
                let online = status.is_online_enough();
                dns_server.set_online(online);
                resolver_set.set_online(online);
                network_online.store(online, Ordering::Relaxed);
            }
        });
    }

    let compat_probe = core.compat_probe.clone();
    let mut compat_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = compat_probe.run() => {}
            _ = compat_shutdown.recv() => {
                info!("compat probe stopping");
            }
        }
    });

    {
        let resolver_set = core.resolver_set.clone();
        let dns_resolver = core.dns_resolver.clone();
        let mut sweeper_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            // There's no per-resolver targeted query path, so the sweep
            // probe is the same synthetic self-check the compat probe
            // runs: if the stack resolves at all, every currently-failing
            // resolver gets a chance to clear on the next routing decision.
            let probe = move |_resolver: Arc<sentrynet_core::resolver::Resolver>| {
                let dns_resolver = dns_resolver.clone();
                async move {
                    let fqdn = format!("sweep{}", sentrynet_core::resolver::transport::env::SELF_CHECK_SUFFIX);
                    let query = DnsPacket::new_query(1, &fqdn, DnsResourceType::A);
                    dns_resolver.resolve(&query, true, true, false).await.is_ok()
                }
            };
            tokio::select! {
                _ = run_failure_sweeper(resolver_set, Duration::from_secs(30), probe) => {}
                _ = sweeper_shutdown.recv() => {
                    info!("resolver failure sweeper stopping");
                }
            }
        });
    }

    if let Some(http_bind) = config.http_bind_addr {
        let http_server = HttpServer::new(
            core.resolver_set.clone(),
            core.online_monitor.clone(),
            core.metrics.clone(),
            config_reloader.clone(),
            http_bind,
        );
        tokio::spawn(async move {
            if let Err(e) = http_server.start().await {
                error!("http server exited: {}", e);
            }
        });
    }

    info!("online status at startup: {:?}", core.online_monitor.status());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {}", e);
    }
    info!("shutdown signal received");

    if let Err(e) = shutdown.shutdown().await {
        error!("graceful shutdown failed: {}", e);
    }
}
