use crate::config::CoreConfig;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

/// Configuration change notification
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub old_config: CoreConfig,
    pub new_config: CoreConfig,
}

/// Configuration hot-reload manager
pub struct ConfigReloader {
    config: Arc<RwLock<CoreConfig>>,
    change_tx: mpsc::UnboundedSender<ConfigChange>,
    change_rx: Option<mpsc::UnboundedReceiver<ConfigChange>>,
    config_file_path: Option<String>,
}

impl ConfigReloader {
    pub fn new(initial_config: CoreConfig, config_file_path: Option<String>) -> Self {
        let (change_tx, change_rx) = mpsc::unbounded_channel();

        Self {
            config: Arc::new(RwLock::new(initial_config)),
            change_tx,
            change_rx: Some(change_rx),
            config_file_path,
        }
    }

    pub async fn get_config(&self) -> CoreConfig {
        self.config.read().await.clone()
    }

    /// Take the change receiver (can only be called once)
    pub fn take_change_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<ConfigChange>> {
        self.change_rx.take()
    }

    /// Start watching for configuration changes
    pub async fn start_watching(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(config_path) = &self.config_file_path {
            info!("starting configuration file watcher for {}", config_path);

            let config_clone = self.config.clone();
            let change_tx = self.change_tx.clone();
            let config_path = config_path.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::watch_config_file(config_clone, change_tx, config_path).await {
                    error!("configuration file watcher error: {}", e);
                }
            });
        }

        self.start_signal_handler().await;
        Ok(())
    }

    async fn watch_config_file(
        config: Arc<RwLock<CoreConfig>>,
        change_tx: mpsc::UnboundedSender<ConfigChange>,
        config_path: String,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher: RecommendedWatcher = Watcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if let Err(e) = tx.send(event) {
                        error!("failed to send file watch event: {}", e);
                    }
                }
                Err(e) => error!("file watch error: {}", e),
            },
            notify::Config::default(),
        )?;

        // Watching the parent directory is more reliable than watching the
        // file directly across editors that rewrite-and-rename on save.
        let config_dir = Path::new(&config_path).parent().unwrap_or_else(|| Path::new("."));
        watcher.watch(config_dir, RecursiveMode::NonRecursive)?;

        while let Some(event) = rx.recv().await {
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                continue;
            }
            if !event.paths.iter().any(|p| p.to_string_lossy().contains(&config_path)) {
                continue;
            }
            debug!("configuration file changed: {:?}", event.paths);
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Err(e) = Self::reload_from_file(&config, &change_tx, &config_path).await {
                error!("failed to reload configuration: {}", e);
            }
        }

        Ok(())
    }

    /// Start the SIGHUP handler for a manual reload trigger.
    async fn start_signal_handler(&self) {
        let config = self.config.clone();
        let change_tx = self.change_tx.clone();
        let config_file_path = self.config_file_path.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{SignalKind, signal};

                let mut sighup = signal(SignalKind::hangup()).expect("failed to install sighup handler");
                loop {
                    sighup.recv().await;
                    info!("received sighup, reloading configuration");
                    if let Some(ref path) = config_file_path {
                        if let Err(e) = Self::reload_from_file(&config, &change_tx, path).await {
                            error!("failed to reload configuration from sighup: {}", e);
                        }
                    } else if let Err(e) = Self::reload_from_env(&config, &change_tx).await {
                        error!("failed to reload configuration from environment: {}", e);
                    }
                }
            }

            #[cfg(not(unix))]
            {
                loop {
                    tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
                }
            }
        });
    }

    async fn reload_from_file(
        config: &Arc<RwLock<CoreConfig>>,
        change_tx: &mpsc::UnboundedSender<ConfigChange>,
        config_path: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let content = tokio::fs::read_to_string(config_path).await?;
        let current_snapshot = config.read().await.clone();
        let new_config = Self::parse_config_file(&content, &current_snapshot)?;

        let old_config = {
            let mut current = config.write().await;
            let old = current.clone();
            *current = new_config.clone();
            old
        };

        info!("configuration reloaded from {}", config_path);
        let _ = change_tx.send(ConfigChange { old_config, new_config });
        Ok(())
    }

    async fn reload_from_env(
        config: &Arc<RwLock<CoreConfig>>,
        change_tx: &mpsc::UnboundedSender<ConfigChange>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let new_config = CoreConfig::from_env()?;
        let old_config = {
            let mut current = config.write().await;
            let old = current.clone();
            *current = new_config.clone();
            old
        };

        info!("configuration reloaded from environment variables");
        let _ = change_tx.send(ConfigChange { old_config, new_config });
        Ok(())
    }

    fn parse_config_file(
        content: &str,
        current_config: &CoreConfig,
    ) -> Result<CoreConfig, Box<dyn std::error::Error + Send + Sync>> {
        let toml_value: toml::Value = toml::from_str(content)?;
        let mut config = current_config.clone();
        config.apply_partial_update(&toml_value)?;
        config.validate()?;
        Ok(config)
    }

    /// Manually trigger a configuration reload.
    pub async fn reload_now(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(ref path) = self.config_file_path {
            Self::reload_from_file(&self.config, &self.change_tx, path).await
        } else {
            Self::reload_from_env(&self.config, &self.change_tx).await
        }
    }
}

/// Logs what changed between two configs. Any field mentioned here
/// requires a restart to take effect since nothing currently re-wires a
/// live `Core` after construction.
pub async fn handle_config_changes(mut change_rx: mpsc::UnboundedReceiver<ConfigChange>) {
    while let Some(change) = change_rx.recv().await {
        if change.old_config.bind_addr != change.new_config.bind_addr {
            warn!(
                "dns bind address changed: {} -> {} (requires restart)",
                change.old_config.bind_addr, change.new_config.bind_addr
            );
        }
        if change.old_config.resolver_urls != change.new_config.resolver_urls {
            warn!(
                "resolver list changed: {:?} -> {:?} (requires restart)",
                change.old_config.resolver_urls, change.new_config.resolver_urls
            );
        }
        if change.old_config.rate_limit.enable_rate_limiting != change.new_config.rate_limit.enable_rate_limiting {
            info!(
                "rate limiting enabled changed: {} -> {}",
                change.old_config.rate_limit.enable_rate_limiting, change.new_config.rate_limit.enable_rate_limiting
            );
        }
        if change.old_config.http_bind_addr != change.new_config.http_bind_addr {
            warn!(
                "http bind address changed: {:?} -> {:?} (requires restart)",
                change.old_config.http_bind_addr, change.new_config.http_bind_addr
            );
        }
    }
}
