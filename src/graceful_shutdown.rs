use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Coordinates an orderly shutdown: broadcasts a stop signal, gives
/// in-flight work a grace period, then runs each registered component's
/// shutdown hook with its own timeout.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<()>,
    components: Arc<Mutex<Vec<ShutdownComponent>>>,
    drain_grace_period: Duration,
}

type ShutdownResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type ShutdownFn = Box<dyn Fn() -> tokio::task::JoinHandle<ShutdownResult> + Send + Sync>;

struct ShutdownComponent {
    name: String,
    shutdown_fn: ShutdownFn,
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            components: Arc::new(Mutex::new(Vec::new())),
            drain_grace_period: Duration::from_millis(500),
        }
    }

    /// Receiver for long-running loops (`DnsServer::run`, `OnlineMonitor::run`, ...)
    /// to select against alongside their normal work.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Registers a component for an explicit teardown step beyond just
    /// stopping its loop, e.g. flushing a delayed-write cache store.
    pub async fn register_component<F, Fut>(&self, name: impl Into<String>, shutdown_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ShutdownResult> + Send + 'static,
    {
        let component = ShutdownComponent {
            name: name.into(),
            shutdown_fn: Box::new(move || {
                let fut = shutdown_fn();
                tokio::spawn(fut)
            }),
        };
        self.components.lock().await.push(component);
    }

    pub async fn shutdown(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("initiating graceful shutdown");

        if self.shutdown_tx.send(()).is_err() {
            warn!("no listeners were subscribed to the shutdown signal");
        }

        info!("waiting for in-flight requests to drain");
        tokio::time::sleep(self.drain_grace_period).await;

        let components = self.components.lock().await;
        let mut handles = Vec::with_capacity(components.len());
        for component in components.iter() {
            info!("shutting down component: {}", component.name);
            handles.push((component.name.clone(), (component.shutdown_fn)()));
        }
        drop(components);

        for (name, handle) in handles {
            match timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(Ok(()))) => info!("component '{}' shut down cleanly", name),
                Ok(Ok(Err(e))) => error!("component '{}' shutdown failed: {}", name, e),
                Ok(Err(e)) => error!("component '{}' shutdown task panicked: {}", name, e),
                Err(_) => warn!("component '{}' shutdown timed out", name),
            }
        }

        info!("graceful shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn shutdown_broadcasts_to_subscribers() {
        let shutdown = GracefulShutdown::new();
        let mut rx = shutdown.subscribe();
        let handle = tokio::spawn(async move { rx.recv().await.is_ok() });
        shutdown.shutdown().await.unwrap();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn registered_component_runs_during_shutdown() {
        let shutdown = GracefulShutdown::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        shutdown
            .register_component("test-component", move || {
                let ran = ran_clone.clone();
                async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        shutdown.shutdown().await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
