use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::SystemTime};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::{
    config_reload::ConfigReloader, metrics::CoreMetrics, online::OnlineMonitor, resolver::ResolverSet,
};

/// Serves `/healthz`, `/metrics`, `/status`, and (when hot-reload is
/// configured) `/config/reload`. This is the only network-facing surface
/// besides the DNS listener itself, so it stays deliberately small.
pub struct HttpServer {
    resolver_set: Arc<ResolverSet>,
    online_monitor: Arc<OnlineMonitor>,
    metrics: Arc<CoreMetrics>,
    config_reloader: Option<Arc<ConfigReloader>>,
    bind_addr: SocketAddr,
    startup_time: SystemTime,
}

impl HttpServer {
    pub fn new(
        resolver_set: Arc<ResolverSet>,
        online_monitor: Arc<OnlineMonitor>,
        metrics: Arc<CoreMetrics>,
        config_reloader: Option<Arc<ConfigReloader>>,
        bind_addr: SocketAddr,
    ) -> Self {
        Self {
            resolver_set,
            online_monitor,
            metrics,
            config_reloader,
            bind_addr,
            startup_time: SystemTime::now(),
        }
    }

    pub async fn start(self) -> std::io::Result<()> {
        let state = AppState {
            resolver_set: self.resolver_set,
            online_monitor: self.online_monitor,
            metrics: self.metrics,
            config_reloader: self.config_reloader,
            startup_time: self.startup_time,
        };

        let app = Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(prometheus_metrics))
            .route("/status", get(status))
            .route("/config/reload", post(reload_config))
            .with_state(state)
            .layer(CorsLayer::permissive());

        info!("starting http server on {}", self.bind_addr);
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        axum::serve(listener, app).await
    }
}

#[derive(Clone)]
struct AppState {
    resolver_set: Arc<ResolverSet>,
    online_monitor: Arc<OnlineMonitor>,
    metrics: Arc<CoreMetrics>,
    config_reloader: Option<Arc<ConfigReloader>>,
    startup_time: SystemTime,
}

/// Liveness/readiness probe: healthy whenever the device is online enough
/// for queries to stand a chance of succeeding, or the status is still
/// `Unknown` (startup hasn't classified connectivity yet).
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.online_monitor.status();
    let healthy = status.is_online_enough() || status == crate::online::OnlineStatus::Unknown;
    let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(json!({"online_status": format!("{:?}", status)})))
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.export() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
            .body(body)
            .unwrap(),
        Err(e) => {
            error!("failed to export metrics: {}", e);
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(String::new())
                .unwrap()
        }
    }
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let resolvers = state.resolver_set.all();
    let failing = state.resolver_set.failing_resolvers();
    let failing_ids: Vec<&str> = failing.iter().map(|r| r.id()).collect();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": SystemTime::now().duration_since(state.startup_time).unwrap_or_default().as_secs(),
        "online_status": format!("{:?}", state.online_monitor.status()),
        "resolvers": resolvers.iter().map(|r| json!({
            "id": r.id(),
            "source": format!("{:?}", r.source),
            "failing": r.is_failing(),
        })).collect::<Vec<_>>(),
        "failing_resolvers": failing_ids,
    }))
}

async fn reload_config(State(state): State<AppState>) -> impl IntoResponse {
    let Some(reloader) = &state.config_reloader else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "error", "message": "config hot-reload is not enabled"})),
        );
    };

    match reloader.reload_now().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "success"}))),
        Err(e) => {
            error!("config reload via http failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": e.to_string()})),
            )
        }
    }
}
