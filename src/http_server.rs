use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::SystemTime};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::{metrics::CentralMetrics, pool_manager::PoolManagerHandle, storage::Storage};

/// Operational HTTP endpoints: health, Prometheus metrics and zone stats
pub struct HttpServer {
    state: AppState,
    bind_addr: SocketAddr,
}

#[derive(Clone)]
struct AppState {
    storage: Arc<dyn Storage>,
    metrics: Arc<CentralMetrics>,
    propagation: PoolManagerHandle,
    startup_time: SystemTime,
}

impl HttpServer {
    pub fn new(
        storage: Arc<dyn Storage>,
        metrics: Arc<CentralMetrics>,
        propagation: PoolManagerHandle,
        bind_addr: SocketAddr,
    ) -> Self {
        Self {
            state: AppState {
                storage,
                metrics,
                propagation,
                startup_time: SystemTime::now(),
            },
            bind_addr,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/metrics", get(prometheus_metrics))
            .route("/stats", get(server_stats))
            .with_state(self.state.clone())
            .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
    }

    /// Bind the configured address and serve until shutdown
    pub async fn start(
        self,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener, shutdown_rx).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Starting HTTP server on {}", listener.local_addr()?);

        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("HTTP server received shutdown signal");
            })
            .await?;

        Ok(())
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "healthy"})))
}

async fn refresh_gauges(state: &AppState) {
    match state.storage.domain_counts_by_status().await {
        Ok(counts) => state.metrics.update_zone_counts(&counts),
        Err(e) => error!("Failed to count zones: {}", e),
    }
    state.metrics.set_queue_depth(state.propagation.queue_depth());
}

/// Prometheus metrics endpoint
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    refresh_gauges(&state).await;

    match state.metrics.export() {
        Ok(metrics) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            metrics,
        ),
        Err(e) => {
            error!("Failed to export metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                "Failed to export metrics".to_string(),
            )
        }
    }
}

/// Zone inventory and propagation backlog
async fn server_stats(State(state): State<AppState>) -> impl IntoResponse {
    let counts = match state.storage.domain_counts_by_status().await {
        Ok(counts) => counts,
        Err(e) => {
            error!("Failed to count zones: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": e.to_string()})),
            );
        }
    };

    let zones = counts
        .iter()
        .map(|(status, count)| (status.to_string(), *count))
        .collect::<std::collections::HashMap<_, _>>();

    (
        StatusCode::OK,
        Json(json!({
            "server": {
                "name": "zonecentral",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_seconds": SystemTime::now()
                    .duration_since(state.startup_time)
                    .unwrap_or_default()
                    .as_secs()
            },
            "zones": zones,
            "propagation": {
                "queue_depth": state.propagation.queue_depth(),
                "serial_conflicts": state.metrics.serial_conflicts()
            }
        })),
    )
}
