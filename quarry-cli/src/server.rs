//! Internal HTTP server exposing the prober's own metrics

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use tracing::info;

use quarry_resilience::ShutdownToken;

/// Serve `/metrics` and `/healthz` until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    registry: Registry,
    mut shutdown: ShutdownToken,
) -> std::io::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(registry);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn metrics(State(registry): State<Registry>) -> Result<String, StatusCode> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn healthz() -> &'static str {
    "ok"
}
