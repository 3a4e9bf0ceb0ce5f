//! Health probe endpoint
//!
//! Load balancers and orchestration health checks hit this plain-HTTP
//! endpoint; it says nothing about the fabric beyond "the process is up".

use axum::Router;
use axum::routing::get;
use tracing::info;

/// Port the probe endpoint listens on
pub const PROBE_PORT: u16 = 61226;

/// Serve the probe endpoint until the listener fails
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let app = Router::new().route("/", get(|| async { "OK" }));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "probe server ready");
    axum::serve(listener, app).await?;
    Ok(())
}
