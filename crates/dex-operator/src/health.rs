//! Liveness and readiness endpoints.
use std::net::SocketAddr;

use axum::{Router, routing::get};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to bind health endpoint to {addr}"))]
    BindHealthEndpoint {
        source: std::io::Error,
        addr: SocketAddr,
    },

    #[snafu(display("failed to serve health endpoint"))]
    ServeHealthEndpoint { source: std::io::Error },
}

/// Routes answering `/healthz` and `/readyz` with `200 ok` for as long as the process runs.
pub fn router() -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
}

/// Serves [`router`] on `addr` until the process exits.
pub async fn serve(addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .context(BindHealthEndpointSnafu { addr })?;
    tracing::info!(%addr, "serving health endpoints");

    axum::serve(listener, router())
        .await
        .context(ServeHealthEndpointSnafu)
}
