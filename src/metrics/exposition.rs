//! Scrape endpoint for a running benchmark.
//!
//! `GET /metrics` answers with [`Metrics::export`], `GET /health` with `OK`.
//! The server shuts down gracefully when its token is cancelled.
use std::{future::Future, net::SocketAddr, sync::Arc};

use tokio_util::sync::CancellationToken;
use warp::{Filter, Reply};

use super::Metrics;
use crate::error::StingerError;

/// Bind the scrape endpoint without running it yet.
///
/// Returns the actually bound address (useful with port `0`) and the server
/// future, which completes once `token` is cancelled.
pub fn bind(
    metrics: Arc<Metrics>,
    addr: SocketAddr,
    token: CancellationToken,
) -> Result<(SocketAddr, impl Future<Output = ()> + Send + 'static), StingerError> {
    let scrape = warp::path!("metrics")
        .and(warp::get())
        .map(move || match metrics.export() {
            Ok(text) => {
                warp::reply::with_header(text, "content-type", "text/plain; version=0.0.4")
                    .into_response()
            }
            Err(e) => {
                tracing::error!("metrics export failed: {e}");
                warp::reply::with_status(
                    "Internal Server Error",
                    warp::http::StatusCode::INTERNAL_SERVER_ERROR,
                )
                .into_response()
            }
        });
    let health = warp::path!("health").and(warp::get()).map(|| "OK");

    warp::serve(scrape.or(health))
        .try_bind_with_graceful_shutdown(addr, async move { token.cancelled().await })
        .map_err(|e| StingerError::Exposition(format!("bind {addr}: {e}")))
}

/// Serve the scrape endpoint on `addr` until `token` is cancelled.
pub async fn serve(
    metrics: Arc<Metrics>,
    addr: SocketAddr,
    token: CancellationToken,
) -> Result<(), StingerError> {
    let (bound, server) = bind(metrics, addr, token)?;
    tracing::info!("Serving metrics on http://{bound}/metrics");
    server.await;
    Ok(())
}
