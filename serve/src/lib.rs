//! HTTP surface for the atelier control-plane (axum).
//!
//! Thin request handlers over the core: session CRUD, message ingestion
//! through worker spaces, plan creation/execution, approval decisions, and
//! the NDJSON streaming endpoint. Domain events never get broadcast from a
//! handler — they go through the outbox and reach clients via the publisher.
//!
//! **Public API**: [`AppState`], [`router`], [`run_serve`],
//! [`run_serve_on_listener`].

mod app;
mod error;
mod identity;
mod routes;

pub use app::{router, AppState};
pub use error::ApiError;

use tokio::net::TcpListener;

const DEFAULT_ADDR: &str = "127.0.0.1:8000";

/// Serves on an existing listener. Tests bind to `127.0.0.1:0` and pass the
/// listener in.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    tracing::info!("http server listening on http://{}", addr);

    state.broker.start().await;
    state.publisher.start().await;

    let app = router(state.clone());
    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown(&shutdown_state).await;
        })
        .await?;
    Ok(())
}

/// Binds `addr` (default 127.0.0.1:8000) and serves until ctrl-c.
pub async fn run_serve(
    addr: Option<&str>,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, state).await
}

/// Orderly teardown: stop accepting outbox work, close streams, drop spaces.
async fn shutdown(state: &AppState) {
    state.publisher.stop().await;
    state.broker.stop().await;
    state.manager.cleanup_all().await;
}
