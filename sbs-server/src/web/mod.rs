//! Web server: read-only axum API over the live tracker.
//!
//! Handlers copy out of the tracker table (`get_active`/`get`) and never
//! take the transition lock, so a slow client cannot stall ingest.

use std::sync::Arc;

use axum::http::header::{HeaderValue, CACHE_CONTROL};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use sbs_core::Tracker;

use crate::writer::QueuedWriter;

pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub writer: Option<Arc<QueuedWriter>>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/aircraft", axum::routing::get(routes::api_aircraft))
        .route(
            "/api/aircraft/:address",
            axum::routing::get(routes::api_aircraft_detail),
        )
        .route("/api/stats", axum::routing::get(routes::api_stats))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(cors)
}

/// Serve the API until the token is cancelled.
pub async fn serve(
    state: Arc<AppState>,
    host: &str,
    port: u16,
    token: CancellationToken,
) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(%addr, "dashboard listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await
}
