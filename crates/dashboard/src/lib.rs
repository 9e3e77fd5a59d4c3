//! `dashboard` crate — HTTP monitoring surface.
//!
//! Exposes:
//!   GET /metrics  — JSON snapshot of the run
//!   GET /         — auto-refreshing HTML dashboard
//!
//! The server only consumes [`Monitor`] snapshots; it knows nothing about
//! the scheduler and can be pointed at any live monitor.

pub mod html;

use std::sync::Arc;

use axum::{
    extract::State,
    response::{Html, Json},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;

use engine::{Monitor, MonitorSnapshot};

type AppState = Arc<Monitor>;

async fn metrics(State(monitor): State<AppState>) -> Json<MonitorSnapshot> {
    Json(monitor.snapshot())
}

async fn dashboard(State(monitor): State<AppState>) -> Html<String> {
    Html(html::render(&monitor.snapshot()))
}

/// Build the dashboard router for a monitor.
pub fn router(monitor: Arc<Monitor>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/", get(dashboard))
        .layer(TraceLayer::new_for_http())
        .with_state(monitor)
}

/// Serve the dashboard until the process (or the caller's task) ends.
///
/// # Errors
/// Returns the bind or accept error.
pub async fn serve(bind: &str, monitor: Arc<Monitor>) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("monitoring dashboard listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(monitor)).await
}
