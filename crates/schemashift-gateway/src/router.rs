use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::report::report_handler;
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let report_path = normalize_path(&state.config.report_path);

    Router::new()
        .route("/health", get(health))
        .route(&report_path, post(report_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
