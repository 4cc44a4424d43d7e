//! Route wiring for the bridge's HTTP surface.
//!
//! ClickHouse drives the bridge through five endpoints: a liveness probe,
//! schema negotiation, identifier quoting, query execution and the reserved
//! write path.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/columns_info", post(handlers::columns_info))
        .route("/identifier_quote", post(handlers::identifier_quote))
        .route("/", post(handlers::query))
        .route("/write", post(handlers::write))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
