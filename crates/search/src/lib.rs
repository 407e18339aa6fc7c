//! KGForge Search
//!
//! Graph-augmented retrieval:
//! - Hybrid chunk search (vector + keyword) with score fusion
//! - Grouping of chunks by source document
//! - Similarity-banded entity expansion over the knowledge graph
//! - Deterministic text and metadata per document
//!
//! The `search` binary serves [`RetrievalEngine`] over HTTP.

pub mod aggregate;
pub mod dedup;
pub mod engine;
pub mod expansion;
pub mod format;
pub mod handlers;
pub mod metadata;
pub mod orchestrator;
pub mod rank;
pub mod retrieval;

pub use engine::{RetrievalEngine, RetrievalRequest, RetrievalResponse};
pub use rank::DocumentBundle;

use axum::{
    routing::{get, post},
    Router,
};
use kgforge_common::cache::Cache;
use kgforge_common::graph::GraphStore;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RetrievalEngine>,
    pub store: Arc<dyn GraphStore>,
    pub cache: Option<Arc<Cache>>,
}

/// Create the service router.
///
/// A request exceeding `request_timeout` is answered with 408 and its
/// engine future is dropped, which abandons documents not yet expanded.
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new().route("/retrieve", post(handlers::retrieve::retrieve));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}
