//! confgate-api — REST API for Confgate.
//!
//! Provides axum route handlers for the readiness long-poll gateway and
//! blob retrieval.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/configurations` | Ready configurations, with optional long-poll |
//! | GET | `/configurations/{config_id}` | Single configuration detail |
//! | GET | `/blob/{blob_id}` | Raw bytes of a downloaded blob |
//!
//! `/configurations` accepts `type` (exact-match filter, never parks),
//! `block` (wait budget in seconds) and `token` (the version the caller
//! last saw; `If-None-Match` works as a fallback). Every response carries
//! the current version in the `x-confgate-index` header.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use confgate_distributor::{DistributorHandle, FetchTracker};
use confgate_state::ConfigStore;

/// Response header carrying the readiness version token.
pub const INDEX_HEADER: &str = "x-confgate-index";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn ConfigStore>,
    pub distributor: DistributorHandle,
    pub tracker: FetchTracker,
    /// Base URL used in self links and blob URLs, e.g. `http://host:9000`.
    pub base_url: String,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/configurations", get(handlers::get_configurations))
        .route(
            "/configurations/{config_id}",
            get(handlers::get_configuration_by_id),
        )
        .route("/blob/{blob_id}", get(handlers::get_blob))
        .with_state(state)
}
