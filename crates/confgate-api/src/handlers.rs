//! Readiness gateway handlers.
//!
//! `GET /configurations` answers immediately whenever it can; only a
//! caller that proves it has seen the current version and brings a
//! positive `block` budget parks on the change distributor. Exactly one
//! of delivery or timeout resolves a parked request.

use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use confgate_core::{Configuration, ReadySet, timefmt};
use confgate_distributor::Waiter;

use crate::{ApiState, INDEX_HEADER};

// Wire error codes carried in the JSON error body.
const ERR_BAD_BLOCK: u32 = 1;
const ERR_INTERNAL: u32 = 2;
const ERR_NOT_FOUND: u32 = 3;

/// Collection body served by `GET /configurations`.
#[derive(Serialize)]
pub struct ConfigurationsResponse {
    pub kind: String,
    #[serde(rename = "self")]
    pub self_link: String,
    pub contents: Vec<ConfigurationDetail>,
}

/// Wire rendering of one configuration bundle.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationDetail {
    #[serde(rename = "self")]
    pub self_link: String,
    pub name: String,
    #[serde(rename = "type")]
    pub config_type: String,
    pub revision: String,
    pub bean_blob_url: String,
    pub org: String,
    pub env: String,
    pub resource_blob_url: String,
    pub path: String,
    pub created: String,
    pub updated: String,
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "errorCode")]
    error_code: u32,
    reason: String,
}

/// Query parameters of `GET /configurations`.
#[derive(Deserialize)]
pub struct ConfigurationsQuery {
    /// Exact-match bundle type filter. Filtered reads never park.
    #[serde(rename = "type")]
    pub config_type: Option<String>,
    /// Wait budget in seconds; 0 or absent answers immediately.
    pub block: Option<String>,
    /// Version token the caller last saw.
    pub token: Option<String>,
}

// ── Configurations ─────────────────────────────────────────────

/// GET /configurations
pub async fn get_configurations(
    State(state): State<ApiState>,
    Query(query): Query<ConfigurationsQuery>,
    headers: HeaderMap,
) -> Response {
    let block_secs = match parse_block(query.block.as_deref()) {
        Ok(secs) => secs,
        Err(resp) => return resp,
    };
    let token = client_token(&query, &headers);
    let current = state.distributor.current_snapshot();

    // Filtered reads resolve against the current snapshot and never park.
    if let Some(filter) = query.config_type.as_deref() {
        return collection_response(&state, &current, Some(filter));
    }

    let Some(token) = token else {
        return collection_response(&state, &current, None);
    };
    if token != current.version_token() {
        return collection_response(&state, &current, None);
    }
    if block_secs == 0 {
        return not_modified(&current);
    }

    long_poll(state, token, block_secs).await
}

async fn long_poll(state: ApiState, token: String, block_secs: u64) -> Response {
    let waiter = match state.distributor.subscribe().await {
        Ok(waiter) => waiter,
        Err(e) => {
            warn!(error = %e, "subscribe failed");
            return internal_error();
        }
    };

    // A settle may have slipped in between the version check and the
    // subscription; re-check so the caller never parks behind a version
    // it has not seen.
    let now = state.distributor.current_snapshot();
    if now.version_token() != token {
        state.distributor.unsubscribe(waiter.id).await;
        return collection_response(&state, &now, None);
    }

    let Waiter { id, delivery } = waiter;
    debug!(%token, block_secs, "request parked awaiting readiness change");
    tokio::select! {
        delivery = delivery => match delivery {
            Ok(Ok(snapshot)) => collection_response(&state, &snapshot, None),
            Ok(Err(e)) => {
                warn!(error = %e, "parked request saw a failed recomputation");
                internal_error()
            }
            Err(_) => {
                warn!("distributor went away under a parked request");
                internal_error()
            }
        },
        _ = sleep(Duration::from_secs(block_secs)) => {
            state.distributor.unsubscribe(id).await;
            not_modified(&state.distributor.current_snapshot())
        }
    }
}

fn parse_block(raw: Option<&str>) -> Result<u64, Response> {
    match raw {
        None => Ok(0),
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
            error_response(
                StatusCode::BAD_REQUEST,
                ERR_BAD_BLOCK,
                "block must be a non-negative integer number of seconds",
            )
        }),
    }
}

/// The version token the caller presented: `token` query parameter first,
/// `If-None-Match` as a fallback.
fn client_token(query: &ConfigurationsQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = &query.token {
        return Some(token.clone());
    }
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().trim_matches('"').to_string())
}

fn collection_response(
    state: &ApiState,
    snapshot: &ReadySet,
    type_filter: Option<&str>,
) -> Response {
    let contents: Vec<ConfigurationDetail> = snapshot
        .configurations
        .iter()
        .filter(|c| type_filter.is_none_or(|t| c.config_type == t))
        .map(|c| configuration_detail(&state.base_url, c))
        .collect();
    let self_link = match type_filter {
        Some(t) => format!("{}/configurations?type={t}", state.base_url),
        None => format!("{}/configurations", state.base_url),
    };
    debug!(
        version = snapshot.version,
        returned = contents.len(),
        "serving readiness snapshot"
    );
    let body = ConfigurationsResponse {
        kind: "Collections".to_string(),
        self_link,
        contents,
    };
    (
        StatusCode::OK,
        [(INDEX_HEADER, snapshot.version_token())],
        Json(body),
    )
        .into_response()
}

fn not_modified(snapshot: &ReadySet) -> Response {
    (
        StatusCode::NOT_MODIFIED,
        [(INDEX_HEADER, snapshot.version_token())],
    )
        .into_response()
}

fn configuration_detail(base_url: &str, config: &Configuration) -> ConfigurationDetail {
    ConfigurationDetail {
        self_link: format!("{base_url}/configurations/{}", config.id),
        name: config.name.clone(),
        config_type: config.config_type.clone(),
        revision: config.revision.clone(),
        bean_blob_url: blob_url(base_url, &config.bean_blob_id),
        org: config.org_id.clone(),
        env: config.env_id.clone(),
        resource_blob_url: blob_url(base_url, &config.resource_blob_id),
        path: config.path.clone(),
        created: timefmt::to_iso8601(&config.created),
        updated: timefmt::to_iso8601(&config.updated),
    }
}

fn blob_url(base_url: &str, blob_id: &str) -> String {
    if blob_id.is_empty() {
        String::new()
    } else {
        format!("{base_url}/blob/{blob_id}")
    }
}

fn error_response(status: StatusCode, error_code: u32, reason: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error_code,
            reason: reason.to_string(),
        }),
    )
        .into_response()
}

/// Storage and recomputation detail stays in the log, never the body.
fn internal_error() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ERR_INTERNAL,
        "internal error",
    )
}

// ── Configuration detail ───────────────────────────────────────

/// GET /configurations/{config_id}
pub async fn get_configuration_by_id(
    State(state): State<ApiState>,
    Path(config_id): Path<String>,
) -> Response {
    match state.store.configuration_by_id(&config_id) {
        Ok(Some(config)) => Json(configuration_detail(&state.base_url, &config)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            ERR_NOT_FOUND,
            "configuration not found",
        ),
        Err(e) => {
            warn!(error = %e, %config_id, "configuration lookup failed");
            internal_error()
        }
    }
}

// ── Blobs ──────────────────────────────────────────────────────

/// GET /blob/{blob_id}
pub async fn get_blob(State(state): State<ApiState>, Path(blob_id): Path<String>) -> Response {
    let local_path = match state.tracker.lookup(&blob_id) {
        Ok(Some(path)) => path,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, ERR_NOT_FOUND, "blob not available");
        }
        Err(e) => {
            warn!(error = %e, %blob_id, "blob lookup failed");
            return internal_error();
        }
    };

    match tokio::fs::File::open(&local_path).await {
        Ok(file) => {
            let stream = ReaderStream::new(file);
            (
                StatusCode::OK,
                [("content-type", "application/octet-stream")],
                Body::from_stream(stream),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, %blob_id, %local_path, "blob file unreadable");
            internal_error()
        }
    }
}
