//! HTTP front end.
//!
//! Thin glue over the core: parses requests, delegates to the ingestion
//! pipeline and query engine, and relays results in the service's wire
//! format.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/add` | Ingest a batch of passages (`{"texts": [..]}` or `{"text": ".."}`) |
//! | `POST` | `/query` | Rank stored passages against a query text |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Success bodies are `{"success": true, "items": <count|list>}`. Failures
//! are `{"success": false, "error": <message>}` — 400 for malformed payloads,
//! 5xx for handler errors, 404 (`"not found"`) for unknown routes.
//!
//! On graceful shutdown (SIGINT) the store is flushed to disk before the
//! process exits.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::StoreError;
use crate::ingest::ingest_batch;
use crate::persist;
use crate::query::run_query;
use crate::store::VectorStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
}

/// Start the HTTP service: spawn the housekeeping loop, serve until SIGINT,
/// then flush the store to disk.
pub async fn run_server(
    config: &Config,
    store: Arc<VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let data_dir = config.store.data_dir.clone();
    let config = Arc::new(config.clone());

    tokio::spawn(persist::run_housekeeping(
        store.clone(),
        config.persistence.clone(),
        data_dir.clone(),
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState {
        config,
        store: store.clone(),
        provider,
    };

    let app = Router::new()
        .route("/add", post(handle_add))
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .fallback(handle_not_found)
        .layer(cors)
        .with_state(state);

    tracing::info!(addr = %bind_addr, "listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(records = store.len(), "shutting down, flushing store");
    persist::save(&store.snapshot(), &data_dir)?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
    }
}

// ============ Error response ============

/// Handler error that renders as `{"success": false, "error": <message>}`.
struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match err {
            StoreError::Validation(_) => StatusCode::BAD_REQUEST,
            StoreError::Provider(_) => StatusCode::BAD_GATEWAY,
            StoreError::CorruptState(_) | StoreError::InvariantViolation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

// ============ POST /add ============

/// Request body for `/add`. The batch form (`texts`) is primary; the single
/// form (`text`) is kept for older clients.
#[derive(Deserialize)]
struct AddRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    texts: Option<Vec<String>>,
}

#[derive(Serialize)]
struct AddResponse {
    success: bool,
    items: usize,
}

/// Handler for `POST /add`.
///
/// Runs the batch through the ingestion pipeline under the configured time
/// budget and reports the number of passages actually added. Per-item
/// provider failures do not fail the request.
async fn handle_add(
    State(state): State<AppState>,
    body: Json<serde_json::Value>,
) -> Result<Json<AddResponse>, ApiError> {
    let request: AddRequest =
        serde_json::from_value(body.0).map_err(|e| bad_request(format!("invalid payload: {}", e)))?;

    let texts = match (request.texts, request.text) {
        (Some(texts), _) => texts,
        (None, Some(text)) => vec![text],
        (None, None) => return Err(bad_request("missing field: text or texts")),
    };
    // An empty batch is a valid no-op; front ends post whatever their
    // scrapers found, which can be nothing.
    if texts.is_empty() {
        return Ok(Json(AddResponse {
            success: true,
            items: 0,
        }));
    }

    let budget = Duration::from_secs(state.config.ingest.time_budget_secs);
    let outcome = ingest_batch(&state.store, state.provider.as_ref(), &texts, budget).await;

    tracing::debug!(
        added = outcome.added,
        skipped = outcome.skipped,
        failed = outcome.failed,
        out_of_time = outcome.out_of_time,
        "ingestion batch finished"
    );

    Ok(Json(AddResponse {
        success: true,
        items: outcome.added,
    }))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    text: String,
}

#[derive(Serialize)]
struct QueryResponse {
    success: bool,
    items: Vec<String>,
}

/// Handler for `POST /query`.
///
/// Embeds the query and returns the ranked, budgeted passages. An empty
/// store yields an empty list, not an error.
async fn handle_query(
    State(state): State<AppState>,
    body: Json<serde_json::Value>,
) -> Result<Json<QueryResponse>, ApiError> {
    let request: QueryRequest =
        serde_json::from_value(body.0).map_err(|e| bad_request(format!("invalid payload: {}", e)))?;

    let items = run_query(
        &state.store,
        state.provider.as_ref(),
        &state.config.retrieval,
        &request.text,
    )
    .await?;

    Ok(Json(QueryResponse {
        success: true,
        items,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    records: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        records: state.store.len(),
    })
}

// ============ Fallback ============

async fn handle_not_found() -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        message: "not found".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_request_accepts_both_forms() {
        let batch: AddRequest =
            serde_json::from_value(serde_json::json!({ "texts": ["a", "b"] })).unwrap();
        assert_eq!(batch.texts.unwrap().len(), 2);

        let single: AddRequest =
            serde_json::from_value(serde_json::json!({ "text": "solo" })).unwrap();
        assert_eq!(single.text.as_deref(), Some("solo"));
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody {
            success: false,
            error: "not found".to_string(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "success": false, "error": "not found" }));
    }
}
