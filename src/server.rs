use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::error::{InsightError, Result};
use crate::interface::QueryInterface;

#[derive(Serialize)]
struct ApiResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn result(value: JsonValue) -> Self {
        Self {
            result: Some(value),
            error: None,
        }
    }
    fn error(message: String) -> Self {
        Self {
            result: None,
            error: Some(message),
        }
    }
}

// Each error kind maps to its own status so clients can tell "fix your
// query" (400) from "narrow your query" (413) from "no such dataset" (404).
fn status_for(error: &InsightError) -> StatusCode {
    match error {
        InsightError::Validation(_) => StatusCode::BAD_REQUEST,
        InsightError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        InsightError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(interface: Arc<QueryInterface>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/query", post(run_query))
        .route("/dataset/:id/:kind", put(add_dataset))
        .route("/dataset/:id", delete(remove_dataset))
        .route("/datasets", get(list_datasets))
        .with_state(interface)
        .layer(cors)
}

async fn run_query(
    State(interface): State<Arc<QueryInterface>>,
    Json(body): Json<JsonValue>,
) -> (StatusCode, Json<ApiResponse>) {
    // the engine is synchronous, so evaluation runs on a blocking thread
    let started = std::time::Instant::now();
    let outcome = tokio::task::spawn_blocking(move || interface.run_query(&body)).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    match outcome {
        Ok(Ok(rows)) => {
            info!(ms = elapsed_ms, rows = rows.len(), "query complete");
            match serde_json::to_value(rows) {
                Ok(result) => (StatusCode::OK, Json(ApiResponse::result(result))),
                Err(error) => failure(&InsightError::Storage(error.to_string()), "query"),
            }
        }
        Ok(Err(error)) => failure(&error, "query"),
        Err(error) => join_failure(error),
    }
}

async fn add_dataset(
    State(interface): State<Arc<QueryInterface>>,
    Path((id, kind)): Path<(String, String)>,
    Json(body): Json<JsonValue>,
) -> (StatusCode, Json<ApiResponse>) {
    let outcome =
        tokio::task::spawn_blocking(move || interface.add_dataset(&id, &kind, &body)).await;
    match outcome {
        Ok(result) => respond(result.and_then(|ids| serde_json::to_value(ids).map_err(Into::into)), "add dataset"),
        Err(error) => join_failure(error),
    }
}

async fn remove_dataset(
    State(interface): State<Arc<QueryInterface>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(
        interface
            .remove_dataset(&id)
            .and_then(|id| serde_json::to_value(id).map_err(Into::into)),
        "remove dataset",
    )
}

async fn list_datasets(
    State(interface): State<Arc<QueryInterface>>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(
        interface
            .list_datasets()
            .and_then(|infos| serde_json::to_value(infos).map_err(Into::into)),
        "list datasets",
    )
}

fn respond(outcome: Result<JsonValue>, what: &str) -> (StatusCode, Json<ApiResponse>) {
    match outcome {
        Ok(result) => (StatusCode::OK, Json(ApiResponse::result(result))),
        Err(error) => failure(&error, what),
    }
}

fn failure(error: &InsightError, what: &str) -> (StatusCode, Json<ApiResponse>) {
    let status = status_for(error);
    warn!(%error, code = %status.as_u16(), "{} failed", what);
    (status, Json(ApiResponse::error(error.to_string())))
}

fn join_failure(error: tokio::task::JoinError) -> (StatusCode, Json<ApiResponse>) {
    warn!(error = %error, "join error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error("internal error".into())),
    )
}
