use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::assignment::AssignmentStore;
use crate::error::ServiceError;
use crate::runner::QueryOutput;
use crate::service::{QueryService, SubmissionOutcome};

#[derive(Clone)]
pub struct AppState {
    pub service: QueryService,
    pub store: AssignmentStore,
}

pub fn router(service: QueryService, store: AssignmentStore) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/assignments", get(list_assignments))
        .route("/api/assignments/:id", get(get_assignment))
        .route("/api/assignments/:id/preview", get(preview_assignment))
        .route("/api/queries/execute", post(execute_query))
        .with_state(AppState { service, store })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest {
    query: String,
    assignment_id: String,
}

async fn execute_query(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Response {
    let Some(assignment) = state.store.get(&req.assignment_id) else {
        return not_found();
    };

    match state.service.submit(assignment, &req.query).await {
        Ok(SubmissionOutcome::Rejected { reason }) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": reason })),
        )
            .into_response(),
        Ok(SubmissionOutcome::Failed(failure)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": failure.message,
                "details": {
                    "kind": failure.kind,
                    "executionTime": failure.elapsed_ms,
                }
            })),
        )
            .into_response(),
        Ok(SubmissionOutcome::Completed { output, verdict }) => {
            let fields: Vec<serde_json::Value> = output
                .columns
                .iter()
                .map(|f| json!({ "name": f.name, "typeId": f.type_id }))
                .collect();
            Json(json!({
                "success": true,
                "data": {
                    "rows": rows_as_objects(&output),
                    "rowCount": output.row_count,
                    "fields": fields,
                    "executionTime": output.elapsed_ms,
                    "isCorrect": verdict.is_correct,
                    "evaluation": verdict,
                }
            }))
            .into_response()
        }
        Err(err) => internal_error(err),
    }
}

async fn list_assignments(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": state.store.summaries() }))
}

async fn get_assignment(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get(&id) {
        Some(assignment) => Json(json!({ "success": true, "data": assignment })).into_response(),
        None => not_found(),
    }
}

async fn preview_assignment(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(assignment) = state.store.get(&id) else {
        return not_found();
    };
    match state.service.preview(assignment).await {
        Ok(previews) => Json(json!({ "success": true, "data": previews })).into_response(),
        Err(err) => internal_error(err),
    }
}

fn rows_as_objects(output: &QueryOutput) -> Vec<serde_json::Value> {
    output
        .rows
        .iter()
        .map(|row| {
            let mut obj = serde_json::Map::new();
            for (field, value) in output.columns.iter().zip(row) {
                obj.insert(
                    field.name.clone(),
                    serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
                );
            }
            serde_json::Value::Object(obj)
        })
        .collect()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "Assignment not found" })),
    )
        .into_response()
}

fn internal_error(err: ServiceError) -> Response {
    error!(error = %err, "submission failed before query execution");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "success": false,
            "error": "Internal error while preparing the assignment sandbox"
        })),
    )
        .into_response()
}
