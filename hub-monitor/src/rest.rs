use crate::errors::Error;
use crate::model::{Alert, AlertFilter, ApiResponse, CreateReadingRequest, Reading, ReadingFilter};
use crate::pipeline::IngestionPipeline;
use crate::store::Store;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
struct AppState {
    pipeline: IngestionPipeline,
    store: Arc<dyn Store>,
}

#[derive(Debug, Serialize)]
struct IngestData {
    reading: Option<Reading>,
    alert_triggered: bool,
}

pub fn create_router(pipeline: IngestionPipeline, store: Arc<dyn Store>) -> Router {
    let state = AppState { pipeline, store };

    Router::new()
        .route("/health", get(health))
        .route("/v1/sensors/insert", post(insert_reading))
        .route("/api/v1/readings", get(get_readings))
        .route("/api/v1/alerts", get(get_alerts))
        .route("/api/v1/alerts/:id", get(get_alert))
        .route("/api/v1/alerts/:id/resolve", patch(resolve_alert))
        .with_state(state)
}

async fn health() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::ok("healthy", "ok"))
}

async fn insert_reading(
    State(state): State<AppState>,
    body: Result<Json<CreateReadingRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!("Rejected reading body: {}", rejection);
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::failure("invalid request body")),
            )
                .into_response();
        }
    };

    match state.pipeline.ingest(request).await {
        Ok(result) => Json(ApiResponse::ok(
            "readings inserted successfully",
            IngestData {
                reading: Some(result.reading),
                alert_triggered: result.alert_triggered,
            },
        ))
        .into_response(),
        Err(failure) => {
            let (status, message) = match &failure.source {
                Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                _ if failure.reading.is_some() => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "reading stored but alert processing failed".to_string(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to insert readings".to_string(),
                ),
            };
            let body = ApiResponse {
                success: false,
                message,
                data: Some(IngestData {
                    reading: failure.reading,
                    alert_triggered: failure.alert_triggered,
                }),
            };
            (status, Json(body)).into_response()
        }
    }
}

async fn get_readings(
    State(state): State<AppState>,
    Query(params): Query<ReadingFilter>,
) -> Result<Json<ApiResponse<Vec<Reading>>>, AppError> {
    let readings = state.store.list_readings(&params).await?;
    Ok(Json(ApiResponse::ok("sensor readings", readings)))
}

async fn get_alerts(
    State(state): State<AppState>,
    Query(params): Query<AlertFilter>,
) -> Result<Json<ApiResponse<Vec<Alert>>>, AppError> {
    let alerts = state.store.list_alerts(&params).await?;
    Ok(Json(ApiResponse::ok("alerts", alerts)))
}

async fn get_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Alert>>, AppError> {
    let alert = state.store.get_alert(&id).await?;
    Ok(Json(ApiResponse::ok("alert", alert)))
}

async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Alert>>, AppError> {
    let alert = state.store.resolve_alert(&id).await?;
    Ok(Json(ApiResponse::ok("alert resolved", alert)))
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<Error>() {
            Some(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(Error::Validation(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("API error: {}", self.0);
        }

        let message = if status.is_server_error() {
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(ApiResponse::failure(message))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
