use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::validated_json::ValidatedJson;
use crate::logic::{UpsertError, UpsertWorkflow};
use crate::model::{
    CreateEntityRequest, CreateEntityResponse, HistoricalInstance, InstanceWithPosition,
    LatestInstance,
};
use crate::store::traits::Store;

pub type AppState<S> = Arc<S>;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
            details: None,
        }
    }

    pub fn with_details(message: &str, details: &str) -> Self {
        Self {
            error: message.to_string(),
            details: Some(details.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoricalQuery {
    /// Window size in seconds.
    pub interval: Option<String>,
}

fn upsert_error_response(err: UpsertError) -> (StatusCode, Json<ErrorResponse>) {
    match &err {
        UpsertError::InvalidRequest { field, message } => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::with_details(
                &format!("Invalid {}", field),
                message,
            )),
        ),
        UpsertError::Conflict { .. } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new(&err.to_string())),
        ),
        UpsertError::Persistence { .. } => {
            error!("Entity upsert failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(&err.to_string())),
            )
        }
    }
}

fn store_error_response(err: anyhow::Error) -> (StatusCode, Json<ErrorResponse>) {
    error!("Store read failed: {:#}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(&format!("{:#}", err))),
    )
}

/// POST /v1/api/entity
pub async fn create_entity<S: Store>(
    State(store): State<AppState<S>>,
    ValidatedJson(request): ValidatedJson<CreateEntityRequest>,
) -> ApiResult<CreateEntityResponse> {
    info!(
        "Entity upsert for '{}' from '{}'",
        request.name, request.integration_source
    );

    UpsertWorkflow::process_entity_upsert(store.as_ref(), request)
        .await
        .map(Json)
        .map_err(upsert_error_response)
}

/// GET /v1/api/entity/instances
pub async fn list_instances<S: Store>(
    State(store): State<AppState<S>>,
) -> ApiResult<Vec<InstanceWithPosition>> {
    store
        .list_instances()
        .await
        .map(Json)
        .map_err(store_error_response)
}

/// GET /v1/api/entity/instances/latest
pub async fn latest_instances<S: Store>(
    State(store): State<AppState<S>>,
) -> ApiResult<Vec<LatestInstance>> {
    store
        .latest_instances()
        .await
        .map(Json)
        .map_err(store_error_response)
}

/// GET /v1/api/entity/instances/historical?interval=N
pub async fn historical_instances<S: Store>(
    State(store): State<AppState<S>>,
    Query(query): Query<HistoricalQuery>,
) -> ApiResult<Vec<HistoricalInstance>> {
    let Some(interval) = query.interval.filter(|i| !i.is_empty()) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("interval parameter is required")),
        ));
    };

    let window_seconds = match interval.parse::<i64>() {
        Ok(seconds) if seconds > 0 => seconds,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("invalid interval parameter")),
            ))
        }
    };

    store
        .historical_instances(window_seconds)
        .await
        .map(Json)
        .map_err(store_error_response)
}
