use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::Json,
};
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::api::handlers::ErrorResponse;
use crate::model::CreateEntityRequest;

pub type Rejection = (StatusCode, Json<ErrorResponse>);

/// Checks a parsed body for required values serde cannot express, such as
/// non-empty strings.
pub trait RequestValidation {
    fn validate(&self) -> Result<(), String>;
}

impl RequestValidation for CreateEntityRequest {
    fn validate(&self) -> Result<(), String> {
        self.validate_required()
    }
}

/// JSON body extractor that classifies parse failures.
///
/// - syntax errors and truncated input: 400 "Invalid JSON format"
/// - a value of the wrong type: 422 "Invalid field type"
/// - missing or empty required fields: 422 "Invalid request fields"
///
/// Nothing downstream runs when extraction fails.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + RequestValidation,
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|rejection| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::with_details(
                    "Invalid request body",
                    &rejection.body_text(),
                )),
            )
        })?;

        let value: T = serde_json::from_slice(&bytes).map_err(|e| classify_json_error(&e))?;

        value.validate().map_err(|details| {
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse::with_details("Invalid request fields", &details)),
            )
        })?;

        Ok(Self(value))
    }
}

pub fn classify_json_error(err: &serde_json::Error) -> Rejection {
    match err.classify() {
        Category::Syntax | Category::Eof | Category::Io => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::with_details(
                "Invalid JSON format",
                &format!("Syntax error: {}", err),
            )),
        ),
        Category::Data if err.to_string().starts_with("missing field") => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::with_details(
                "Invalid request fields",
                &err.to_string(),
            )),
        ),
        Category::Data => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::with_details("Invalid field type", &err.to_string())),
        ),
    }
}
