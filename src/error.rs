use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("parameter '{name}' = {value} is outside [{min}, {max}]")]
    ParameterOutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("postprocessing failed: {0}")]
    Postprocessing(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Admission failures, raised before any backend call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ServiceError::Validation(_) | ServiceError::ParameterOutOfRange { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        if self.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::Generation(format!("malformed backend response: {err}"))
        } else {
            ServiceError::BackendUnavailable(err.to_string())
        }
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::Validation(rejection.body_text())
    }
}

/// Error envelope shared by every route.
pub fn error_body(message: &str) -> serde_json::Value {
    serde_json::json!({
        "status": "error",
        "error": message,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = error_body(&self.to_string());

        (status, axum::Json(body)).into_response()
    }
}
