//! Tracking error types

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use summithub_core::SummitHubError;
use thiserror::Error;

/// Errors surfaced by the tracking aggregator
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error(transparent)]
    Validation(#[from] SummitHubError),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session already ended: {0}")]
    SessionEnded(String),

    /// Storage failure, carrying the repository's message
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TrackingError>;

impl actix_web::ResponseError for TrackingError {
    fn status_code(&self) -> StatusCode {
        match self {
            TrackingError::Validation(_) => StatusCode::BAD_REQUEST,
            TrackingError::NotFound(_) => StatusCode::NOT_FOUND,
            TrackingError::SessionEnded(_) => StatusCode::CONFLICT,
            TrackingError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            TrackingError::Validation(e) => serde_json::json!({
                "error": self.to_string(),
                "field": e.field(),
            }),
            TrackingError::Persistence(e) => {
                tracing::error!(error = ?e, "Tracking storage failure");
                serde_json::json!({ "error": "Internal storage error" })
            }
            _ => serde_json::json!({ "error": self.to_string() }),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}
