//! Relay error taxonomy and its HTTP mapping

use crate::models::ErrorBody;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or malformed request fields
    #[error("{0}")]
    Validation(String),
    #[error("Invalid NPC name")]
    UnknownCharacter(String),
    #[error("Upstream rate limit exceeded")]
    RateLimited { details: String },
    #[error("Failed to fetch LLM response")]
    Upstream { status: u16, details: String },
    /// Transport failure talking to the completion API
    #[error("Failed to reach LLM provider")]
    Network(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) | RelayError::UnknownCharacter(_) => StatusCode::BAD_REQUEST,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Upstream { .. } | RelayError::Network(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn body(&self) -> ErrorBody {
        let details = match self {
            RelayError::Validation(_) => None,
            RelayError::UnknownCharacter(name) => Some(format!("Unknown character '{}'", name)),
            RelayError::RateLimited { details } => Some(details.clone()),
            RelayError::Upstream { status, details } => {
                Some(format!("API error {}: {}", status, details))
            }
            RelayError::Network(details) => Some(details.clone()),
        };
        ErrorBody {
            error: self.to_string(),
            details,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
