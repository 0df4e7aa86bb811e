//! Request failures and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use pulse_core::{BatchDecodeError, MetricError};
use pulse_envelope::EnvelopeError;
use pulse_state::StateError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] MetricError),

    #[error(transparent)]
    Batch(#[from] BatchDecodeError),

    #[error("malformed request body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("{0}")]
    Forbidden(String),

    #[error("metric not found")]
    NotFound,

    #[error(transparent)]
    Storage(#[from] StateError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::Batch(_)
            | ApiError::Malformed(_)
            | ApiError::BadRequest(_)
            | ApiError::Envelope(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Envelope(e) if e.is_security() => {
                warn!(error = %e, security = true, "rejected request envelope");
            }
            ApiError::Forbidden(reason) => {
                warn!(reason = %reason, security = true, "rejected untrusted client");
            }
            ApiError::Storage(e) => error!(error = %e, "storage failure"),
            _ => {}
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::Validation(MetricError::EmptyId).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Envelope(EnvelopeError::Signature).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Storage(StateError::Write("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
