//! API error type and HTTP status mapping.
//!
//! The error taxonomy maps onto status codes: validation 400, auth 401,
//! forbidden 403, not-found 404, duplicate 409, everything unexpected 500.
//! Internal details are logged, never sent to the client.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use artifactflow_engine::EngineError;
use artifactflow_store::StoreError;

use crate::auth::AuthError;

/// Alias for handler results.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request, bad params, missing required fields.
    #[error("{0}")]
    Validation(String),

    /// Invalid or expired credentials.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but not allowed.
    #[error("{0}")]
    Forbidden(String),

    /// Entity missing.
    #[error("{0}")]
    NotFound(String),

    /// Unique-key collision.
    #[error("{0}")]
    Duplicate(String),

    /// Unexpected failure; detail stays in the logs.
    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Duplicate(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(ref detail) = self {
            error!(detail = %detail, "internal error");
        }
        let body = json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::Duplicate { .. } => Self::Duplicate(err.to_string()),
            StoreError::InvalidArgument(_) => Self::Validation(err.to_string()),
            // Lock conflicts are recovered inside the agent loop; reaching
            // the HTTP boundary means something is off.
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(store) => store.into(),
            EngineError::InvalidResume { .. } => Self::Forbidden(err.to_string()),
            EngineError::StreamNotFound(_) => Self::NotFound(err.to_string()),
            EngineError::StreamExists(_) => Self::Duplicate(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken => Self::Unauthorized(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Duplicate("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn store_errors_map_to_api_errors() {
        let not_found: ApiError = StoreError::NotFound {
            entity: "conversation",
            id: "c1".into(),
        }
        .into();
        assert!(matches!(not_found, ApiError::NotFound(_)));

        let duplicate: ApiError = StoreError::Duplicate {
            entity: "user",
            id: "bob".into(),
        }
        .into();
        assert!(matches!(duplicate, ApiError::Duplicate(_)));
    }

    #[test]
    fn internal_errors_hide_detail() {
        let err = ApiError::Internal("database exploded at /secret/path".into());
        assert_eq!(err.to_string(), "internal server error");
    }

    #[test]
    fn invalid_resume_is_forbidden() {
        let err: ApiError = EngineError::InvalidResume {
            run_id: "r1".into(),
            reason: "message does not belong to this conversation and run".into(),
        }
        .into();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }
}
