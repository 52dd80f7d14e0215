//! Request extractors for authentication.
//!
//! [`CurrentUser`] pulls and validates the bearer token; [`AdminUser`]
//! additionally requires the admin role. Handlers just declare the
//! extractor they need.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use artifactflow_store::UserRole;

use crate::auth::TokenIdentity;
use crate::error::ApiError;
use crate::state::SharedState;

/// The authenticated caller.
pub struct CurrentUser(pub TokenIdentity);

/// The authenticated caller, verified to be an admin.
pub struct AdminUser(pub TokenIdentity);

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))
}

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let identity = state
            .auth
            .decode_token(token)
            .ok_or_else(|| ApiError::Unauthorized("invalid or expired token".into()))?;
        Ok(CurrentUser(identity))
    }
}

impl FromRequestParts<SharedState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(identity) = CurrentUser::from_request_parts(parts, state).await?;
        if identity.role != UserRole::Admin {
            return Err(ApiError::Forbidden("admin access required".into()));
        }
        Ok(AdminUser(identity))
    }
}
