//! Authentication and user-management routes.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use artifactflow_store::{User, UserRole, UserUpdate};

use crate::auth::{hash_password, verify_password};
use crate::error::{ApiError, ApiResult};
use crate::extract::{AdminUser, CurrentUser};
use crate::state::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/users", post(create_user).get(list_users))
        .route("/users/{id}", put(update_user))
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Public view of a user (no hash).
#[derive(Serialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub role: String,
    pub active: bool,
    pub created_at: i64,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role.as_str().to_string(),
            active: user.active,
            created_at: user.created_at,
        }
    }
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Deserialize)]
pub struct CreateUserBody {
    pub username: String,
    pub password: String,
    /// "admin" or "user"; defaults to "user".
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateUserBody {
    pub password: Option<String>,
    pub role: Option<String>,
    pub active: Option<bool>,
}

#[derive(Deserialize)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn parse_role(raw: Option<&str>) -> ApiResult<UserRole> {
    match raw {
        None => Ok(UserRole::User),
        Some(s) => {
            UserRole::from_str(s).map_err(|_| ApiError::Validation(format!("invalid role: {s}")))
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/auth/login
async fn login(
    State(state): State<SharedState>,
    Json(body): Json<LoginBody>,
) -> ApiResult<Json<LoginResponse>> {
    let user = state
        .users
        .get_by_username(&body.username)
        .await
        .map_err(|_| ApiError::Unauthorized("invalid username or password".into()))?;

    if !user.active || !verify_password(&body.password, &user.password_hash) {
        return Err(ApiError::Unauthorized("invalid username or password".into()));
    }

    let access_token = state.auth.create_token(&user)?;
    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer",
        expires_in: state.auth.expires_in_secs(),
        user: user.into(),
    }))
}

/// GET /api/v1/auth/me
async fn me(
    State(state): State<SharedState>,
    CurrentUser(identity): CurrentUser,
) -> ApiResult<Json<UserInfo>> {
    let user = state.users.get(&identity.user_id).await?;
    if !user.active {
        return Err(ApiError::Unauthorized("account is deactivated".into()));
    }
    Ok(Json(user.into()))
}

/// POST /api/v1/auth/users (admin)
async fn create_user(
    State(state): State<SharedState>,
    AdminUser(_admin): AdminUser,
    Json(body): Json<CreateUserBody>,
) -> ApiResult<Json<UserInfo>> {
    if body.password.len() < 8 {
        return Err(ApiError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }
    let role = parse_role(body.role.as_deref())?;
    let password_hash = hash_password(&body.password)?;

    let user = state
        .users
        .create(&body.username, &password_hash, role)
        .await?;
    Ok(Json(user.into()))
}

/// GET /api/v1/auth/users?limit&offset (admin)
async fn list_users(
    State(state): State<SharedState>,
    AdminUser(_admin): AdminUser,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Vec<UserInfo>>> {
    let limit = page.limit.unwrap_or(20).min(100);
    let offset = page.offset.unwrap_or(0);
    let users = state.users.list(limit, offset).await?;
    Ok(Json(users.into_iter().map(UserInfo::from).collect()))
}

/// PUT /api/v1/auth/users/{id} (admin)
async fn update_user(
    State(state): State<SharedState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateUserBody>,
) -> ApiResult<Json<UserInfo>> {
    let role = match body.role.as_deref() {
        Some(raw) => Some(
            UserRole::from_str(raw)
                .map_err(|_| ApiError::Validation(format!("invalid role: {raw}")))?,
        ),
        None => None,
    };
    let password_hash = match body.password.as_deref() {
        Some(plain) if plain.len() < 8 => {
            return Err(ApiError::Validation(
                "password must be at least 8 characters".into(),
            ));
        }
        Some(plain) => Some(hash_password(plain)?),
        None => None,
    };

    let user = state
        .users
        .update(
            &id,
            UserUpdate {
                password_hash,
                role,
                active: body.active,
            },
        )
        .await?;
    Ok(Json(user.into()))
}
