//! User account persistence.
//!
//! Password hashing lives in the server's auth service; this store only
//! records the resulting hash. Accounts are deactivated rather than deleted
//! so conversation ownership stays resolvable.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier (UUID v7).
    pub id: String,
    /// Unique login name.
    pub username: String,
    /// Password hash (opaque to the store).
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Role-based access level.
    pub role: UserRole,
    /// Whether the user can log in.
    pub active: bool,
    /// Unix timestamp when the user was created.
    pub created_at: i64,
    /// Unix timestamp when the user was last updated.
    pub updated_at: i64,
}

/// Role-based access levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Full access, including user management.
    Admin,
    /// Standard access.
    User,
}

impl UserRole {
    /// Convert from a database string representation.
    pub fn from_str(s: &str) -> StoreResult<Self> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown user role: {other}"
            ))),
        }
    }

    /// Convert to a database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields an admin may change on an existing user. `None` leaves the field
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub password_hash: Option<String>,
    pub role: Option<UserRole>,
    pub active: Option<bool>,
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<(User, String)> {
    let role_str: String = row.get(3)?;
    Ok((
        User {
            id: row.get(0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
            role: UserRole::User, // patched by the caller from role_str
            active: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        },
        role_str,
    ))
}

fn finish_user(pair: (User, String)) -> StoreResult<User> {
    let (mut user, role_str) = pair;
    user.role = UserRole::from_str(&role_str)?;
    Ok(user)
}

const USER_COLS: &str = "id, username, password_hash, role, active, created_at, updated_at";

// ═══════════════════════════════════════════════════════════════════════
//  UserStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD operations on user accounts.
#[derive(Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    /// Create a new user store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user account. Fails with `Duplicate` when the username is
    /// taken.
    #[instrument(skip(self, password_hash))]
    pub async fn create(
        &self,
        username: &str,
        password_hash: &str,
        role: UserRole,
    ) -> StoreResult<User> {
        if username.is_empty() {
            return Err(StoreError::InvalidArgument(
                "username must not be empty".into(),
            ));
        }

        let id = Uuid::now_v7().to_string();
        let username = username.to_string();
        let password_hash = password_hash.to_string();
        let now = Utc::now().timestamp();

        let user = User {
            id: id.clone(),
            username: username.clone(),
            password_hash: password_hash.clone(),
            role,
            active: true,
            created_at: now,
            updated_at: now,
        };

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, username, password_hash, role, active, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
                    rusqlite::params![id, username, password_hash, role.as_str(), now],
                )
                .map_err(|e| match e {
                    rusqlite::Error::SqliteFailure(err, _)
                        if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        StoreError::Duplicate {
                            entity: "user",
                            id: username.clone(),
                        }
                    }
                    other => StoreError::Sqlite(other),
                })?;
                Ok(())
            })
            .await?;

        debug!(user_id = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    /// Fetch a user by id.
    pub async fn get(&self, id: &str) -> StoreResult<User> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let pair = conn
                    .query_row(
                        &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
                        rusqlite::params![id],
                        map_user,
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                            entity: "user",
                            id: id.clone(),
                        },
                        other => StoreError::Sqlite(other),
                    })?;
                finish_user(pair)
            })
            .await
    }

    /// Fetch a user by username (login path).
    pub async fn get_by_username(&self, username: &str) -> StoreResult<User> {
        let username = username.to_string();
        self.db
            .execute(move |conn| {
                let pair = conn
                    .query_row(
                        &format!("SELECT {USER_COLS} FROM users WHERE username = ?1"),
                        rusqlite::params![username],
                        map_user,
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                            entity: "user",
                            id: username.clone(),
                        },
                        other => StoreError::Sqlite(other),
                    })?;
                finish_user(pair)
            })
            .await
    }

    /// List users ordered by creation time, with pagination.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: u32, offset: u32) -> StoreResult<Vec<User>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {USER_COLS} FROM users ORDER BY created_at ASC LIMIT ?1 OFFSET ?2"
                ))?;
                let pairs = stmt
                    .query_map(rusqlite::params![limit, offset], map_user)?
                    .collect::<Result<Vec<_>, _>>()?;
                pairs.into_iter().map(finish_user).collect()
            })
            .await
    }

    /// Apply an admin update to a user.
    #[instrument(skip(self, update))]
    pub async fn update(&self, id: &str, update: UserUpdate) -> StoreResult<User> {
        let id_owned = id.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE users SET \
                         password_hash = COALESCE(?2, password_hash), \
                         role = COALESCE(?3, role), \
                         active = COALESCE(?4, active), \
                         updated_at = ?5 \
                     WHERE id = ?1",
                    rusqlite::params![
                        id_owned,
                        update.password_hash,
                        update.role.map(|r| r.as_str()),
                        update.active,
                        now
                    ],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "user",
                        id: id_owned,
                    });
                }
                Ok(())
            })
            .await?;

        self.get(id).await
    }

    /// Deactivate a user (the normal alternative to deletion).
    pub async fn deactivate(&self, id: &str) -> StoreResult<User> {
        self.update(
            id,
            UserUpdate {
                active: Some(false),
                ..UserUpdate::default()
            },
        )
        .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
