//! Authentication: argon2 password hashing and HS256 JWTs.
//!
//! Claims carry `{sub, username, role, iat, exp}`. Tokens are stateless;
//! deactivating a user is enforced at login and on `/auth/me`, not by
//! revocation.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use artifactflow_store::{User, UserRole};

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("invalid or expired token")]
    InvalidToken,
}

// ---------------------------------------------------------------------------
// Password hashing
// ---------------------------------------------------------------------------

/// Hash a password with argon2id and a fresh random salt.
pub fn hash_password(plain: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| AuthError::Hash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored argon2 hash.
///
/// A malformed stored hash verifies as false rather than erroring, so a
/// corrupt row cannot be used to probe the system.
pub fn verify_password(plain: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// JWT
// ---------------------------------------------------------------------------

/// JWT claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub username: String,
    pub role: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// The identity decoded from a valid bearer token.
#[derive(Debug, Clone)]
pub struct TokenIdentity {
    pub user_id: String,
    pub username: String,
    pub role: UserRole,
}

/// Signs and verifies access tokens.
#[derive(Clone)]
pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry_days: i64,
}

impl AuthService {
    pub fn new(secret: &str, expiry_days: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry_days,
        }
    }

    /// Token lifetime in seconds (the `expires_in` login field).
    pub fn expires_in_secs(&self) -> i64 {
        self.expiry_days * 24 * 60 * 60
    }

    /// Issue an access token for a user.
    pub fn create_token(&self, user: &User) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            role: user.role.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::days(self.expiry_days)).timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Decode and validate a token. `None` for anything invalid or expired.
    pub fn decode_token(&self, token: &str) -> Option<TokenIdentity> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default()).ok()?;
        let role = UserRole::from_str(&data.claims.role).ok()?;
        Some(TokenIdentity {
            user_id: data.claims.sub,
            username: data.claims.username,
            role,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
