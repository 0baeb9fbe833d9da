//! Opaque session tokens with purpose prefixes, argon2 password hashing,
//! and the `AuthUser` extractor.
//!
//! Tokens are never JWTs: each is a random string stamped with a
//! purpose-indicating prefix (`vox_sess_`, `mfa_`, `setup_totp_`,
//! `setup_webauthn_`, `fed_`, `whk_`, `pair_`, `media_`),
//! hashed with SHA-256 for storage/lookup (`models::Session.token_hash`),
//! and checked against the endpoint's expected prefix before being accepted
//! — a `mfa_` token can never authenticate an ordinary API call.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json, RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::state::AppState;

/// Session-lifetime of a normal login token.
pub const PREFIX_SESSION: &str = "vox_sess_";
pub const PREFIX_MFA: &str = "mfa_";
pub const PREFIX_SETUP_TOTP: &str = "setup_totp_";
pub const PREFIX_SETUP_WEBAUTHN: &str = "setup_webauthn_";
pub const PREFIX_FEDERATION: &str = "fed_";
pub const PREFIX_WEBHOOK: &str = "whk_";
pub const PREFIX_PAIR: &str = "pair_";
pub const PREFIX_MEDIA: &str = "media_";

// ============================================================================
// Password hashing
// ============================================================================

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            tracing::error!("Failed to hash password: {:?}", e);
            AppError::Internal
        })
}

/// Verifies a password, running a dummy verification on "no such user" to
/// keep the timing profile constant regardless of whether the account
/// exists.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

static DUMMY_HASH: once_cell::sync::Lazy<String> =
    once_cell::sync::Lazy::new(|| hash_password("__dummy__").expect("dummy hash must succeed"));

/// Run when no user/password hash exists, so failed-username and
/// wrong-password paths take the same amount of time.
pub fn verify_dummy_password(password: &str) {
    let _ = verify_password(password, &DUMMY_HASH);
}

// ============================================================================
// Opaque token generation and hashing
// ============================================================================

/// Generate a fresh token with the given purpose prefix. 48 random bytes,
/// base64url-encoded (matching `secrets.token_urlsafe(48)` in the original).
pub fn generate_token(prefix: &str) -> String {
    let mut bytes = [0u8; 48];
    OsRng.fill_bytes(&mut bytes);
    format!(
        "{prefix}{}",
        base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
    )
}

/// SHA-256 hex digest used for deterministic DB lookup — tokens are never
/// stored in plaintext.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A token authenticates only at endpoints that accept its prefix
/// (invariant 6). Callers pass the expected prefix for the surface being
/// guarded; mismatches are rejected before the hash is even looked up.
pub fn token_has_prefix(token: &str, expected_prefix: &str) -> bool {
    token.starts_with(expected_prefix)
}

/// Issue a new `vox_sess_`-prefixed session and persist its hash.
pub async fn create_session(pool: &PgPool, user_id: i64, lifetime_days: i64) -> AppResult<String> {
    let token = generate_token(PREFIX_SESSION);
    let token_hash = hash_token(&token);
    let expires_at = Utc::now() + Duration::days(lifetime_days);

    sqlx::query(
        "INSERT INTO sessions (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
    )
    .bind(user_id)
    .bind(&token_hash)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(token)
}

/// Resolve a bearer token of the given purpose prefix to its owning user.
/// Used both by REST auth middleware and by the gateway's `identify`/`resume`
/// handlers.
pub async fn authenticate_token(pool: &PgPool, token: &str, expected_prefix: &str) -> AppResult<User> {
    if !token_has_prefix(token, expected_prefix) {
        return Err(AppError::Auth("Invalid token type".into()));
    }
    let token_hash = hash_token(token);

    let user: Option<User> = sqlx::query_as(
        "SELECT u.id, u.username, u.display_name, u.password_hash, u.avatar_url,
                u.federated, u.home_domain, u.active,
                u.created_at, u.updated_at
         FROM users u
         JOIN sessions s ON s.user_id = u.id
         WHERE s.token_hash = $1 AND s.expires_at > now() AND u.active = true",
    )
    .bind(&token_hash)
    .fetch_optional(pool)
    .await?;

    user.ok_or_else(|| AppError::Auth("Invalid or expired token".into()))
}

pub async fn cleanup_expired_sessions(pool: &PgPool) -> AppResult<()> {
    sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
        .execute(pool)
        .await?;
    Ok(())
}

// ============================================================================
// Auth extractor
// ============================================================================

/// Authenticated user extracted from a valid `vox_sess_` bearer token.
///
/// Fields are private: the only valid constructor is the `FromRequestParts`
/// impl, preventing callers from forging an `AuthUser` via struct literal.
pub struct AuthUser {
    user_id: i64,
    username: String,
}

impl AuthUser {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

type AuthRejection = (StatusCode, Json<serde_json::Value>);

fn auth_error(message: &str) -> AuthRejection {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": { "code": "UNAUTHORIZED", "message": message } })),
    )
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| auth_error("Missing or invalid Authorization header"))?;

        let user = authenticate_token(&state.pool, bearer.token(), PREFIX_SESSION)
            .await
            .map_err(|_| auth_error("Invalid or expired token"))?;

        Ok(AuthUser {
            user_id: user.id,
            username: user.username,
        })
    }
}
