//! Local account auth — register/login/refresh issuing `vox_sess_`-prefixed
//! opaque tokens, plus a `/auth/2fa` status stub that reports TOTP/WebAuthn
//! enrollment without implementing either — out of scope for this crate.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    auth::{self, AuthUser},
    error::{AppError, AppResult},
    models::{User, UserDto},
    snowflake,
    state::AppState,
};

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 32))]
    pub username: String,
    #[validate(length(min = 8))]
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserDto,
}

#[derive(Debug, Serialize)]
pub struct TwoFactorStatus {
    pub totp_enabled: bool,
    pub webauthn_enabled: bool,
    pub recovery_codes_left: u32,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    req.validate().map_err(|e| AppError::Validation(e.to_string()))?;

    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM users WHERE username = $1 AND home_domain IS NULL",
    )
    .bind(&req.username)
    .fetch_optional(&state.pool)
    .await?;
    if existing.is_some() {
        return Err(AppError::Conflict("Username already taken".into()));
    }

    let password_hash = auth::hash_password(&req.password)?;
    let id = snowflake::next_id();

    let user: User = sqlx::query_as(
        "INSERT INTO users (id, username, display_name, password_hash)
         VALUES ($1, $2, $3, $4)
         RETURNING id, username, display_name, password_hash, avatar_url,
                   federated, home_domain, active,
                   created_at, updated_at",
    )
    .bind(id)
    .bind(&req.username)
    .bind(&req.display_name)
    .bind(&password_hash)
    .fetch_one(&state.pool)
    .await?;

    let token = auth::create_session(&state.pool, user.id, state.config.session_lifetime_days).await?;

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user: user.into() })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    req.validate().map_err(|e| AppError::Validation(e.to_string()))?;

    let user: Option<User> = sqlx::query_as(
        "SELECT id, username, display_name, password_hash, avatar_url,
                federated, home_domain, active,
                created_at, updated_at
         FROM users WHERE username = $1 AND home_domain IS NULL AND active = true",
    )
    .bind(&req.username)
    .fetch_optional(&state.pool)
    .await?;

    let Some(user) = user else {
        auth::verify_dummy_password(&req.password);
        return Err(AppError::Auth("Invalid username or password".into()));
    };

    let Some(ref hash) = user.password_hash else {
        auth::verify_dummy_password(&req.password);
        return Err(AppError::Auth("Invalid username or password".into()));
    };
    if !auth::verify_password(&req.password, hash) {
        return Err(AppError::Auth("Invalid username or password".into()));
    }

    let token = auth::create_session(&state.pool, user.id, state.config.session_lifetime_days).await?;

    Ok(Json(AuthResponse { token, user: user.into() }))
}

/// Issue a fresh session token for the caller, without requiring
/// username/password again. There is no separate refresh-token purpose
/// prefix — just the one `vox_sess_` session token — so this simply mints
/// a new token for the bearer's existing identity.
pub async fn refresh(State(state): State<AppState>, auth_user: AuthUser) -> AppResult<Json<AuthResponse>> {
    let user: User = sqlx::query_as(
        "SELECT id, username, display_name, password_hash, avatar_url,
                federated, home_domain, active,
                created_at, updated_at
         FROM users WHERE id = $1",
    )
    .bind(auth_user.user_id())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let token = auth::create_session(&state.pool, user.id, state.config.session_lifetime_days).await?;
    Ok(Json(AuthResponse { token, user: user.into() }))
}

pub async fn two_factor_status(_auth_user: AuthUser) -> Json<TwoFactorStatus> {
    Json(TwoFactorStatus {
        totp_enabled: false,
        webauthn_enabled: false,
        recovery_codes_left: 0,
    })
}
