use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{UpdateUserDto, User, UserDto},
    state::AppState,
};

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 64))]
    pub display_name: Option<String>,
    /// Must be a valid HTTP(S) URL when provided.
    #[validate(url)]
    pub avatar_url: Option<String>,
}

fn validation_error(e: validator::ValidationErrors) -> AppError {
    AppError::Validation(
        e.field_errors()
            .values()
            .flat_map(|v| v.iter())
            .filter_map(|e| e.message.as_ref())
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn get_current_user(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> AppResult<Json<UserDto>> {
    info!("Getting current user: {}", auth_user.user_id());

    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, display_name, password_hash, avatar_url,
                federated, home_domain, active,
                created_at, updated_at
         FROM users WHERE id = $1",
    )
    .bind(auth_user.user_id())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(user.into()))
}

pub async fn update_current_user(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Json<UserDto>> {
    req.validate().map_err(validation_error)?;

    info!("Updating user: {}", auth_user.user_id());

    let update = UpdateUserDto {
        display_name: req.display_name,
        avatar_url: req.avatar_url,
    };

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET display_name  = COALESCE($1, display_name),
            avatar_url     = COALESCE($2, avatar_url),
            updated_at     = NOW()
        WHERE id = $3
        RETURNING id, username, display_name, password_hash, avatar_url,
                  federated, home_domain, active,
                  created_at, updated_at
        "#,
    )
    .bind(update.display_name)
    .bind(update.avatar_url)
    .bind(auth_user.user_id())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(user.into()))
}
