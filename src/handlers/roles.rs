//! Server-scoped role CRUD: `POST/GET /servers/:id/roles`,
//! `PATCH/DELETE /roles/:id`. Authorization is the server owner (always
//! allowed, same as every other owner-gated resource in this module set)
//! or a member holding `MANAGE_ROLES` — the one REST surface in this crate
//! that actually calls [`crate::permissions::resolve`] rather than a bare
//! ownership check, since role management is exactly what that bit guards.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use super::shared::{fetch_server, require_member, validation_error};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{CreateRoleDto, Role, UpdateRoleDto},
    permissions::{self, MANAGE_ROLES},
    state::AppState,
    websocket::{dispatch::dispatch, events},
};

#[derive(Debug, serde::Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "Name must be 1–64 characters"))]
    pub name: String,
    pub color: Option<String>,
    pub permissions: Option<i64>,
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "Name must be 1–64 characters"))]
    pub name: Option<String>,
    pub color: Option<String>,
    pub permissions: Option<i64>,
    pub position: Option<i32>,
}

/// 403s unless the caller is the server owner or holds `MANAGE_ROLES`.
/// `@everyone` (`position = 0`) itself can never be created or deleted
/// through this surface — it is seeded once per server and only its
/// `permissions` field is ever mutated.
async fn require_manage_roles(pool: &sqlx::PgPool, server_id: Uuid, user_id: i64, owner_id: i64) -> AppResult<()> {
    if user_id == owner_id {
        return Ok(());
    }
    let resolved = permissions::resolve(pool, server_id, user_id, None).await?;
    if !permissions::has(resolved, MANAGE_ROLES) {
        return Err(AppError::Forbidden("Missing MANAGE_ROLES permission".into()));
    }
    Ok(())
}

async fn fetch_role(pool: &sqlx::PgPool, role_id: i64) -> AppResult<Role> {
    sqlx::query_as::<_, Role>(
        "SELECT id, server_id, name, color, permissions, position, created_at
         FROM roles WHERE id = $1",
    )
    .bind(role_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Role not found".into()))
}

/// POST /servers/:id/roles — create a new role, appended after the
/// highest existing position (never at position 0, which is `@everyone`).
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
    Json(req): Json<CreateRoleRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    req.validate().map_err(validation_error)?;

    let server = fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;
    require_manage_roles(&state.pool, server_id, auth.user_id(), server.owner_id).await?;

    let dto = CreateRoleDto {
        name: req.name,
        color: req.color,
        permissions: req.permissions,
    };

    let position: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(position) + 1, 1) FROM roles WHERE server_id = $1",
    )
    .bind(server_id)
    .fetch_one(&state.pool)
    .await?;

    let role = sqlx::query_as::<_, Role>(
        "INSERT INTO roles (id, server_id, name, color, permissions, position)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id, server_id, name, color, permissions, position, created_at",
    )
    .bind(crate::snowflake::next_id())
    .bind(server_id)
    .bind(&dto.name)
    .bind(&dto.color)
    .bind(dto.permissions.unwrap_or(0))
    .bind(position)
    .fetch_one(&state.pool)
    .await?;

    let payload = serde_json::to_value(&role).map_err(|_| AppError::Internal)?;
    let recipients = super::messages::server_member_ids(&state.pool, server_id).await?;
    dispatch(&state.pool, &state.hub, "role_create", events::role_create(&payload), Some(&recipients)).await?;

    Ok((StatusCode::CREATED, Json(role)))
}

/// GET /servers/:id/roles — list a server's roles, `@everyone` first.
pub async fn list_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
) -> AppResult<Json<Vec<Role>>> {
    fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;

    let roles = sqlx::query_as::<_, Role>(
        "SELECT id, server_id, name, color, permissions, position, created_at
         FROM roles WHERE server_id = $1 ORDER BY position ASC",
    )
    .bind(server_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(roles))
}

/// PATCH /roles/:id — update name/color/permissions/position.
pub async fn update_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<i64>,
    Json(req): Json<UpdateRoleRequest>,
) -> AppResult<Json<Role>> {
    req.validate().map_err(validation_error)?;

    let role = fetch_role(&state.pool, role_id).await?;
    let server = fetch_server(&state.pool, role.server_id).await?;
    require_manage_roles(&state.pool, role.server_id, auth.user_id(), server.owner_id).await?;

    if role.position == 0 && req.position.is_some() {
        return Err(AppError::Validation("@everyone's position cannot change".into()));
    }

    let dto = UpdateRoleDto {
        name: req.name,
        color: req.color,
        permissions: req.permissions,
        position: req.position,
    };

    let updated = sqlx::query_as::<_, Role>(
        "UPDATE roles
         SET name        = COALESCE($1, name),
             color       = COALESCE($2, color),
             permissions = COALESCE($3, permissions),
             position    = COALESCE($4, position)
         WHERE id = $5
         RETURNING id, server_id, name, color, permissions, position, created_at",
    )
    .bind(&dto.name)
    .bind(&dto.color)
    .bind(dto.permissions)
    .bind(dto.position)
    .bind(role_id)
    .fetch_one(&state.pool)
    .await?;

    let payload = serde_json::to_value(&updated).map_err(|_| AppError::Internal)?;
    let recipients = super::messages::server_member_ids(&state.pool, role.server_id).await?;
    dispatch(&state.pool, &state.hub, "role_update", events::role_update(&payload), Some(&recipients)).await?;

    Ok(Json(updated))
}

/// DELETE /roles/:id — delete a role. `@everyone` can never be deleted.
pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<i64>,
) -> AppResult<StatusCode> {
    let role = fetch_role(&state.pool, role_id).await?;
    let server = fetch_server(&state.pool, role.server_id).await?;
    require_manage_roles(&state.pool, role.server_id, auth.user_id(), server.owner_id).await?;

    if role.position == 0 {
        return Err(AppError::Validation("@everyone cannot be deleted".into()));
    }

    sqlx::query("DELETE FROM roles WHERE id = $1")
        .bind(role_id)
        .execute(&state.pool)
        .await?;

    let recipients = super::messages::server_member_ids(&state.pool, role.server_id).await?;
    dispatch(
        &state.pool,
        &state.hub,
        "role_delete",
        events::role_delete(&role.server_id.to_string(), role_id),
        Some(&recipients),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
