//! Feed/room ("space") CRUD — one shared handler set for both, discriminated
//! by `space_type`. Feeds and rooms are the same underlying resource under
//! different route prefixes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use super::shared::{fetch_channel_by_id, fetch_server, require_member, require_permission, validation_error};
use crate::{
    auth::AuthUser,
    error::AppResult,
    models::{Channel, CreateChannelDto, UpdateChannelDto},
    permissions::MANAGE_SPACES,
    state::AppState,
};

const SPACE_TYPES: &[&str] = &["feed", "room"];

#[derive(Debug, serde::Deserialize, Validate)]
pub struct CreateChannelRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1–100 characters"))]
    pub name: String,
    pub category_id: Option<Uuid>,
    pub topic: Option<String>,
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct UpdateChannelRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1–100 characters"))]
    pub name: Option<String>,
    pub category_id: Option<Uuid>,
    pub topic: Option<String>,
    pub position: Option<i32>,
}

async fn create_space(
    state: AppState,
    auth: AuthUser,
    server_id: Uuid,
    space_type: &'static str,
    req: CreateChannelRequest,
) -> AppResult<(StatusCode, Json<Channel>)> {
    req.validate().map_err(validation_error)?;

    fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;

    let dto = CreateChannelDto {
        name: req.name,
        category_id: req.category_id,
        topic: req.topic,
    };

    let position: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM channels WHERE server_id = $1 AND space_type = $2",
    )
    .bind(server_id)
    .bind(space_type)
    .fetch_one(&state.pool)
    .await?;

    let channel = sqlx::query_as::<_, Channel>(
        "INSERT INTO channels (server_id, space_type, name, category_id, position, topic)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id, server_id, space_type, name, category_id, position, topic, created_at",
    )
    .bind(server_id)
    .bind(space_type)
    .bind(&dto.name)
    .bind(dto.category_id)
    .bind(position)
    .bind(&dto.topic)
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(channel)))
}

async fn list_spaces(
    state: AppState,
    auth: AuthUser,
    server_id: Uuid,
    space_type: &'static str,
) -> AppResult<Json<Vec<Channel>>> {
    fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;

    let channels = sqlx::query_as::<_, Channel>(
        "SELECT id, server_id, space_type, name, category_id, position, topic, created_at
         FROM channels WHERE server_id = $1 AND space_type = $2
         ORDER BY position ASC, created_at ASC",
    )
    .bind(server_id)
    .bind(space_type)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(channels))
}

/// POST /servers/:id/feeds
pub async fn create_feed(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
    Json(req): Json<CreateChannelRequest>,
) -> AppResult<(StatusCode, Json<Channel>)> {
    create_space(state, auth, server_id, "feed", req).await
}

/// GET /servers/:id/feeds
pub async fn list_feeds(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
) -> AppResult<Json<Vec<Channel>>> {
    list_spaces(state, auth, server_id, "feed").await
}

/// POST /servers/:id/rooms
pub async fn create_room(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
    Json(req): Json<CreateChannelRequest>,
) -> AppResult<(StatusCode, Json<Channel>)> {
    create_space(state, auth, server_id, "room", req).await
}

/// GET /servers/:id/rooms
pub async fn list_rooms(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
) -> AppResult<Json<Vec<Channel>>> {
    list_spaces(state, auth, server_id, "room").await
}

/// GET /channels/:id — fetch a single feed or room by id (members only).
pub async fn get_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<Channel>> {
    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;
    Ok(Json(channel))
}

/// PATCH /channels/:id — update a feed/room (server owner only).
pub async fn update_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<Uuid>,
    Json(req): Json<UpdateChannelRequest>,
) -> AppResult<Json<Channel>> {
    req.validate().map_err(validation_error)?;

    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    let server = fetch_server(&state.pool, channel.server_id).await?;
    require_permission(&state.pool, channel.server_id, auth.user_id(), server.owner_id, MANAGE_SPACES).await?;

    let dto = UpdateChannelDto {
        name: req.name,
        category_id: req.category_id,
        topic: req.topic,
        position: req.position,
    };

    let updated = sqlx::query_as::<_, Channel>(
        "UPDATE channels
         SET name        = COALESCE($1, name),
             category_id = COALESCE($2, category_id),
             topic       = COALESCE($3, topic),
             position    = COALESCE($4, position)
         WHERE id = $5
         RETURNING id, server_id, space_type, name, category_id, position, topic, created_at",
    )
    .bind(&dto.name)
    .bind(dto.category_id)
    .bind(&dto.topic)
    .bind(dto.position)
    .bind(channel_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(updated))
}

/// DELETE /channels/:id — delete a feed/room (server owner only).
pub async fn delete_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    let server = fetch_server(&state.pool, channel.server_id).await?;
    require_permission(&state.pool, channel.server_id, auth.user_id(), server.owner_id, MANAGE_SPACES).await?;

    sqlx::query("DELETE FROM channels WHERE id = $1")
        .bind(channel_id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
