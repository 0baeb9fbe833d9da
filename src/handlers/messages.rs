//! Flat message CRUD for feeds: `POST/GET /feeds/:id/messages` and
//! `PATCH/DELETE /messages/:id`. Threads, reactions, polls and pins are
//! out of scope.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::shared::{fetch_channel_by_id, fetch_message, fetch_server, require_member, validation_error};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{CreateMessageDto, Message, UpdateMessageDto},
    permissions::{self, MANAGE_MESSAGES},
    state::AppState,
    websocket::{dispatch::dispatch, dispatch::notify::notify_for_message, events},
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMessageRequest {
    #[validate(length(min = 1, max = 4000, message = "Message content must be 1-4000 characters"))]
    pub content: String,
    pub reply_to: Option<i64>,
    pub mention_user_ids: Option<Vec<i64>>,
    pub mention_everyone: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMessageRequest {
    #[validate(length(min = 1, max = 4000, message = "Message content must be 1-4000 characters"))]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    /// Return messages created strictly before this message id (cursor pagination).
    pub before: Option<i64>,
    pub limit: Option<i64>,
}

pub(super) async fn server_member_ids(pool: &sqlx::PgPool, server_id: Uuid) -> AppResult<Vec<i64>> {
    Ok(sqlx::query_scalar("SELECT user_id FROM server_members WHERE server_id = $1")
        .bind(server_id)
        .fetch_all(pool)
        .await?)
}

/// POST /feeds/:channel_id/messages — send a message (members only).
pub async fn create_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<Uuid>,
    Json(req): Json<CreateMessageRequest>,
) -> AppResult<(StatusCode, Json<Message>)> {
    req.validate().map_err(validation_error)?;

    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;

    if let Some(reply_to_id) = req.reply_to {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE id = $1 AND channel_id = $2 AND deleted = FALSE)",
        )
        .bind(reply_to_id)
        .bind(channel_id)
        .fetch_one(&state.pool)
        .await?;
        if !exists {
            return Err(AppError::NotFound("Reply target message not found".into()));
        }
    }

    let dto = CreateMessageDto {
        content: Some(req.content),
        reply_to: req.reply_to,
        mention_user_ids: req.mention_user_ids,
        mention_everyone: req.mention_everyone,
    };
    let mention_user_ids = dto.mention_user_ids.clone().unwrap_or_default();

    let message = sqlx::query_as::<_, Message>(
        "INSERT INTO messages (id, channel_id, author_id, content, reply_to, mention_user_ids, mention_everyone)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id, channel_id, author_id, content, reply_to,
                   mention_user_ids, mention_everyone, thread_id, edited_at, deleted, created_at",
    )
    .bind(crate::snowflake::next_id())
    .bind(channel_id)
    .bind(auth.user_id())
    .bind(&dto.content)
    .bind(dto.reply_to)
    .bind(&mention_user_ids)
    .bind(dto.mention_everyone.unwrap_or(false))
    .fetch_one(&state.pool)
    .await?;

    let payload = serde_json::to_value(&message).map_err(|_| AppError::Internal)?;
    let recipients = server_member_ids(&state.pool, channel.server_id).await?;
    dispatch(
        &state.pool,
        &state.hub,
        "message_create",
        events::message_create(&payload),
        Some(&recipients),
    )
    .await?;

    notify_for_message(
        &state.pool,
        &state.hub,
        channel.server_id,
        channel_id,
        message.id,
        auth.user_id(),
        message.reply_to,
        &mention_user_ids,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /feeds/:channel_id/messages — list messages, newest-first, cursor-paginated.
pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, 100);

    let messages = if let Some(before_id) = query.before {
        sqlx::query_as::<_, Message>(
            "SELECT id, channel_id, author_id, content, reply_to,
                    mention_user_ids, mention_everyone, thread_id, edited_at, deleted, created_at
             FROM messages
             WHERE channel_id = $1 AND deleted = FALSE AND id < $2
             ORDER BY id DESC
             LIMIT $3",
        )
        .bind(channel_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(&state.pool)
        .await?
    } else {
        sqlx::query_as::<_, Message>(
            "SELECT id, channel_id, author_id, content, reply_to,
                    mention_user_ids, mention_everyone, thread_id, edited_at, deleted, created_at
             FROM messages
             WHERE channel_id = $1 AND deleted = FALSE
             ORDER BY id DESC
             LIMIT $2",
        )
        .bind(channel_id)
        .bind(limit)
        .fetch_all(&state.pool)
        .await?
    };

    Ok(Json(messages))
}

/// PATCH /messages/:message_id — edit a message's content (author only).
pub async fn update_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<i64>,
    Json(req): Json<UpdateMessageRequest>,
) -> AppResult<Json<Message>> {
    req.validate().map_err(validation_error)?;

    let message = fetch_message(&state.pool, message_id).await?;
    let channel_id = message
        .channel_id
        .ok_or_else(|| AppError::Validation("Message has no channel".into()))?;
    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;

    if message.author_id != auth.user_id() {
        return Err(AppError::Forbidden("Only the message author can edit it".into()));
    }

    let dto = UpdateMessageDto { content: req.content };

    let updated = sqlx::query_as::<_, Message>(
        "UPDATE messages
         SET content = $1, edited_at = NOW()
         WHERE id = $2 AND deleted = FALSE
         RETURNING id, channel_id, author_id, content, reply_to,
                   mention_user_ids, mention_everyone, thread_id, edited_at, deleted, created_at",
    )
    .bind(&dto.content)
    .bind(message_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Message not found".into()))?;

    let payload = serde_json::to_value(&updated).map_err(|_| AppError::Internal)?;
    let recipients = server_member_ids(&state.pool, channel.server_id).await?;
    dispatch(
        &state.pool,
        &state.hub,
        "message_update",
        events::message_update(&payload),
        Some(&recipients),
    )
    .await?;

    Ok(Json(updated))
}

/// DELETE /messages/:message_id — soft-delete a message (author or server owner).
pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<i64>,
) -> AppResult<StatusCode> {
    let message = fetch_message(&state.pool, message_id).await?;
    let channel_id = message
        .channel_id
        .ok_or_else(|| AppError::Validation("Message has no channel".into()))?;
    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    let server = fetch_server(&state.pool, channel.server_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;

    let is_author = message.author_id == auth.user_id();
    let is_owner = server.owner_id == auth.user_id();
    if !is_author && !is_owner {
        let resolved = permissions::resolve(&state.pool, channel.server_id, auth.user_id(), None).await?;
        if !permissions::has(resolved, MANAGE_MESSAGES) {
            return Err(AppError::Forbidden(
                "Only the message author or someone with MANAGE_MESSAGES can delete it".into(),
            ));
        }
    }

    let result = sqlx::query("UPDATE messages SET deleted = TRUE WHERE id = $1 AND deleted = FALSE")
        .bind(message_id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Message not found".into()));
    }

    let recipients = server_member_ids(&state.pool, channel.server_id).await?;
    dispatch(
        &state.pool,
        &state.hub,
        "message_delete",
        events::message_delete(&channel_id.to_string(), message_id),
        Some(&recipients),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

