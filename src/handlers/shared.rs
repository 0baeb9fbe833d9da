use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Channel, Message, Server, ServerMember},
    permissions,
};

/// Convert [`validator::ValidationErrors`] into an [`AppError::Validation`] with
/// a human-readable message. Shared across all handler modules to avoid
/// copy-pasting the same boilerplate.
pub fn validation_error(e: validator::ValidationErrors) -> AppError {
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

/// Fetch a non-deleted message by ID, returning 404 if not found or deleted.
pub async fn fetch_message(pool: &sqlx::PgPool, message_id: i64) -> AppResult<Message> {
    sqlx::query_as::<_, Message>(
        "SELECT id, channel_id, author_id, content, reply_to,
                mention_user_ids, mention_everyone, thread_id, edited_at, deleted, created_at
         FROM messages WHERE id = $1 AND deleted = FALSE",
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Message not found".into()))
}

/// Fetch a feed/room (a "space") by its ID alone, returning 404 if not found.
pub async fn fetch_channel_by_id(pool: &sqlx::PgPool, channel_id: Uuid) -> AppResult<Channel> {
    sqlx::query_as::<_, Channel>(
        "SELECT id, server_id, space_type, name, category_id, position, topic, created_at
         FROM channels WHERE id = $1",
    )
    .bind(channel_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Channel not found".into()))
}

/// Fetch a server row, returning 404 if it does not exist.
pub async fn fetch_server(pool: &sqlx::PgPool, server_id: Uuid) -> AppResult<Server> {
    sqlx::query_as::<_, Server>(
        "SELECT id, name, owner_id, icon_url, is_public, created_at, updated_at
         FROM servers WHERE id = $1",
    )
    .bind(server_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Server not found".into()))
}

/// 403s unless the caller is the server owner or holds every bit in
/// `required`. Mirrors the owner-always-allowed shape of
/// `roles::require_manage_roles` so ownership alone never depends on a role
/// assignment.
pub async fn require_permission(
    pool: &sqlx::PgPool,
    server_id: Uuid,
    user_id: i64,
    owner_id: i64,
    required: u64,
) -> AppResult<()> {
    if user_id == owner_id {
        return Ok(());
    }
    let resolved = permissions::resolve(pool, server_id, user_id, None).await?;
    if !permissions::has(resolved, required) {
        return Err(AppError::Forbidden("Missing required permission".into()));
    }
    Ok(())
}

/// Verify the user is a member of the server.
///
/// Returns 404 (not 403) when the user is not a member — this prevents leaking
/// information about server existence to unauthenticated or non-member users.
pub async fn require_member(pool: &sqlx::PgPool, server_id: Uuid, user_id: i64) -> AppResult<ServerMember> {
    sqlx::query_as::<_, ServerMember>(
        "SELECT server_id, user_id, nickname, joined_at
         FROM server_members WHERE server_id = $1 AND user_id = $2",
    )
    .bind(server_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Server not found".into()))
}
