//! Voice room join/leave REST surface. A user may occupy at most one room
//! at a time. Joining here creates the `voice_states` row
//! that the gateway's `voice_state_update` frame handler
//! (`websocket::handler::handle_voice_state_update`) expects to already
//! exist — the WebSocket frame only ever mutates an existing row, it never
//! creates one.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::shared::{fetch_channel_by_id, require_member};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::VoiceState,
    state::AppState,
    websocket::handler::broadcast_voice_state,
};

#[derive(Debug, Deserialize)]
pub struct UpdateVoiceStateRequest {
    pub self_mute: Option<bool>,
    pub self_deaf: Option<bool>,
    pub video: Option<bool>,
    pub streaming: Option<bool>,
}

fn require_room(channel: &crate::models::Channel) -> AppResult<()> {
    if channel.space_type != "room" {
        return Err(AppError::Validation("Not a voice room".into()));
    }
    Ok(())
}

/// POST /rooms/:room_id/voice — join a voice room.
///
/// Moves the user here from any other room they're in via UPSERT on the
/// `user_id` primary key; `self_mute`/`self_deaf`/`video`/`streaming` reset
/// to `false` on join.
pub async fn join_room(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(room_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<VoiceState>)> {
    let channel = fetch_channel_by_id(&state.pool, room_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;
    require_room(&channel)?;

    let prior_room: Option<Uuid> = sqlx::query_scalar("SELECT room_id FROM voice_states WHERE user_id = $1")
        .bind(auth.user_id())
        .fetch_optional(&state.pool)
        .await?;

    let vs = sqlx::query_as::<_, VoiceState>(
        "INSERT INTO voice_states (user_id, room_id)
         VALUES ($1, $2)
         ON CONFLICT (user_id) DO UPDATE
             SET room_id = EXCLUDED.room_id, self_mute = FALSE, self_deaf = FALSE,
                 video = FALSE, streaming = FALSE
         RETURNING user_id, room_id, self_mute, self_deaf, video, streaming",
    )
    .bind(auth.user_id())
    .bind(room_id)
    .fetch_one(&state.pool)
    .await?;

    if let Some(prior) = prior_room {
        if prior != room_id {
            broadcast_voice_state(&state, prior).await;
        }
    }
    broadcast_voice_state(&state, room_id).await;

    Ok((StatusCode::CREATED, Json(vs)))
}

/// DELETE /rooms/:room_id/voice — leave a voice room.
pub async fn leave_room(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(room_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let channel = fetch_channel_by_id(&state.pool, room_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;
    require_room(&channel)?;

    let result = sqlx::query("DELETE FROM voice_states WHERE user_id = $1 AND room_id = $2")
        .bind(auth.user_id())
        .bind(room_id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_in_voice());
    }

    broadcast_voice_state(&state, room_id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /rooms/:room_id/voice — update self-mute/self-deaf/video/streaming.
///
/// Mirrors what the gateway's `voice_state_update` frame does, for clients
/// that prefer a REST round-trip over the socket for this.
pub async fn update_voice_state(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(room_id): Path<Uuid>,
    Json(req): Json<UpdateVoiceStateRequest>,
) -> AppResult<Json<VoiceState>> {
    let channel = fetch_channel_by_id(&state.pool, room_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;
    require_room(&channel)?;

    let vs = sqlx::query_as::<_, VoiceState>(
        "UPDATE voice_states
         SET self_mute = COALESCE($1, self_mute),
             self_deaf = COALESCE($2, self_deaf),
             video     = COALESCE($3, video),
             streaming = COALESCE($4, streaming)
         WHERE user_id = $5 AND room_id = $6
         RETURNING user_id, room_id, self_mute, self_deaf, video, streaming",
    )
    .bind(req.self_mute)
    .bind(req.self_deaf)
    .bind(req.video)
    .bind(req.streaming)
    .bind(auth.user_id())
    .bind(room_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(AppError::not_in_voice)?;

    broadcast_voice_state(&state, room_id).await;
    Ok(Json(vs))
}

/// GET /rooms/:room_id/voice — list current participants (members only).
pub async fn list_voice_participants(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(room_id): Path<Uuid>,
) -> AppResult<Json<Vec<VoiceState>>> {
    let channel = fetch_channel_by_id(&state.pool, room_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;
    require_room(&channel)?;

    let states = sqlx::query_as::<_, VoiceState>(
        "SELECT user_id, room_id, self_mute, self_deaf, video, streaming
         FROM voice_states WHERE room_id = $1",
    )
    .bind(room_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(states))
}
