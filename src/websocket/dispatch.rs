//! Event dispatch pipeline.
//!
//! Syncable events are appended to the durable `event_log` before fan-out,
//! so `GET /api/v1/sync` can replay anything a client missed while offline.
//! Fan-out itself resolves recipients under the hub's
//! lock, then sends concurrently off-lock — per-connection ordering is
//! preserved because each `ConnectionHandle::send_event` call serializes on
//! that connection's own sequencer, independent of the others.

pub mod notify;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;
use sqlx::PgPool;

use crate::error::AppResult;
use crate::snowflake;
use crate::websocket::hub::Hub;

/// Event types that are recorded to `event_log` for catch-up sync. Anything
/// not listed here (messages, typing, presence, voice, E2EE relay) is
/// delivered live-only. This is the subset of syncable event categories
/// this crate actually produces events for.
const SYNCABLE_EVENT_TYPES: &[&str] = &[
    "member_join",
    "member_leave",
    "member_update",
    "member_ban",
    "member_unban",
    "role_create",
    "role_update",
    "role_delete",
    "feed_create",
    "feed_update",
    "feed_delete",
    "room_create",
    "room_update",
    "room_delete",
    "category_create",
    "category_update",
    "category_delete",
    "thread_create",
    "thread_update",
    "thread_delete",
    "invite_create",
    "invite_delete",
    "server_update",
];

pub fn is_syncable(event_type: &str) -> bool {
    SYNCABLE_EVENT_TYPES.contains(&event_type)
}

/// Append `event_type`/`payload` to the durable log if syncable, then fan it
/// out to the resolved recipients. `user_ids = None` broadcasts to every
/// connected session.
pub async fn dispatch(
    pool: &PgPool,
    hub: &Hub,
    event_type: &str,
    payload: Value,
    user_ids: Option<&[i64]>,
) -> AppResult<()> {
    if is_syncable(event_type) {
        let id = snowflake::next_id();
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO event_log (id, event_type, payload, timestamp_ms) VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(event_type)
        .bind(&payload)
        .bind(timestamp_ms)
        .execute(pool)
        .await?;
    }

    let targets = hub.targets(user_ids).await;
    let mut sends = FuturesUnordered::new();
    for conn in targets {
        let kind = event_type.to_string();
        let d = payload.clone();
        sends.push(async move { conn.send_event(&kind, d).await });
    }
    while sends.next().await.is_some() {}

    Ok(())
}
