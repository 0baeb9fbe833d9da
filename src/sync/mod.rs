//! Sync log reader for catch-up replay of syncable event categories.
//!
//! Category membership covers the full known set even though this crate
//! only ever appends events for a subset of them (the rest — emoji,
//! permissions, webhooks, bots, users — belong to REST surfaces out of
//! this crate's scope); an unimplemented category is still a *valid* one,
//! it is simply always empty.

use once_cell::sync::Lazy;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};

use crate::error::{AppError, AppResult};
use crate::models::EventLogRow;

pub const SYNC_RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

static CATEGORY_EVENTS: Lazy<HashMap<&'static str, HashSet<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("members", HashSet::from(["member_join", "member_leave", "member_update", "member_ban", "member_unban"])),
        ("roles", HashSet::from(["role_create", "role_update", "role_delete", "role_assign", "role_revoke"])),
        ("feeds", HashSet::from(["feed_create", "feed_update", "feed_delete"])),
        ("rooms", HashSet::from(["room_create", "room_update", "room_delete"])),
        ("categories", HashSet::from(["category_create", "category_update", "category_delete"])),
        ("emoji", HashSet::from(["emoji_create", "emoji_delete", "sticker_create", "sticker_delete"])),
        ("bans", HashSet::from(["member_ban", "member_unban"])),
        ("invites", HashSet::from(["invite_create", "invite_delete"])),
        ("permissions", HashSet::from(["permission_override_update", "permission_override_delete"])),
        ("threads", HashSet::from(["thread_create", "thread_update", "thread_delete"])),
        ("webhooks", HashSet::from(["webhook_create", "webhook_update", "webhook_delete"])),
        ("bots", HashSet::from(["bot_commands_update", "bot_commands_delete"])),
        ("users", HashSet::from(["user_update"])),
        ("server", HashSet::from(["server_update"])),
    ])
});

#[derive(Debug, Serialize)]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub events: Vec<SyncEvent>,
    pub server_timestamp: i64,
}

/// Resolve `categories` to their union of event types, 400 `INVALID_CATEGORY`
/// on an unrecognized name, then tail the event log since `since_timestamp`
/// bounded by the 7-day retention window.
pub async fn sync(
    pool: &PgPool,
    categories: &[String],
    since_timestamp: i64,
) -> AppResult<SyncResponse> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let cutoff = now_ms - SYNC_RETENTION_MS;

    if since_timestamp < cutoff {
        return Ok(SyncResponse { events: Vec::new(), server_timestamp: now_ms });
    }

    let mut event_types: HashSet<&'static str> = HashSet::new();
    for cat in categories {
        let types = CATEGORY_EVENTS
            .get(cat.as_str())
            .ok_or_else(|| AppError::Validation(format!("Unknown sync category: {cat}")))?;
        event_types.extend(types.iter().copied());
    }

    if event_types.is_empty() {
        return Ok(SyncResponse { events: Vec::new(), server_timestamp: now_ms });
    }

    let types: Vec<String> = event_types.into_iter().map(str::to_string).collect();
    let rows: Vec<EventLogRow> = sqlx::query_as(
        "SELECT id, event_type, payload, timestamp_ms FROM event_log
         WHERE timestamp_ms >= $1 AND event_type = ANY($2)
         ORDER BY timestamp_ms
         LIMIT $3",
    )
    .bind(since_timestamp)
    .bind(&types)
    .bind(crate::limits::PAGE_LIMIT_SYNC)
    .fetch_all(pool)
    .await?;

    let events = rows
        .into_iter()
        .map(|row| SyncEvent { kind: row.event_type, payload: row.payload, timestamp: row.timestamp_ms })
        .collect();

    Ok(SyncResponse { events, server_timestamp: now_ms })
}

/// Drop event log rows past the 7-day retention window.
pub async fn cleanup_old_events(pool: &PgPool) -> AppResult<()> {
    let cutoff = chrono::Utc::now().timestamp_millis() - SYNC_RETENTION_MS;
    sqlx::query("DELETE FROM event_log WHERE timestamp_ms < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(())
}
