//! Mention and reply-to-author notification fan-out for a new message.
//!
//! Feed/thread *subscriber* notification, backed by
//! `feed_subscribers`/`thread_subscribers`/`dm_participants` tables, which
//! this crate's schema does not carry — subscription-based notification is
//! out of scope here. What remains, and is fully implemented, is mention
//! expansion (including the `0` "@everyone" sentinel) and reply-to-author
//! inclusion.

use std::collections::HashSet;

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::websocket::dispatch::dispatch;
use crate::websocket::events;
use crate::websocket::hub::Hub;

/// Fan out `notification_create` events for a message just persisted to
/// `channel_id`. `mention_user_ids` containing `0` expands to every member
/// of `server_id` via the `@everyone` role (`roles.position = 0`).
#[allow(clippy::too_many_arguments)]
pub async fn notify_for_message(
    pool: &PgPool,
    hub: &Hub,
    server_id: Uuid,
    channel_id: Uuid,
    message_id: i64,
    author_id: i64,
    reply_to: Option<i64>,
    mention_user_ids: &[i64],
) -> AppResult<()> {
    let mut mention_ids: HashSet<i64> = HashSet::new();

    if mention_user_ids.contains(&0) {
        let everyone: Vec<i64> = sqlx::query_scalar(
            "SELECT sm.user_id FROM server_members sm WHERE sm.server_id = $1",
        )
        .bind(server_id)
        .fetch_all(pool)
        .await?;
        mention_ids.extend(everyone.into_iter().filter(|&uid| uid != author_id));
    }
    mention_ids.extend(
        mention_user_ids
            .iter()
            .copied()
            .filter(|&uid| uid != 0 && uid != author_id),
    );

    let mut reply_id = None;
    if let Some(reply_to_id) = reply_to {
        let author: Option<i64> = sqlx::query_scalar("SELECT author_id FROM messages WHERE id = $1")
            .bind(reply_to_id)
            .fetch_optional(pool)
            .await?;
        if let Some(uid) = author {
            if uid != author_id && !mention_ids.contains(&uid) {
                reply_id = Some(uid);
            }
        }
    }

    let channel = channel_id.to_string();
    for uid in mention_ids {
        let payload = events::notification_create("mention", &channel, message_id, author_id, uid);
        dispatch(pool, hub, "notification_create", payload, Some(&[uid])).await?;
    }
    if let Some(uid) = reply_id {
        let payload = events::notification_create("reply", &channel, message_id, author_id, uid);
        dispatch(pool, hub, "notification_create", payload, Some(&[uid])).await?;
    }

    Ok(())
}
