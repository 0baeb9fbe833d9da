//! Gateway wire envelope and dispatch event builders. The wire protocol is
//! `{type, d?, seq?}` — control frames (`hello`,
//! `ready`, `heartbeat_ack`, `resumed`) never carry a `seq`; syncable dispatch
//! events do, assigned by the connection's outbound sequencer at send time.
//!
//! Builders are pure functions returning the `d` payload as a
//! `serde_json::Value`; [`envelope`] wraps a payload with its `type` and
//! optional `seq` for serialization onto the socket.

use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
}

/// Build the wire envelope for a frame. `seq` is `None` for control frames
/// and `Some` for every syncable dispatch event.
pub fn envelope(kind: &str, d: Value, seq: Option<i64>) -> Envelope {
    Envelope {
        kind: kind.to_string(),
        d: Some(d),
        seq,
    }
}

// ---------------------------------------------------------------------
// Control frames
// ---------------------------------------------------------------------

pub fn hello(heartbeat_interval_ms: u64) -> Value {
    json!({ "heartbeat_interval_ms": heartbeat_interval_ms })
}

/// Fields: `ready{session_id, user_id, display_name, server_name,
/// server_icon?, server_time, protocol_version, capabilities[]}`.
/// Per-server/per-channel state is caught up separately by
/// the client via REST, not embedded here.
pub fn ready(
    session_id: &str,
    user_id: i64,
    display_name: &str,
    server_name: &str,
    server_icon: Option<&str>,
    server_time: i64,
    protocol_version: i32,
    capabilities: &[String],
) -> Value {
    json!({
        "session_id": session_id,
        "user_id": user_id.to_string(),
        "display_name": display_name,
        "server_name": server_name,
        "server_icon": server_icon,
        "server_time": server_time,
        "protocol_version": protocol_version,
        "capabilities": capabilities,
    })
}

pub fn heartbeat_ack() -> Value {
    json!({})
}

/// `d.seq` is the session's seq at resume time, not a count of replayed
/// frames.
pub fn resumed(seq: i64) -> Value {
    json!({ "seq": seq })
}

// ---------------------------------------------------------------------
// Message events
// ---------------------------------------------------------------------

pub fn message_create(message: &Value) -> Value {
    message.clone()
}

pub fn message_update(message: &Value) -> Value {
    message.clone()
}

pub fn message_delete(channel_id: &str, message_id: i64) -> Value {
    json!({ "channel_id": channel_id, "message_id": message_id.to_string() })
}

pub fn message_bulk_delete(channel_id: &str, message_ids: &[i64]) -> Value {
    json!({
        "channel_id": channel_id,
        "message_ids": message_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
    })
}

pub fn message_reaction_add(channel_id: &str, message_id: &str, user_id: i64, emoji: &str) -> Value {
    json!({
        "channel_id": channel_id,
        "message_id": message_id,
        "user_id": user_id.to_string(),
        "emoji": emoji,
    })
}

pub fn message_reaction_remove(channel_id: &str, message_id: &str, user_id: i64, emoji: &str) -> Value {
    json!({
        "channel_id": channel_id,
        "message_id": message_id,
        "user_id": user_id.to_string(),
        "emoji": emoji,
    })
}

pub fn message_pin_update(channel_id: &str, message_id: &str, pinned: bool) -> Value {
    json!({ "channel_id": channel_id, "message_id": message_id, "pinned": pinned })
}

// ---------------------------------------------------------------------
// Membership events
// ---------------------------------------------------------------------

pub fn member_join(server_id: &str, member: &Value) -> Value {
    json!({ "server_id": server_id, "member": member })
}

pub fn member_leave(server_id: &str, user_id: i64) -> Value {
    json!({ "server_id": server_id, "user_id": user_id.to_string() })
}

pub fn member_update(server_id: &str, member: &Value) -> Value {
    json!({ "server_id": server_id, "member": member })
}

pub fn member_ban(server_id: &str, user_id: i64, reason: Option<&str>) -> Value {
    json!({ "server_id": server_id, "user_id": user_id.to_string(), "reason": reason })
}

pub fn member_unban(server_id: &str, user_id: i64) -> Value {
    json!({ "server_id": server_id, "user_id": user_id.to_string() })
}

// ---------------------------------------------------------------------
// Space (feed/room/category) events
// ---------------------------------------------------------------------

pub fn feed_create(channel: &Value) -> Value {
    channel.clone()
}

pub fn feed_update(channel: &Value) -> Value {
    channel.clone()
}

pub fn feed_delete(server_id: &str, channel_id: &str) -> Value {
    json!({ "server_id": server_id, "channel_id": channel_id })
}

pub fn room_create(channel: &Value) -> Value {
    channel.clone()
}

pub fn room_update(channel: &Value) -> Value {
    channel.clone()
}

pub fn room_delete(server_id: &str, channel_id: &str) -> Value {
    json!({ "server_id": server_id, "channel_id": channel_id })
}

pub fn category_create(category: &Value) -> Value {
    category.clone()
}

pub fn category_update(category: &Value) -> Value {
    category.clone()
}

pub fn category_delete(server_id: &str, category_id: &str) -> Value {
    json!({ "server_id": server_id, "category_id": category_id })
}

pub fn thread_create(thread: &Value) -> Value {
    thread.clone()
}

pub fn thread_update(thread: &Value) -> Value {
    thread.clone()
}

pub fn thread_delete(channel_id: &str, thread_id: &str) -> Value {
    json!({ "channel_id": channel_id, "thread_id": thread_id })
}

// ---------------------------------------------------------------------
// Role / server events
// ---------------------------------------------------------------------

pub fn role_create(role: &Value) -> Value {
    role.clone()
}

pub fn role_update(role: &Value) -> Value {
    role.clone()
}

pub fn role_delete(server_id: &str, role_id: i64) -> Value {
    json!({ "server_id": server_id, "role_id": role_id.to_string() })
}

pub fn server_update(server: &Value) -> Value {
    server.clone()
}

pub fn invite_create(invite: &Value) -> Value {
    invite.clone()
}

pub fn invite_delete(server_id: &str, code: &str) -> Value {
    json!({ "server_id": server_id, "code": code })
}

// ---------------------------------------------------------------------
// Direct message events
//
// Pure builders only — this crate's schema carries no `dm`/`dm_participants`
// tables (direct messages are out of scope; see DESIGN.md), so nothing
// constructs the `dm`/`user` values these take. Kept for catalogue parity
// with the rest of the event surface, the same way `federation::client`'s
// outbound wrappers are kept unwired.
// ---------------------------------------------------------------------

pub fn dm_create(dm: &Value) -> Value {
    dm.clone()
}

pub fn dm_update(dm: &Value) -> Value {
    dm.clone()
}

pub fn dm_recipient_add(dm_id: &str, user: &Value) -> Value {
    json!({ "dm_id": dm_id, "user": user })
}

pub fn dm_recipient_remove(dm_id: &str, user_id: i64) -> Value {
    json!({ "dm_id": dm_id, "user_id": user_id.to_string() })
}

pub fn dm_read_notify(dm_id: &str, user_id: i64, last_read_message_id: i64) -> Value {
    json!({
        "dm_id": dm_id,
        "user_id": user_id.to_string(),
        "last_read_message_id": last_read_message_id.to_string(),
    })
}

// ---------------------------------------------------------------------
// Presence / typing
// ---------------------------------------------------------------------

pub fn typing_start(channel_id: &str, user_id: i64) -> Value {
    json!({ "channel_id": channel_id, "user_id": user_id.to_string() })
}

pub fn presence_update(user_id: i64, status: &str, custom_status: Option<&str>) -> Value {
    json!({
        "user_id": user_id.to_string(),
        "status": status,
        "custom_status": custom_status,
    })
}

/// Mention/reply/subscriber notification fan-out payload. `user_ids` is
/// always a single-element array — one event is dispatched
/// per recipient, never a batch.
pub fn notification_create(
    kind: &str,
    channel_id: &str,
    message_id: i64,
    author_id: i64,
    recipient_id: i64,
) -> Value {
    json!({
        "notification_type": kind,
        "channel_id": channel_id,
        "message_id": message_id.to_string(),
        "author_id": author_id.to_string(),
        "user_ids": [recipient_id.to_string()],
    })
}

// ---------------------------------------------------------------------
// Voice / stage
// ---------------------------------------------------------------------

pub fn voice_state_update(room_id: &str, states: &[Value]) -> Value {
    json!({ "room_id": room_id, "states": states })
}

pub fn voice_codec_neg(user_id: i64, codec: &str, params: &Value) -> Value {
    json!({ "user_id": user_id.to_string(), "codec": codec, "params": params })
}

pub fn stage_response(room_id: &str, user_id: i64, accepted: bool) -> Value {
    json!({ "room_id": room_id, "user_id": user_id.to_string(), "accepted": accepted })
}

// ---------------------------------------------------------------------
// Federation relay — delivery of a remote peer's opaque DM traffic to a
// local user. The gateway never inspects `payload`; it is an E2EE blob
// the two clients understand between themselves.
// ---------------------------------------------------------------------

pub fn relay_message(from_address: &str, payload: &Value) -> Value {
    json!({ "from_address": from_address, "payload": payload })
}

pub fn relay_typing(from_address: &str) -> Value {
    json!({ "from_address": from_address })
}

pub fn relay_read(from_address: &str, payload: &Value) -> Value {
    json!({ "from_address": from_address, "payload": payload })
}

// ---------------------------------------------------------------------
// End-to-end encryption relay (MLS, CPace) — opaque blobs the gateway
// relays without inspecting.
// ---------------------------------------------------------------------

pub fn mls_welcome(from_user_id: i64, payload: &Value) -> Value {
    json!({ "from_user_id": from_user_id.to_string(), "payload": payload })
}

pub fn mls_commit(from_user_id: i64, payload: &Value) -> Value {
    json!({ "from_user_id": from_user_id.to_string(), "payload": payload })
}

pub fn mls_proposal(from_user_id: i64, payload: &Value) -> Value {
    json!({ "from_user_id": from_user_id.to_string(), "payload": payload })
}

pub fn cpace_isi(from_user_id: i64, payload: &Value) -> Value {
    json!({ "from_user_id": from_user_id.to_string(), "payload": payload })
}

pub fn cpace_rsi(from_user_id: i64, payload: &Value) -> Value {
    json!({ "from_user_id": from_user_id.to_string(), "payload": payload })
}

pub fn cpace_confirm(from_user_id: i64, payload: &Value) -> Value {
    json!({ "from_user_id": from_user_id.to_string(), "payload": payload })
}

pub fn cpace_new_device_key(from_user_id: i64, payload: &Value) -> Value {
    json!({ "from_user_id": from_user_id.to_string(), "payload": payload })
}
