use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user. `federated` stubs are created lazily on first inbound federation
/// event and carry `home_domain`; local accounts leave it null.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub avatar_url: Option<String>,
    pub federated: bool,
    pub home_domain: Option<String>,
    pub active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl User {
    /// `display_name` falls back to `username` wherever the wire protocol
    /// needs a name, per the gateway's `ready` event construction.
    pub fn effective_display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    /// A federated user's address is `username@home_domain`; local users have
    /// no address.
    pub fn address(&self) -> Option<String> {
        self.home_domain
            .as_ref()
            .map(|domain| format!("{}@{domain}", self.username))
    }
}

#[derive(Debug, Serialize)]
pub struct UserDto {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl From<User> for UserDto {
    fn from(u: User) -> Self {
        UserDto {
            display_name: u.effective_display_name().to_string(),
            id: u.id,
            username: u.username,
            avatar_url: u.avatar_url,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserDto {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// A session token, stored hashed. The token's purpose
/// prefix (`vox_sess_`, `fed_`, …) is checked by auth middleware, not stored
/// separately — it is embedded in the plaintext token the client holds.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: i64,
    pub token_hash: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub owner_id: i64,
    pub icon_url: Option<String>,
    pub is_public: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServerDto {
    pub name: String,
    pub icon_url: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServerDto {
    pub name: Option<String>,
    pub icon_url: Option<String>,
    pub is_public: Option<bool>,
}

/// A server enriched with a live member count — the shape returned to
/// clients; `Server` alone is the bare row.
#[derive(Debug, Serialize, FromRow)]
pub struct ServerDto {
    pub id: Uuid,
    pub name: String,
    pub owner_id: i64,
    pub icon_url: Option<String>,
    pub is_public: bool,
    pub member_count: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ServerMember {
    pub server_id: Uuid,
    pub user_id: i64,
    pub nickname: Option<String>,
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

/// A server member joined with their user profile — response shape for
/// `GET /servers/:id/members`. Online/idle/dnd/offline status is gateway-only
/// (see `websocket::hub::PresenceRecord`); clients needing it subscribe to
/// `presence_update` rather than reading it off this REST response.
#[derive(Debug, Serialize, FromRow)]
pub struct MemberDto {
    pub user_id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
    pub nickname: Option<String>,
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

/// `position = 0` is always `@everyone`.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Role {
    pub id: i64,
    pub server_id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub permissions: i64,
    pub position: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleDto {
    pub name: String,
    pub color: Option<String>,
    pub permissions: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleDto {
    pub name: Option<String>,
    pub color: Option<String>,
    pub permissions: Option<i64>,
    pub position: Option<i32>,
}

/// `space_type ∈ {feed, room}`; `target_type ∈ {role, user}`.
#[derive(Debug, Clone, FromRow)]
pub struct PermissionOverride {
    pub id: i64,
    pub space_type: String,
    pub space_id: Uuid,
    pub target_type: String,
    pub target_id: i64,
    pub allow: i64,
    pub deny: i64,
}

/// Unified feed/room table — a "space" (GLOSSARY). `space_type` discriminates
/// a text `feed` from a voice/stage `room`; permission overrides scope to
/// `(space_type, id)`.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Channel {
    pub id: Uuid,
    pub server_id: Uuid,
    pub space_type: String,
    pub name: String,
    pub category_id: Option<Uuid>,
    pub position: i32,
    pub topic: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelDto {
    pub name: String,
    pub category_id: Option<Uuid>,
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChannelDto {
    pub name: Option<String>,
    pub category_id: Option<Uuid>,
    pub topic: Option<String>,
    pub position: Option<i32>,
}

/// At most one room per user, enforced by the `user_id` primary key.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct VoiceState {
    pub user_id: i64,
    pub room_id: Uuid,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub video: bool,
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Message {
    pub id: i64,
    pub channel_id: Option<Uuid>,
    pub author_id: i64,
    pub content: Option<String>,
    pub reply_to: Option<i64>,
    pub mention_user_ids: Vec<i64>,
    pub mention_everyone: bool,
    pub thread_id: Option<Uuid>,
    pub edited_at: Option<chrono::DateTime<chrono::Utc>>,
    pub deleted: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageDto {
    pub content: Option<String>,
    pub reply_to: Option<i64>,
    pub mention_user_ids: Option<Vec<i64>>,
    pub mention_everyone: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessageDto {
    pub content: String,
}

/// `entry` is either a bare domain (blocklist) or `allow:<domain>`
/// (allowlist namespace).
#[derive(Debug, Clone, FromRow)]
pub struct FederationEntry {
    pub id: i64,
    pub entry: String,
    pub reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Insertion-wins replay defence: the `nonce` primary key is the sole
/// atomicity primitive.
#[derive(Debug, Clone, FromRow)]
pub struct FederationNonce {
    pub nonce: String,
    pub seen_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FederationPresenceSub {
    pub domain: String,
    pub user_address: String,
}

/// Generic key/value store backing federation keypair persistence and
/// runtime server config.
#[derive(Debug, Clone, FromRow)]
pub struct ConfigRow {
    pub key: String,
    pub value: String,
}

/// An uploaded one-time prekey bundle, consumed (deleted) on first fetch by
/// a remote federation peer.
#[derive(Debug, Clone, FromRow)]
pub struct PrekeyBundle {
    pub id: i64,
    pub user_id: i64,
    pub bundle: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A durable event-log row, read back by the catch-up sync endpoint.
#[derive(Debug, Clone, FromRow)]
pub struct EventLogRow {
    pub id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub timestamp_ms: i64,
}
