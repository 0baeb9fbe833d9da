//! Inbound federation S2S REST surface: relay, profile/prekey lookup,
//! presence subscriptions, join vouchers, and blocking.
//!
//! Every handler here runs behind [`crate::federation::federation_auth_layer`]
//! — the [`FederationOrigin`] extractor is only ever populated by that
//! middleware, so a handler can trust it without re-verifying anything.
//!
//! Direct messaging is out of scope (see `DESIGN.md`). `relay/message`,
//! `relay/typing`, and `relay/read` are opaque E2EE blobs addressed to
//! exactly one local recipient, so they are delivered by pushing the
//! matching `websocket::events::relay_*` frame straight to that recipient's
//! gateway connections — no local message row is ever created for them.

use axum::{extract::{Path, State}, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    auth,
    error::{AppError, AppResult},
    federation::{self, FederationOrigin},
    models::User,
    snowflake,
    state::AppState,
    websocket::{dispatch::dispatch, events, hub::PresenceRecord},
};

/// `user@domain` -> the **local** (non-federated) user named by its
/// local-part, or `None` if no such account exists on this server.
async fn find_local_user(pool: &sqlx::PgPool, address: &str) -> AppResult<Option<User>> {
    let Some((username, _domain)) = address.split_once('@') else {
        return Ok(None);
    };
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, display_name, password_hash, avatar_url, federated, home_domain,
                active, created_at, updated_at
         FROM users WHERE username = $1 AND federated = FALSE",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

fn fed_user_not_found() -> AppError {
    AppError::Precondition {
        code: "FED_USER_NOT_FOUND",
        message: "User not found on this server".into(),
    }
}

/// Find the federated stub for `address`, creating one lazily on first
/// contact. Federated stubs carry the full address as `username`,
/// `home_domain` set, `display_name` = the address's local part.
async fn find_or_create_federated_user(pool: &sqlx::PgPool, address: &str) -> AppResult<User> {
    let (local_part, domain) = address
        .split_once('@')
        .ok_or_else(|| AppError::Validation("Malformed federation address".into()))?;

    if let Some(user) = sqlx::query_as::<_, User>(
        "SELECT id, username, display_name, password_hash, avatar_url, federated, home_domain,
                active, created_at, updated_at
         FROM users WHERE username = $1 AND federated = TRUE",
    )
    .bind(address)
    .fetch_optional(pool)
    .await?
    {
        return Ok(user);
    }

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (id, username, display_name, federated, home_domain, active)
         VALUES ($1, $2, $3, TRUE, $4, TRUE)
         ON CONFLICT (username, home_domain) DO UPDATE SET username = EXCLUDED.username
         RETURNING id, username, display_name, password_hash, avatar_url, federated, home_domain,
                   active, created_at, updated_at",
    )
    .bind(snowflake::next_id())
    .bind(address)
    .bind(local_part)
    .bind(domain)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

fn domain_matches(address: &str, origin: &str) -> bool {
    address.split_once('@').map(|(_, d)| d) == Some(origin)
}

// ---------------------------------------------------------------------
// Relay endpoints
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RelayMessageRequest {
    pub from: String,
    pub to: String,
    pub payload: Value,
}

/// POST /relay/message — relay an opaque E2EE DM blob to a local recipient.
/// Unlike typing/read, an unknown recipient is a hard 404: the sender needs
/// to know delivery failed.
pub async fn relay_message(
    State(state): State<AppState>,
    FederationOrigin(origin): FederationOrigin,
    Json(body): Json<RelayMessageRequest>,
) -> AppResult<StatusCode> {
    if !domain_matches(&body.from, &origin) {
        return Err(AppError::FederationAuth("Origin does not match sender domain".into()));
    }

    let recipient = find_local_user(&state.pool, &body.to)
        .await?
        .ok_or_else(fed_user_not_found)?;
    find_or_create_federated_user(&state.pool, &body.from).await?;

    dispatch(
        &state.pool,
        &state.hub,
        "relay_message",
        events::relay_message(&body.from, &body.payload),
        Some(&[recipient.id]),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RelayTypingRequest {
    pub from: String,
    pub to: String,
}

/// POST /relay/typing — silently ignored if the recipient isn't local
/// (matches the original: typing indicators aren't worth a hard error).
pub async fn relay_typing(
    State(state): State<AppState>,
    FederationOrigin(_origin): FederationOrigin,
    Json(body): Json<RelayTypingRequest>,
) -> AppResult<StatusCode> {
    let Some(recipient) = find_local_user(&state.pool, &body.to).await? else {
        return Ok(StatusCode::NO_CONTENT);
    };
    find_or_create_federated_user(&state.pool, &body.from).await?;

    dispatch(
        &state.pool,
        &state.hub,
        "relay_typing",
        events::relay_typing(&body.from),
        Some(&[recipient.id]),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RelayReadRequest {
    pub from: String,
    pub to: String,
    pub up_to_msg_id: i64,
}

/// POST /relay/read — same silent-ignore-on-unknown-recipient contract as
/// relay/typing.
pub async fn relay_read(
    State(state): State<AppState>,
    FederationOrigin(_origin): FederationOrigin,
    Json(body): Json<RelayReadRequest>,
) -> AppResult<StatusCode> {
    let Some(recipient) = find_local_user(&state.pool, &body.to).await? else {
        return Ok(StatusCode::NO_CONTENT);
    };
    find_or_create_federated_user(&state.pool, &body.from).await?;

    let payload = serde_json::json!({ "up_to_msg_id": body.up_to_msg_id.to_string() });
    dispatch(
        &state.pool,
        &state.hub,
        "relay_read",
        events::relay_read(&body.from, &payload),
        Some(&[recipient.id]),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------
// User info endpoints
// ---------------------------------------------------------------------

/// A remote peer's read-only view of a local profile. Presence is gateway-only
/// (see `websocket::hub::PresenceRecord`) and deliberately absent here — a peer
/// wanting live status subscribes via `/presence/subscribe` instead.
#[derive(Debug, Serialize)]
pub struct FederatedUserProfile {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// GET /users/:address — a remote peer's read-only view of a local profile.
pub async fn get_federated_profile(
    State(state): State<AppState>,
    FederationOrigin(_origin): FederationOrigin,
    Path(address): Path<String>,
) -> AppResult<Json<FederatedUserProfile>> {
    let user = find_local_user(&state.pool, &address).await?.ok_or_else(fed_user_not_found)?;
    Ok(Json(FederatedUserProfile {
        display_name: user.effective_display_name().to_string(),
        avatar_url: user.avatar_url,
    }))
}

#[derive(Debug, Serialize)]
pub struct FederatedPrekeyResponse {
    pub user_address: String,
    pub bundle: Option<Value>,
}

/// GET /users/:address/prekeys — consume (delete) this local user's oldest
/// one-time prekey bundle and hand it to the requesting peer. Each bundle is
/// single-use; a `null` `bundle` means the user has none uploaded.
pub async fn get_federated_prekeys(
    State(state): State<AppState>,
    FederationOrigin(_origin): FederationOrigin,
    Path(address): Path<String>,
) -> AppResult<Json<FederatedPrekeyResponse>> {
    let user = find_local_user(&state.pool, &address).await?.ok_or_else(fed_user_not_found)?;

    let mut tx = state.pool.begin().await?;
    let row: Option<(i64, Value)> = sqlx::query_as(
        "SELECT id, bundle FROM e2ee_prekeys WHERE user_id = $1 ORDER BY id LIMIT 1 FOR UPDATE",
    )
    .bind(user.id)
    .fetch_optional(&mut *tx)
    .await?;

    let bundle = if let Some((id, bundle)) = row {
        sqlx::query("DELETE FROM e2ee_prekeys WHERE id = $1").bind(id).execute(&mut *tx).await?;
        Some(bundle)
    } else {
        None
    };
    tx.commit().await?;

    Ok(Json(FederatedPrekeyResponse { user_address: address, bundle }))
}

// ---------------------------------------------------------------------
// Presence endpoints
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PresenceSubscribeRequest {
    pub user_address: String,
}

/// POST /presence/subscribe — `origin` wants to be told about future
/// presence changes for one of our local users.
pub async fn presence_subscribe(
    State(state): State<AppState>,
    FederationOrigin(origin): FederationOrigin,
    Json(body): Json<PresenceSubscribeRequest>,
) -> AppResult<StatusCode> {
    find_local_user(&state.pool, &body.user_address).await?.ok_or_else(fed_user_not_found)?;
    federation::add_presence_sub(&state.pool, &origin, &body.user_address).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PresenceNotifyRequest {
    pub user_address: String,
    pub status: String,
    pub custom_status: Option<String>,
}

/// POST /presence/notify — `origin` is telling us one of *its* users'
/// presence changed. The original relays this to local users who share a DM
/// with the remote user; this crate has no DM concept, so the nearest
/// faithful analogue is local users who share a server with the federated
/// stub (the only relationship our schema models between a local and a
/// federated account). Silently ignored if we've never seen this remote
/// user before.
pub async fn presence_notify(
    State(state): State<AppState>,
    FederationOrigin(_origin): FederationOrigin,
    Json(body): Json<PresenceNotifyRequest>,
) -> AppResult<StatusCode> {
    let fed_user: Option<User> = sqlx::query_as(
        "SELECT id, username, display_name, password_hash, avatar_url, federated, home_domain,
                active, created_at, updated_at
         FROM users WHERE username = $1 AND federated = TRUE",
    )
    .bind(&body.user_address)
    .fetch_optional(&state.pool)
    .await?;

    let Some(fed_user) = fed_user else {
        return Ok(StatusCode::NO_CONTENT);
    };

    // Federated presence has exactly the same single home as local presence:
    // the hub's in-memory table, never a DB column.
    state
        .hub
        .set_presence(PresenceRecord {
            user_id: fed_user.id,
            status: body.status.clone(),
            custom_status: body.custom_status.clone(),
            activity: None,
        })
        .await;

    let local_user_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT sm2.user_id
         FROM server_members sm1
         JOIN server_members sm2 ON sm2.server_id = sm1.server_id
         JOIN users u ON u.id = sm2.user_id
         WHERE sm1.user_id = $1 AND sm2.user_id != $1 AND u.federated = FALSE",
    )
    .bind(fed_user.id)
    .fetch_all(&state.pool)
    .await?;

    if !local_user_ids.is_empty() {
        dispatch(
            &state.pool,
            &state.hub,
            "presence_update",
            events::presence_update(fed_user.id, &body.status, body.custom_status.as_deref()),
            Some(&local_user_ids),
        )
        .await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------
// Join & block
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FederationJoinRequest {
    pub user_address: String,
    pub voucher: String,
}

#[derive(Debug, Serialize)]
pub struct FederationJoinResponse {
    pub accepted: bool,
    pub federation_token: String,
    pub server_info: Value,
}

/// POST /join — a remote user presents a voucher vouching that their home
/// server issued it to visit us; on success we mint a `fed_`-prefixed
/// session token scoped to their lazily-created local stub.
///
/// `auth::create_session` is hardcoded to the ordinary `vox_sess_` prefix,
/// so federation tokens are minted here directly rather than through it.
pub async fn federation_join(
    State(state): State<AppState>,
    FederationOrigin(_origin): FederationOrigin,
    Json(body): Json<FederationJoinRequest>,
) -> AppResult<Json<FederationJoinResponse>> {
    let voucher = federation::verify_voucher(&state.pool, &body.voucher, &state.config.federation_domain).await?;

    if voucher.user_address != body.user_address {
        return Err(AppError::FederationAuth("Voucher user_address mismatch".into()));
    }

    let fed_user = find_or_create_federated_user(&state.pool, &body.user_address).await?;

    let token = auth::generate_token(auth::PREFIX_FEDERATION);
    let token_hash = auth::hash_token(&token);
    let expires_at = chrono::Utc::now() + chrono::Duration::days(30);
    sqlx::query("INSERT INTO sessions (user_id, token_hash, expires_at) VALUES ($1, $2, $3)")
        .bind(fed_user.id)
        .bind(&token_hash)
        .bind(expires_at)
        .execute(&state.pool)
        .await?;

    let server_name: Option<String> =
        sqlx::query_scalar("SELECT value FROM config WHERE key = 'server_name'")
            .fetch_optional(&state.pool)
            .await?;

    Ok(Json(FederationJoinResponse {
        accepted: true,
        federation_token: token,
        server_info: serde_json::json!({
            "name": server_name.unwrap_or_else(|| "Vox Server".into()),
            "domain": state.config.federation_domain,
        }),
    }))
}

#[derive(Debug, Deserialize)]
pub struct FederationBlockRequest {
    pub reason: Option<String>,
}

/// POST /block — a remote server unilaterally severing federation with us.
/// Idempotent: blocking twice is a no-op. Deactivates (doesn't delete) every
/// federated stub we've created for that domain.
pub async fn federation_block(
    State(state): State<AppState>,
    FederationOrigin(origin): FederationOrigin,
    Json(body): Json<FederationBlockRequest>,
) -> AppResult<StatusCode> {
    sqlx::query(
        "INSERT INTO federation_entries (id, entry, reason) VALUES ($1, $2, $3)
         ON CONFLICT (entry) DO NOTHING",
    )
    .bind(snowflake::next_id())
    .bind(&origin)
    .bind(body.reason.as_deref().unwrap_or("Remote server initiated block"))
    .execute(&state.pool)
    .await?;

    sqlx::query("UPDATE users SET active = FALSE WHERE home_domain = $1 AND federated = TRUE")
        .bind(&origin)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_matches_checks_the_address_suffix() {
        assert!(domain_matches("alice@chat.example.org", "chat.example.org"));
        assert!(!domain_matches("alice@chat.example.org", "other.org"));
        assert!(!domain_matches("not-an-address", "chat.example.org"));
    }
}
