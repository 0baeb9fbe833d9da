//! 64-bit capability bitfield resolution.
//!
//! A plain `u64` newtype, not `bitflags!` — overrides need raw allow/deny
//! mask arithmetic (`(perms & !deny) | allow`) that `bitflags!`'s typed set
//! operations don't make more ergonomic here.

use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{PermissionOverride, Role};

pub const VIEW_SPACE: u64 = 1 << 0;
pub const SEND_MESSAGES: u64 = 1 << 1;
pub const SEND_EMBEDS: u64 = 1 << 2;
pub const ATTACH_FILES: u64 = 1 << 3;
pub const ADD_REACTIONS: u64 = 1 << 4;
pub const READ_HISTORY: u64 = 1 << 5;
pub const MENTION_EVERYONE: u64 = 1 << 6;
pub const CONNECT: u64 = 1 << 8;
pub const SPEAK: u64 = 1 << 9;
pub const VIDEO: u64 = 1 << 10;
pub const MUTE_MEMBERS: u64 = 1 << 11;
pub const DEAFEN_MEMBERS: u64 = 1 << 12;
pub const MOVE_MEMBERS: u64 = 1 << 13;
pub const PRIORITY_SPEAKER: u64 = 1 << 14;
pub const STREAM: u64 = 1 << 15;
pub const STAGE_MODERATOR: u64 = 1 << 16;
pub const CREATE_THREADS: u64 = 1 << 17;
pub const MANAGE_THREADS: u64 = 1 << 18;
pub const SEND_IN_THREADS: u64 = 1 << 19;
pub const MANAGE_SPACES: u64 = 1 << 24;
pub const MANAGE_ROLES: u64 = 1 << 25;
pub const MANAGE_EMOJI: u64 = 1 << 26;
pub const MANAGE_WEBHOOKS: u64 = 1 << 27;
pub const MANAGE_SERVER: u64 = 1 << 28;
pub const KICK_MEMBERS: u64 = 1 << 29;
pub const BAN_MEMBERS: u64 = 1 << 30;
pub const CREATE_INVITES: u64 = 1 << 31;
pub const CHANGE_NICKNAME: u64 = 1 << 32;
pub const MANAGE_NICKNAMES: u64 = 1 << 33;
pub const VIEW_AUDIT_LOG: u64 = 1 << 34;
pub const MANAGE_MESSAGES: u64 = 1 << 35;
pub const VIEW_REPORTS: u64 = 1 << 36;
pub const MANAGE_2FA: u64 = 1 << 37;
pub const MANAGE_REPORTS: u64 = 1 << 38;
pub const ADMINISTRATOR: u64 = 1 << 62;

pub const ALL_PERMISSIONS: u64 = (1u64 << 63) - 1;

pub const EVERYONE_DEFAULTS: u64 = VIEW_SPACE
    | SEND_MESSAGES
    | READ_HISTORY
    | ADD_REACTIONS
    | CONNECT
    | SPEAK
    | CREATE_INVITES
    | CHANGE_NICKNAME
    | CREATE_THREADS
    | SEND_IN_THREADS;

/// A resolved space, identifying which channel table a [`PermissionOverride`]
/// scopes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceType {
    Feed,
    Room,
}

impl SpaceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SpaceType::Feed => "feed",
            SpaceType::Room => "room",
        }
    }
}

/// `resolve(user_id, space_type?, space_id?) -> u64`.
///
/// Missing role/user yields 0, not an error; only DB errors propagate.
pub async fn resolve(
    pool: &PgPool,
    server_id: Uuid,
    user_id: i64,
    space: Option<(SpaceType, Uuid)>,
) -> AppResult<u64> {
    let everyone_role: Option<Role> = sqlx::query_as(
        "SELECT id, server_id, name, color, permissions, position, created_at
         FROM roles WHERE server_id = $1 AND position = 0",
    )
    .bind(server_id)
    .fetch_optional(pool)
    .await?;
    let mut base = everyone_role.as_ref().map(|r| r.permissions as u64).unwrap_or(0);

    let user_role_ids: HashSet<i64> = sqlx::query_scalar(
        "SELECT role_id FROM role_members WHERE user_id = $1
         AND role_id IN (SELECT id FROM roles WHERE server_id = $2)",
    )
    .bind(user_id)
    .bind(server_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .collect();

    if !user_role_ids.is_empty() {
        let ids: Vec<i64> = user_role_ids.iter().copied().collect();
        let roles: Vec<Role> = sqlx::query_as(
            "SELECT id, server_id, name, color, permissions, position, created_at
             FROM roles WHERE id = ANY($1) AND position != 0",
        )
        .bind(&ids)
        .fetch_all(pool)
        .await?;
        for role in roles {
            base |= role.permissions as u64;
        }
    }

    // Early admin short-circuit (before overrides — admin overrides everything).
    if base & ADMINISTRATOR != 0 {
        return Ok(ALL_PERMISSIONS);
    }

    if let Some((space_type, space_id)) = space {
        let overrides: Vec<PermissionOverride> = sqlx::query_as(
            "SELECT id, space_type, space_id, target_type, target_id, allow, deny
             FROM permission_overrides WHERE space_type = $1 AND space_id = $2",
        )
        .bind(space_type.as_str())
        .bind(space_id)
        .fetch_all(pool)
        .await?;

        let everyone_role_id = everyone_role.as_ref().map(|r| r.id);

        // 5a. @everyone role override.
        for o in &overrides {
            if o.target_type == "role" && Some(o.target_id) == everyone_role_id {
                base = (base & !(o.deny as u64)) | (o.allow as u64);
            }
        }

        // 5b. Union of all user-role overrides, applied once.
        let mut role_allow = 0u64;
        let mut role_deny = 0u64;
        for o in &overrides {
            if o.target_type == "role" && user_role_ids.contains(&o.target_id) {
                role_allow |= o.allow as u64;
                role_deny |= o.deny as u64;
            }
        }
        base = (base & !role_deny) | role_allow;

        // 5c. User-specific override.
        for o in &overrides {
            if o.target_type == "user" && o.target_id == user_id {
                base = (base & !(o.deny as u64)) | (o.allow as u64);
            }
        }
    }

    if base & ADMINISTRATOR != 0 {
        return Ok(ALL_PERMISSIONS);
    }

    Ok(base)
}

pub fn has(resolved: u64, required: u64) -> bool {
    (resolved & required) == required
}

/// Resolves permissions for N users in one override fetch.
pub async fn batch_resolve(
    pool: &PgPool,
    server_id: Uuid,
    user_ids: &[i64],
    space: Option<(SpaceType, Uuid)>,
) -> AppResult<HashMap<i64, u64>> {
    let everyone_role: Option<Role> = sqlx::query_as(
        "SELECT id, server_id, name, color, permissions, position, created_at
         FROM roles WHERE server_id = $1 AND position = 0",
    )
    .bind(server_id)
    .fetch_optional(pool)
    .await?;
    let everyone_perms = everyone_role.as_ref().map(|r| r.permissions as u64).unwrap_or(0);
    let everyone_role_id = everyone_role.as_ref().map(|r| r.id);

    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT user_id, role_id FROM role_members WHERE user_id = ANY($1)
         AND role_id IN (SELECT id FROM roles WHERE server_id = $2)",
    )
    .bind(user_ids)
    .bind(server_id)
    .fetch_all(pool)
    .await?;

    let mut user_role_map: HashMap<i64, HashSet<i64>> =
        user_ids.iter().map(|&uid| (uid, HashSet::new())).collect();
    for (uid, rid) in rows {
        user_role_map.entry(uid).or_default().insert(rid);
    }

    let all_role_ids: HashSet<i64> = user_role_map.values().flatten().copied().collect();
    let mut role_perms: HashMap<i64, u64> = HashMap::new();
    if !all_role_ids.is_empty() {
        let ids: Vec<i64> = all_role_ids.into_iter().collect();
        let roles: Vec<Role> = sqlx::query_as(
            "SELECT id, server_id, name, color, permissions, position, created_at
             FROM roles WHERE id = ANY($1) AND position != 0",
        )
        .bind(&ids)
        .fetch_all(pool)
        .await?;
        for role in roles {
            role_perms.insert(role.id, role.permissions as u64);
        }
    }

    let overrides: Vec<PermissionOverride> = if let Some((space_type, space_id)) = space {
        sqlx::query_as(
            "SELECT id, space_type, space_id, target_type, target_id, allow, deny
             FROM permission_overrides WHERE space_type = $1 AND space_id = $2",
        )
        .bind(space_type.as_str())
        .bind(space_id)
        .fetch_all(pool)
        .await?
    } else {
        Vec::new()
    };

    let mut results = HashMap::with_capacity(user_ids.len());
    for &uid in user_ids {
        let role_ids = user_role_map.get(&uid).cloned().unwrap_or_default();
        let mut base = everyone_perms;
        for rid in &role_ids {
            base |= role_perms.get(rid).copied().unwrap_or(0);
        }

        if base & ADMINISTRATOR != 0 {
            results.insert(uid, ALL_PERMISSIONS);
            continue;
        }

        if !overrides.is_empty() {
            for o in &overrides {
                if o.target_type == "role" && Some(o.target_id) == everyone_role_id {
                    base = (base & !(o.deny as u64)) | (o.allow as u64);
                }
            }
            let mut role_allow = 0u64;
            let mut role_deny = 0u64;
            for o in &overrides {
                if o.target_type == "role" && role_ids.contains(&o.target_id) {
                    role_allow |= o.allow as u64;
                    role_deny |= o.deny as u64;
                }
            }
            base = (base & !role_deny) | role_allow;
            for o in &overrides {
                if o.target_type == "user" && o.target_id == uid {
                    base = (base & !(o.deny as u64)) | (o.allow as u64);
                }
            }
        }

        results.insert(uid, if base & ADMINISTRATOR != 0 { ALL_PERMISSIONS } else { base });
    }

    Ok(results)
}
