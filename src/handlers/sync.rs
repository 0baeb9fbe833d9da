//! Catch-up sync REST surface: a thin wrapper around [`crate::sync::sync`]
//! for clients that reconnect too late for the gateway's replay buffer to
//! cover the gap.

use axum::{extract::{Query, State}, Json};
use serde::Deserialize;

use crate::{
    auth::AuthUser,
    error::AppResult,
    state::AppState,
    sync::{self, SyncResponse},
};

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    /// Comma-separated category names (e.g. `members,roles,feeds`).
    pub categories: String,
    pub since_timestamp: i64,
}

/// GET /api/v1/sync?categories=...&since_timestamp=... — any authenticated
/// user may call this; category membership isn't scoped per-server, it's a
/// replay of everything syncable since the given timestamp.
pub async fn get_sync(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<SyncQuery>,
) -> AppResult<Json<SyncResponse>> {
    let categories: Vec<String> = query
        .categories
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let response = sync::sync(&state.pool, &categories, query.since_timestamp).await?;
    Ok(Json(response))
}
