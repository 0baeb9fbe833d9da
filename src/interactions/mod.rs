//! Ephemeral in-memory interaction store.
//!
//! Interactions (slash commands, button/select component clicks) are
//! short-lived: a bot has a bounded window to `consume` one and respond.
//! `get` peeks without removing (used to validate before a deferred
//! response); `consume` is one-shot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::Value;
use tokio::sync::Mutex;

pub const INTERACTION_TTL_S: u64 = 900;

#[derive(Debug, Clone)]
pub struct Interaction {
    pub id: String,
    pub kind: String,
    pub command: Option<String>,
    pub params: Value,
    pub user_id: i64,
    pub feed_id: Option<i64>,
    pub dm_id: Option<i64>,
    pub bot_id: i64,
    created_at: Instant,
}

#[derive(Clone)]
pub struct InteractionStore {
    inner: Arc<Mutex<HashMap<String, Interaction>>>,
}

impl InteractionStore {
    pub fn new() -> Self {
        InteractionStore {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        kind: &str,
        command: Option<&str>,
        params: Value,
        user_id: i64,
        feed_id: Option<i64>,
        dm_id: Option<i64>,
        bot_id: i64,
    ) -> Interaction {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        let id = format!("ix_{}", hex::encode(bytes));

        let interaction = Interaction {
            id: id.clone(),
            kind: kind.to_string(),
            command: command.map(str::to_string),
            params,
            user_id,
            feed_id,
            dm_id,
            bot_id,
            created_at: Instant::now(),
        };
        self.inner.lock().await.insert(id, interaction.clone());
        interaction
    }

    /// Peek without removing; evicts and returns `None` if the TTL elapsed.
    pub async fn get(&self, id: &str) -> Option<Interaction> {
        let mut store = self.inner.lock().await;
        let expired = store
            .get(id)
            .map(|ix| ix.created_at.elapsed() > Duration::from_secs(INTERACTION_TTL_S))
            .unwrap_or(false);
        if expired {
            store.remove(id);
            return None;
        }
        store.get(id).cloned()
    }

    /// Remove and return, unless the TTL already elapsed.
    pub async fn consume(&self, id: &str) -> Option<Interaction> {
        let mut store = self.inner.lock().await;
        let interaction = store.remove(id)?;
        if interaction.created_at.elapsed() > Duration::from_secs(INTERACTION_TTL_S) {
            return None;
        }
        Some(interaction)
    }

    #[cfg(test)]
    pub async fn reset(&self) {
        self.inner.lock().await.clear();
    }
}

impl Default for InteractionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_generates_unique_ids() {
        let store = InteractionStore::new();
        let a = store.create("button", None, json!({}), 1, None, None, 1).await;
        let b = store.create("button", None, json!({}), 1, None, None, 1).await;
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn get_returns_the_stored_interaction() {
        let store = InteractionStore::new();
        let ix = store
            .create("slash_command", Some("/help"), json!({}), 1, Some(1), None, 1)
            .await;
        let fetched = store.get(&ix.id).await.unwrap();
        assert_eq!(fetched.command.as_deref(), Some("/help"));
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_id() {
        let store = InteractionStore::new();
        assert!(store.get("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn consume_removes_the_interaction() {
        let store = InteractionStore::new();
        let ix = store.create("slash_command", Some("/roll"), json!({}), 1, Some(1), None, 1).await;
        let consumed = store.consume(&ix.id).await;
        assert!(consumed.is_some());
        assert!(store.get(&ix.id).await.is_none());
    }

    #[tokio::test]
    async fn consume_returns_none_for_unknown() {
        let store = InteractionStore::new();
        assert!(store.consume("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn reset_clears_all_interactions() {
        let store = InteractionStore::new();
        store.create("button", None, json!({}), 1, None, None, 1).await;
        store.create("button", None, json!({}), 2, None, None, 2).await;
        store.reset().await;
        assert!(store.get("anything").await.is_none());
    }
}
