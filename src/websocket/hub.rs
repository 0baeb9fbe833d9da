//! Process-wide gateway hub.
//!
//! Four maps guarded by one lock: connections, preserved sessions, presence,
//! and per-IP connection counts. Admission, session eviction, and presence
//! clearing all happen under that single lock so the read-then-write
//! sequences around a user's last disconnect and presence truth never race.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::websocket::connection::ConnectionHandle;

/// Why a connection attempt was refused admission, mapped to a gateway close
/// code by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    ServerFull,
    RateLimited,
}

/// Session state preserved across a disconnect so `resume` can replay
/// missed events — the replay buffer is always a contiguous suffix ending
/// at `last_seq`.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub user_id: i64,
    pub replay_buffer: VecDeque<serde_json::Value>,
    pub seq: i64,
    pub created_at: Instant,
    replay_capacity: usize,
}

impl SessionState {
    fn new(user_id: i64, replay_capacity: usize) -> Self {
        SessionState {
            user_id,
            replay_buffer: VecDeque::with_capacity(replay_capacity),
            seq: 0,
            created_at: Instant::now(),
            replay_capacity,
        }
    }

    pub fn push(&mut self, event: serde_json::Value) {
        if self.replay_buffer.len() >= self.replay_capacity {
            self.replay_buffer.pop_front();
        }
        self.replay_buffer.push_back(event);
    }
}

#[derive(Debug, Clone)]
pub struct PresenceRecord {
    pub user_id: i64,
    pub status: String,
    pub custom_status: Option<String>,
    pub activity: Option<serde_json::Value>,
}

struct HubInner {
    connections: HashMap<i64, HashSet<ConnectionHandle>>,
    sessions: HashMap<String, SessionState>,
    presence: HashMap<i64, PresenceRecord>,
    ip_connections: HashMap<String, usize>,
    auth_failures: HashMap<String, Vec<Instant>>,
}

/// Cheaply cloneable — every clone shares the same locked state via `Arc`.
/// The tuning fields below are plain copies set once at construction from
/// [`crate::config::Config`], never mutated — no lock needed to read them.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Mutex<HubInner>>,
    max_total_connections: usize,
    max_connections_per_ip: usize,
    max_sessions_per_user: usize,
    session_max_age_s: u64,
    replay_buffer_size: usize,
    auth_fail_threshold: usize,
    auth_fail_window_s: f64,
}

impl Hub {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        max_total_connections: usize,
        max_connections_per_ip: usize,
        max_sessions_per_user: usize,
        session_max_age_s: u64,
        replay_buffer_size: usize,
        auth_fail_threshold: usize,
        auth_fail_window_s: f64,
    ) -> Self {
        Hub {
            inner: Arc::new(Mutex::new(HubInner {
                connections: HashMap::new(),
                sessions: HashMap::new(),
                presence: HashMap::new(),
                ip_connections: HashMap::new(),
                auth_failures: HashMap::new(),
            })),
            max_total_connections,
            max_connections_per_ip,
            max_sessions_per_user,
            session_max_age_s,
            replay_buffer_size,
            auth_fail_threshold,
            auth_fail_window_s,
        }
    }

    /// Build a fresh [`SessionState`] sized to this hub's configured replay
    /// buffer capacity.
    pub fn new_session(&self, user_id: i64) -> SessionState {
        SessionState::new(user_id, self.replay_buffer_size)
    }

    /// Register a connection. `Ok(())` on success, `Err(reason)` on rejection.
    pub async fn connect(&self, conn: ConnectionHandle, ip: &str) -> Result<(), AdmissionError> {
        let mut inner = self.inner.lock().await;

        let total: usize = inner.connections.values().map(|c| c.len()).sum();
        if total >= self.max_total_connections {
            return Err(AdmissionError::ServerFull);
        }
        if !ip.is_empty() {
            let current = *inner.ip_connections.get(ip).unwrap_or(&0);
            if current >= self.max_connections_per_ip {
                return Err(AdmissionError::RateLimited);
            }
        }
        let existing = inner.connections.get(&conn.user_id).map(|c| c.len()).unwrap_or(0);
        if existing >= self.max_sessions_per_user {
            return Err(AdmissionError::RateLimited);
        }

        inner
            .connections
            .entry(conn.user_id)
            .or_default()
            .insert(conn);
        if !ip.is_empty() {
            *inner.ip_connections.entry(ip.to_string()).or_insert(0) += 1;
        }
        Ok(())
    }

    /// Remove a connection and, if it was the user's last one, clear
    /// presence — atomically, to close the race between a final disconnect
    /// and a fresh connect for the same user. Returns `true` if presence was
    /// cleared (the caller must then
    /// broadcast `presence_update(status=offline)`).
    pub async fn disconnect(&self, conn: &ConnectionHandle, ip: &str) -> bool {
        let mut inner = self.inner.lock().await;

        if let Some(conns) = inner.connections.get_mut(&conn.user_id) {
            conns.remove(conn);
            if conns.is_empty() {
                inner.connections.remove(&conn.user_id);
            }
        }
        if !ip.is_empty() {
            if let Some(count) = inner.ip_connections.get_mut(ip) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    inner.ip_connections.remove(ip);
                }
            }
        }

        let has_connections = inner.connections.contains_key(&conn.user_id);
        if !has_connections {
            inner.presence.remove(&conn.user_id);
        }
        !has_connections
    }

    pub async fn save_session(&self, session_id: String, state: SessionState) {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(session_id, state);
        self.cleanup_sessions_locked(&mut inner.sessions);
    }

    pub async fn get_session(&self, session_id: &str) -> Option<SessionState> {
        let mut inner = self.inner.lock().await;
        let expired = inner
            .sessions
            .get(session_id)
            .map(|s| s.created_at.elapsed().as_secs() > self.session_max_age_s)
            .unwrap_or(false);
        if expired {
            inner.sessions.remove(session_id);
            return None;
        }
        inner.sessions.get(session_id).cloned()
    }

    /// Write `seq`/replay-buffer back into the hub's copy of a preserved
    /// session, so a later `resume` sees events sent after `save_session`.
    pub async fn update_session(&self, session_id: &str, event: serde_json::Value, seq: i64) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.push(event);
            session.seq = seq;
        }
    }

    pub async fn refresh_session_ttl(&self, session_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.created_at = Instant::now();
        }
    }

    pub async fn cleanup_sessions(&self) {
        let mut inner = self.inner.lock().await;
        self.cleanup_sessions_locked(&mut inner.sessions);
    }

    fn cleanup_sessions_locked(&self, sessions: &mut HashMap<String, SessionState>) {
        sessions.retain(|_, s| s.created_at.elapsed().as_secs() <= self.session_max_age_s);
    }

    /// Snapshot target connections under lock, then return them for the
    /// caller to fan out to without holding the lock across I/O.
    pub async fn targets(&self, user_ids: Option<&[i64]>) -> Vec<ConnectionHandle> {
        let inner = self.inner.lock().await;
        match user_ids {
            None => inner.connections.values().flatten().cloned().collect(),
            Some(ids) => ids
                .iter()
                .filter_map(|uid| inner.connections.get(uid))
                .flatten()
                .cloned()
                .collect(),
        }
    }

    pub async fn connected_user_ids(&self) -> Vec<i64> {
        let inner = self.inner.lock().await;
        inner.connections.keys().copied().collect()
    }

    pub async fn is_connected(&self, user_id: i64) -> bool {
        let inner = self.inner.lock().await;
        inner.connections.contains_key(&user_id)
    }

    pub async fn set_presence(&self, record: PresenceRecord) {
        let mut inner = self.inner.lock().await;
        inner.presence.insert(record.user_id, record);
    }

    pub async fn get_presence(&self, user_id: i64) -> PresenceRecord {
        let inner = self.inner.lock().await;
        if inner.connections.contains_key(&user_id) {
            if let Some(p) = inner.presence.get(&user_id) {
                return p.clone();
            }
        }
        PresenceRecord {
            user_id,
            status: "offline".to_string(),
            custom_status: None,
            activity: None,
        }
    }

    pub async fn presence_snapshot(&self, exclude: i64) -> Vec<PresenceRecord> {
        let inner = self.inner.lock().await;
        inner
            .presence
            .values()
            .filter(|p| p.user_id != exclude)
            .cloned()
            .collect()
    }

    pub async fn cleanup_orphaned_presence(&self) {
        let mut inner = self.inner.lock().await;
        let orphaned: Vec<i64> = inner
            .presence
            .keys()
            .filter(|uid| !inner.connections.contains_key(uid))
            .copied()
            .collect();
        for uid in orphaned {
            inner.presence.remove(&uid);
        }
    }

    pub async fn record_auth_failure(&self, ip: &str) {
        let mut inner = self.inner.lock().await;
        inner.auth_failures.entry(ip.to_string()).or_default().push(Instant::now());
    }

    pub async fn is_auth_rate_limited(&self, ip: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(failures) = inner.auth_failures.get_mut(ip) else {
            return false;
        };
        failures.retain(|t| t.elapsed().as_secs_f64() < self.auth_fail_window_s);
        failures.len() >= self.auth_fail_threshold
    }

    pub async fn cleanup_auth_failures(&self) {
        let mut inner = self.inner.lock().await;
        let window = self.auth_fail_window_s;
        inner.auth_failures.retain(|_, failures| {
            failures.retain(|t| t.elapsed().as_secs_f64() < window);
            !failures.is_empty()
        });
    }
}
