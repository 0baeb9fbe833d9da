//! Per-(principal, category) token-bucket rate limiting.
//!
//! Layered alongside (not instead of) the blunt per-IP `tower_governor` shield
//! installed in `main.rs`: governor catches floods before a request is even
//! classified, this enforces a finer-grained per-principal budget on top.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::auth;
use crate::error::AppError;
use crate::state::AppState;

/// category -> (max_tokens, refill_per_second).
static CATEGORIES: Lazy<HashMap<&'static str, (u32, f64)>> = Lazy::new(|| {
    HashMap::from([
        ("auth", (5, 0.1)),
        ("messages", (50, 1.0)),
        ("channels", (20, 0.5)),
        ("roles", (10, 0.2)),
        ("members", (20, 0.5)),
        ("invites", (10, 0.2)),
        ("webhooks", (10, 0.2)),
        ("emoji", (10, 0.2)),
        ("moderation", (10, 0.2)),
        ("voice", (30, 1.0)),
        ("server", (10, 0.2)),
        ("bots", (10, 0.2)),
        ("e2ee", (30, 0.5)),
        ("search", (10, 0.1)),
        ("files", (20, 0.5)),
        ("federation", (50, 1.0)),
    ])
});

const DEFAULT_CATEGORY: (u32, f64) = (10, 0.2);
const TOKEN_CACHE_TTL: Duration = Duration::from_secs(30);
const SKIP_PREFIXES: &[&str] = &["/gateway", "/docs", "/openapi.json"];

/// Map a request path to a rate-limit category (`ratelimit.py::classify`).
pub fn classify(path: &str) -> &'static str {
    if path.contains("/messages") {
        return "messages";
    }
    if path.starts_with("/api/v1/webhooks/") && path.contains("/execute") {
        return "messages";
    }
    if path.contains("/search") {
        return "search";
    }
    const PREFIX_MAP: &[(&str, &str)] = &[
        ("/api/v1/auth", "auth"),
        ("/api/v1/feeds", "channels"),
        ("/api/v1/rooms", "channels"),
        ("/api/v1/categories", "channels"),
        ("/api/v1/threads", "channels"),
        ("/api/v1/roles", "roles"),
        ("/api/v1/members", "members"),
        ("/api/v1/invites", "invites"),
        ("/api/v1/webhooks", "webhooks"),
        ("/api/v1/emoji", "emoji"),
        ("/api/v1/stickers", "emoji"),
        ("/api/v1/moderation", "moderation"),
        ("/api/v1/voice", "voice"),
        ("/api/v1/server", "server"),
        ("/api/v1/bots", "bots"),
        ("/api/v1/keys", "e2ee"),
        ("/api/v1/dms", "messages"),
        ("/api/v1/files", "files"),
        ("/api/v1/federation", "federation"),
        ("/api/v1/reports", "moderation"),
        ("/api/v1/admin", "moderation"),
        ("/api/v1/users", "members"),
    ];
    for (prefix, cat) in PREFIX_MAP {
        if path.starts_with(prefix) {
            return cat;
        }
    }
    "server"
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Outcome of a bucket check: whether the request may proceed, the category
/// limit, tokens remaining, and (if rejected) how long to wait.
pub struct CheckResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_epoch_s: u64,
    pub retry_after_ms: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<(String, String), Bucket>>>,
    token_cache: Arc<Mutex<HashMap<String, (i64, Instant)>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            token_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn check(&self, key: &str, category: &str) -> CheckResult {
        let (max_tokens, refill_rate) = CATEGORIES.get(category).copied().unwrap_or(DEFAULT_CATEGORY);
        let max_tokens_f = max_tokens as f64;
        let now = Instant::now();
        let epoch_now = chrono::Utc::now().timestamp() as u64;

        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry((key.to_string(), category.to_string()))
            .or_insert_with(|| Bucket {
                tokens: max_tokens_f,
                last_refill: now,
            });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_rate).min(max_tokens_f);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            let remaining = bucket.tokens as u32;
            let reset_in = if refill_rate > 0.0 {
                ((max_tokens_f - bucket.tokens) / refill_rate) as u64
            } else {
                0
            };
            CheckResult {
                allowed: true,
                limit: max_tokens,
                remaining,
                reset_epoch_s: epoch_now + reset_in,
                retry_after_ms: 0,
            }
        } else {
            let wait_s = if refill_rate > 0.0 {
                (1.0 - bucket.tokens) / refill_rate
            } else {
                1.0
            };
            CheckResult {
                allowed: false,
                limit: max_tokens,
                remaining: 0,
                reset_epoch_s: epoch_now + wait_s.ceil() as u64,
                retry_after_ms: (wait_s * 1000.0).ceil() as u64,
            }
        }
    }

    /// Test-only: clear every bucket so cases don't interleave.
    #[cfg(test)]
    pub async fn reset(&self) {
        self.buckets.lock().await.clear();
    }

    async fn cached_user_id(&self, token: &str) -> Option<i64> {
        let mut cache = self.token_cache.lock().await;
        match cache.get(token) {
            Some((uid, expires)) if Instant::now() < *expires => Some(*uid),
            Some(_) => {
                cache.remove(token);
                None
            }
            None => None,
        }
    }

    async fn cache_user_id(&self, token: &str, user_id: i64) {
        self.token_cache
            .lock()
            .await
            .insert(token.to_string(), (user_id, Instant::now() + TOKEN_CACHE_TTL));
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the bucket key for a request: `fed:<ip>` for federation traffic,
/// `webhook:<id>` for webhook execution, a 30s-cached `user:<id>` for bearer
/// tokens, else `ip:<ip>`.
async fn resolve_key(state: &AppState, path: &str, ip: &str, bearer: Option<&str>) -> String {
    if path.starts_with("/api/v1/federation") {
        return format!("fed:{ip}");
    }
    if path.starts_with("/api/v1/webhooks/") && path.contains("/execute") {
        let id = path.split('/').nth(4).unwrap_or("unknown");
        return format!("webhook:{id}");
    }
    if let Some(token) = bearer {
        if let Some(uid) = state.rate_limiter.cached_user_id(token).await {
            return format!("user:{uid}");
        }
        if let Ok(user) = auth::authenticate_token(&state.pool, token, auth::PREFIX_SESSION).await {
            state.rate_limiter.cache_user_id(token, user.id).await;
            return format!("user:{}", user.id);
        }
    }
    format!("ip:{ip}")
}

/// `axum::middleware::from_fn_with_state` layer enforcing the category bucket
/// and stamping `X-RateLimit-*` response headers.
pub async fn rate_limit_layer(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if SKIP_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return next.run(request).await;
    }

    let category = classify(&path);
    let bearer = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("Bot ")));
    let key = resolve_key(&state, &path, &addr.ip().to_string(), bearer).await;

    let result = state.rate_limiter.check(&key, category).await;
    if !result.allowed {
        use axum::response::IntoResponse;
        let code = if category == "auth" { "AUTH_RATE_LIMITED" } else { "RATE_LIMITED" };
        return AppError::RateLimited {
            code,
            retry_after_ms: result.retry_after_ms,
            limit: result.limit as u64,
            remaining: 0,
            reset: result.reset_epoch_s,
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", result.limit.to_string().parse().unwrap());
    headers.insert("X-RateLimit-Remaining", result.remaining.to_string().parse().unwrap());
    headers.insert("X-RateLimit-Reset", result.reset_epoch_s.to_string().parse().unwrap());
    response
}
