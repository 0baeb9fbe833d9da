use reqwest::Client;
use sqlx::PgPool;

use crate::config::Config;
use crate::interactions::InteractionStore;
use crate::ratelimit::RateLimiter;
use crate::websocket::hub::Hub;

/// Shared application state passed to all handlers and extractors.
///
/// `Hub`, `RateLimiter`, and `InteractionStore` are cheaply cloneable (each
/// wraps an `Arc` internally), so cloning `AppState` per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub hub: Hub,
    pub rate_limiter: RateLimiter,
    pub interactions: InteractionStore,
    /// Shared client for outbound federation HTTP (signed S2S requests).
    pub http_client: Client,
}
