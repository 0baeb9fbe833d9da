use std::env;

/// Process-wide configuration, loaded once at startup.
///
/// Federation identity (`federation_domain`) and the signing keypair are
/// separate concerns: the domain is static config, the keypair is persisted
/// in the `config` table and created lazily on first use.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub is_dev: bool,
    /// CORS allow-list for the REST/gateway surface; empty in prod means
    /// "reflect no origin" (tower-http `CorsLayer::new()` stays closed).
    pub allowed_origins: Vec<String>,

    /// This server's federation domain, e.g. `chat.example.org`. Used both to
    /// answer `_voxkey`/`_voxpolicy` DNS lookups made of us, and to stamp
    /// `X-Vox-Origin` on outbound requests.
    pub federation_domain: String,
    /// `open`, `closed`, or `allowlist` — mirrors the `_voxpolicy` TXT record
    /// we publish.
    pub federation_policy: String,
    pub federation_request_timeout_s: u64,
    /// Vouchers older than this are rejected outright regardless of caller TTL.
    pub federation_voucher_max_ttl_s: i64,
    /// Max skew tolerated between a signed request's `X-Vox-Timestamp` and now.
    pub federation_max_clock_skew_s: i64,

    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_factor: f64,
    pub identify_timeout_s: u64,
    pub replay_buffer_size: usize,
    pub session_max_age_s: i64,
    pub max_total_connections: usize,
    pub max_connections_per_ip: usize,
    pub max_sessions_per_user: usize,
    pub auth_fail_threshold: u32,
    pub auth_fail_window_s: f64,

    pub session_lifetime_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            is_dev: env::var("VOX_ENV").map(|v| v != "production").unwrap_or(true),
            allowed_origins: env::var("VOX_ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),

            federation_domain: env::var("VOX_FEDERATION_DOMAIN")
                .unwrap_or_else(|_| "localhost".to_string()),
            federation_policy: env::var("VOX_FEDERATION_POLICY")
                .unwrap_or_else(|_| "open".to_string()),
            federation_request_timeout_s: env::var("VOX_FEDERATION_TIMEOUT_S")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            federation_voucher_max_ttl_s: env::var("VOX_VOUCHER_MAX_TTL_S")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            federation_max_clock_skew_s: env::var("VOX_FEDERATION_MAX_SKEW_S")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),

            heartbeat_interval_ms: 45_000,
            heartbeat_timeout_factor: 1.5,
            identify_timeout_s: 30,
            replay_buffer_size: env::var("VOX_REPLAY_BUFFER_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            session_max_age_s: env::var("VOX_SESSION_MAX_AGE_S")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            max_total_connections: env::var("VOX_MAX_TOTAL_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            max_connections_per_ip: env::var("VOX_MAX_CONNECTIONS_PER_IP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            max_sessions_per_user: env::var("VOX_MAX_SESSIONS_PER_USER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            auth_fail_threshold: env::var("VOX_AUTH_FAIL_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            auth_fail_window_s: env::var("VOX_AUTH_FAIL_WINDOW_S")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60.0),

            session_lifetime_days: env::var("VOX_SESSION_LIFETIME_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn heartbeat_timeout_ms(&self) -> u64 {
        (self.heartbeat_interval_ms as f64 * self.heartbeat_timeout_factor) as u64
    }
}
