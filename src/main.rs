use axum::{
    extract::ConnectInfo,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use vox_server::config::Config;
use vox_server::interactions::InteractionStore;
use vox_server::ratelimit::{rate_limit_layer, RateLimiter};
use vox_server::state::AppState;
use vox_server::websocket::{handler::close_all_for_shutdown, hub::Hub};
use vox_server::{auth, db, federation, handlers, sync};

/// Middleware that restricts access to the metrics endpoint to loopback connections only.
///
/// When `ConnectInfo` is not available (e.g. in direct oneshot tests), access is
/// denied — the metrics route is not registered in the test app anyway, so this
/// branch is unreachable in practice.
async fn require_loopback(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match connect_info {
        Some(ConnectInfo(addr)) if addr.ip().is_loopback() => next.run(req).await,
        Some(_) => StatusCode::NOT_FOUND.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing — JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vox_server=info,tower_http=info,sqlx=warn".parse().unwrap());

    if std::env::var("VOX_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Vox server starting...");

    let config = Config::from_env().expect("Failed to load configuration");
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    info!("Database migrations applied");

    db::health_check(&pool).await.expect("Database health check failed");
    info!("Database health check passed");

    // CORS: permissive in dev, origin-restricted in production.
    let cors = if config.is_dev {
        info!("CORS: permissive (dev mode)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!("CORS: no VOX_ALLOWED_ORIGINS configured — all cross-origin requests will be denied");
        } else {
            info!("CORS: production mode, allowing origins: {:?}", config.allowed_origins);
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    };

    let addr = config.server_addr();

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.federation_request_timeout_s))
        .build()
        .expect("Failed to build HTTP client");

    let hub = Hub::new(
        config.max_total_connections,
        config.max_connections_per_ip,
        config.max_sessions_per_user,
        config.session_max_age_s as u64,
        config.replay_buffer_size,
        config.auth_fail_threshold as usize,
        config.auth_fail_window_s,
    );
    let app_state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        hub: hub.clone(),
        rate_limiter: RateLimiter::new(),
        interactions: InteractionStore::new(),
        http_client,
    };

    // Prometheus metrics layer
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    // Blunt per-IP flood shield, layered alongside (not instead of) the
    // finer-grained per-(principal, category) buckets `rate_limit_layer`
    // enforces below.
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .finish()
            .expect("Invalid governor configuration"),
    );

    // Inbound federation S2S routes — each carries its own signature
    // verification, so they sit behind a dedicated middleware layer rather
    // than the bearer-token AuthUser extractor.
    let federation_router = Router::new()
        .route("/api/v1/federation/relay/message", post(handlers::federation::relay_message))
        .route("/api/v1/federation/relay/typing", post(handlers::federation::relay_typing))
        .route("/api/v1/federation/relay/read", post(handlers::federation::relay_read))
        .route("/api/v1/federation/users/:address", get(handlers::federation::get_federated_profile))
        .route("/api/v1/federation/users/:address/prekeys", get(handlers::federation::get_federated_prekeys))
        .route("/api/v1/federation/presence/subscribe", post(handlers::federation::presence_subscribe))
        .route("/api/v1/federation/presence/notify", post(handlers::federation::presence_notify))
        .route("/api/v1/federation/join", post(handlers::federation::federation_join))
        .route("/api/v1/federation/block", post(handlers::federation::federation_block))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), federation::federation_auth_layer));

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(move || async move { metric_handle.render() })
                .route_layer(middleware::from_fn(require_loopback)),
        )
        // Gateway
        .route("/gateway", get(vox_server::websocket::handler::websocket_handler))
        // Auth
        .route("/api/v1/auth/register", post(handlers::auth::register))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .route("/api/v1/auth/refresh", post(handlers::auth::refresh))
        .route("/api/v1/auth/2fa", get(handlers::auth::two_factor_status))
        // Users
        .route("/api/v1/users/@me", get(handlers::users::get_current_user))
        .route("/api/v1/users/@me", patch(handlers::users::update_current_user))
        // Servers
        .route("/api/v1/servers", post(handlers::servers::create_server))
        .route("/api/v1/servers", get(handlers::servers::list_servers))
        // NOTE: /servers/browse must be registered before /servers/:id so the literal
        // path segment "browse" is not consumed by the :id parameter capture.
        .route("/api/v1/servers/browse", get(handlers::servers::browse_servers))
        .route("/api/v1/servers/:id", get(handlers::servers::get_server))
        .route("/api/v1/servers/:id", patch(handlers::servers::update_server))
        .route("/api/v1/servers/:id", delete(handlers::servers::delete_server))
        .route("/api/v1/servers/:id/join", post(handlers::servers::join_server))
        .route("/api/v1/servers/:id/leave", delete(handlers::servers::leave_server))
        .route("/api/v1/servers/:id/members", get(handlers::servers::list_members))
        // Roles (server-scoped)
        .route("/api/v1/servers/:id/roles", post(handlers::roles::create_role))
        .route("/api/v1/servers/:id/roles", get(handlers::roles::list_roles))
        .route("/api/v1/roles/:id", patch(handlers::roles::update_role))
        .route("/api/v1/roles/:id", delete(handlers::roles::delete_role))
        // Feeds / rooms (the unified "space" surface)
        .route("/api/v1/servers/:id/feeds", post(handlers::channels::create_feed))
        .route("/api/v1/servers/:id/feeds", get(handlers::channels::list_feeds))
        .route("/api/v1/servers/:id/rooms", post(handlers::channels::create_room))
        .route("/api/v1/servers/:id/rooms", get(handlers::channels::list_rooms))
        .route("/api/v1/channels/:id", get(handlers::channels::get_channel))
        .route("/api/v1/channels/:id", patch(handlers::channels::update_channel))
        .route("/api/v1/channels/:id", delete(handlers::channels::delete_channel))
        // Messages (nested under feed)
        .route("/api/v1/feeds/:channel_id/messages", post(handlers::messages::create_message))
        .route("/api/v1/feeds/:channel_id/messages", get(handlers::messages::list_messages))
        .route("/api/v1/messages/:message_id", patch(handlers::messages::update_message))
        .route("/api/v1/messages/:message_id", delete(handlers::messages::delete_message))
        // Voice (nested under room)
        .route("/api/v1/rooms/:room_id/voice", post(handlers::voice::join_room))
        .route("/api/v1/rooms/:room_id/voice", delete(handlers::voice::leave_room))
        .route("/api/v1/rooms/:room_id/voice", patch(handlers::voice::update_voice_state))
        .route("/api/v1/rooms/:room_id/voice", get(handlers::voice::list_voice_participants))
        // Catch-up sync
        .route("/api/v1/sync", get(handlers::sync::get_sync))
        // Inbound federation S2S surface
        .merge(federation_router)
        // ── Per-(principal, category) rate limiting ────────────────────────
        .layer(middleware::from_fn_with_state(app_state.clone(), rate_limit_layer))
        // ── Blunt per-IP flood shield ────────────────────────────────────────
        .layer(GovernorLayer { config: governor_conf })
        // ── Security response headers ──────────────────────────────────────
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        // ── Prometheus + CORS ──────────────────────────────────────────────
        .layer(prometheus_layer)
        .layer(cors)
        .with_state(app_state);

    tokio::spawn(run_cleanup_loop(pool.clone(), hub.clone()));

    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // `into_make_service_with_connect_info` populates `ConnectInfo<SocketAddr>` in
    // request extensions, needed by `rate_limit_layer`'s per-IP bucket key and by
    // `require_loopback` on /metrics.
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(hub))
        .await
        .expect("Server failed to start");
}

/// Sweeps every shared-resource table/map on a fixed interval for the life of
/// the process: expired sessions and gateway replay buffers, orphaned
/// presence entries, decayed auth-failure counters, spent federation nonces,
/// and event log rows past the sync retention window. Each pass logs what it
/// touched at debug level; a single sweep failing does not stop the loop.
async fn run_cleanup_loop(pool: sqlx::PgPool, hub: Hub) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        ticker.tick().await;

        hub.cleanup_sessions().await;
        hub.cleanup_orphaned_presence().await;
        hub.cleanup_auth_failures().await;

        if let Err(e) = auth::cleanup_expired_sessions(&pool).await {
            tracing::warn!(error = %e, "session cleanup sweep failed");
        }
        if let Err(e) = federation::cleanup_expired_nonces(&pool).await {
            tracing::warn!(error = %e, "federation nonce cleanup sweep failed");
        }
        if let Err(e) = sync::cleanup_old_events(&pool).await {
            tracing::warn!(error = %e, "event log cleanup sweep failed");
        }

        tracing::debug!("shared-resource cleanup sweep complete");
    }
}

/// Waits for SIGINT/SIGTERM, then closes every live gateway connection with
/// `4008 SERVER_RESTART` before the process actually exits — clients get a
/// clean close frame to reconnect on instead of a dropped socket.
async fn shutdown_signal(hub: Hub) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, closing gateway connections");
    close_all_for_shutdown(&hub).await;
}
