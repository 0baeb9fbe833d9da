//! Gateway connection state machine.
//!
//! `OPENED` emits `hello` and moves straight into `AWAIT_AUTH`; one client
//! frame (`identify` or `resume`) within [`Config::identify_timeout_s`]
//! decides the close code or promotion to `AUTHENTICATED`. From there the
//! connection runs two concurrent loops — the message loop reading client
//! frames, and a heartbeat monitor that closes the socket if no heartbeat
//! lands within `interval * 1.5` — until either side hangs up, at which
//! point `CLOSING` runs unconditionally (voice state cleared, session
//! preserved, presence updated).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::Response;
use futures::stream::{SplitStream, StreamExt};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex, Notify};
use uuid::Uuid;

use crate::auth;
use crate::limits::RELAY_PAYLOAD_MAX;
use crate::models::{User, VoiceState};
use crate::state::AppState;
use crate::websocket::connection::{ConnectionHandle, OutboundFrame};
use crate::websocket::dispatch::dispatch;
use crate::websocket::events;
use crate::websocket::hub::{AdmissionError, Hub, PresenceRecord};

const PROTOCOL_VERSION_MIN: i32 = 1;
const PROTOCOL_VERSION_MAX: i32 = 1;
const TYPING_DEBOUNCE_S: u64 = 5;

/// Server capability advertisement embedded in `ready` — every inbound frame
/// type this connection's message loop handles once authenticated.
const CAPABILITIES: &[&str] = &["voice", "e2ee_relay", "stage", "resume"];

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub compress: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<GatewayQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let compress = params.compress.as_deref() == Some("zstd");
    ws.on_upgrade(move |socket| run_connection(socket, state, addr, compress))
}

fn close_raw(tx: &mpsc::UnboundedSender<OutboundFrame>, code: u16, reason: &str) {
    let _ = tx.send(OutboundFrame::Close(code, reason.to_string()));
}

async fn run_connection(socket: WebSocket, state: AppState, addr: SocketAddr, compress: bool) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut frame_rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let writer = tokio::spawn(async move {
        use futures::SinkExt;
        while let Some(frame) = frame_rx.recv().await {
            let msg = match frame {
                OutboundFrame::Text(t) => Message::Text(t),
                OutboundFrame::Binary(b) => Message::Binary(b),
                OutboundFrame::Close(code, reason) => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                        .await;
                    break;
                }
            };
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let hello = events::envelope("hello", events::hello(state.config.heartbeat_interval_ms), None);
    if tx.send(OutboundFrame::Text(serde_json::to_string(&hello).unwrap())).is_err() {
        let _ = writer.await;
        return;
    }

    let ip = addr.ip().to_string();

    let first_frame = tokio::time::timeout(
        Duration::from_secs(state.config.identify_timeout_s),
        ws_rx.next(),
    )
    .await;

    let conn = match first_frame {
        Err(_) => {
            close_raw(&tx, 4003, "NOT_AUTHENTICATED");
            let _ = writer.await;
            return;
        }
        Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => {
            let _ = writer.await;
            return;
        }
        Ok(Some(Ok(msg))) => match handshake(msg, &state, &tx, &ip, compress).await {
            Some(conn) => conn,
            None => {
                let _ = writer.await;
                return;
            }
        },
    };

    let close_notify = Arc::new(Notify::new());
    let last_heartbeat = Arc::new(Mutex::new(Instant::now()));
    let heartbeat_task = tokio::spawn(heartbeat_monitor(
        conn.clone(),
        last_heartbeat.clone(),
        close_notify.clone(),
        state.config.heartbeat_timeout_ms(),
    ));

    message_loop(&mut ws_rx, &state, &conn, last_heartbeat, close_notify).await;

    heartbeat_task.abort();
    cleanup(&state, &conn, &ip).await;
    let _ = writer.await;
}

async fn heartbeat_monitor(
    conn: ConnectionHandle,
    last_heartbeat: Arc<Mutex<Instant>>,
    close_notify: Arc<Notify>,
    timeout_ms: u64,
) {
    let interval = Duration::from_millis(timeout_ms);
    loop {
        tokio::time::sleep(interval).await;
        let elapsed = last_heartbeat.lock().await.elapsed();
        if elapsed > interval {
            conn.close(4007, "SESSION_TIMEOUT");
            close_notify.notify_one();
            break;
        }
    }
}

// ---------------------------------------------------------------------
// AWAIT_AUTH: identify / resume
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IdentifyBody {
    token: String,
    protocol_version: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ResumeBody {
    token: String,
    session_id: String,
    last_seq: i64,
}

async fn handshake(
    msg: Message,
    state: &AppState,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
    ip: &str,
    compress: bool,
) -> Option<ConnectionHandle> {
    let Message::Text(text) = msg else {
        close_raw(tx, 4002, "DECODE_ERROR");
        return None;
    };
    let Ok(value) = serde_json::from_str::<Value>(&text) else {
        close_raw(tx, 4002, "DECODE_ERROR");
        return None;
    };
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");

    if state.hub.is_auth_rate_limited(ip).await {
        close_raw(tx, 4006, "RATE_LIMITED");
        return None;
    }

    match kind {
        "identify" => handle_identify(value, state, tx, ip, compress).await,
        "resume" => handle_resume(value, state, tx, ip, compress).await,
        _ => {
            close_raw(tx, 4002, "DECODE_ERROR");
            None
        }
    }
}

fn admission_close_code(err: AdmissionError) -> (u16, &'static str) {
    match err {
        AdmissionError::ServerFull | AdmissionError::RateLimited => (4006, "RATE_LIMITED"),
    }
}

async fn handle_identify(
    value: Value,
    state: &AppState,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
    ip: &str,
    compress: bool,
) -> Option<ConnectionHandle> {
    let Ok(body) = serde_json::from_value::<IdentifyBody>(value.get("d").cloned().unwrap_or(json!({})))
    else {
        close_raw(tx, 4002, "DECODE_ERROR");
        return None;
    };

    let protocol_version = body.protocol_version.unwrap_or(PROTOCOL_VERSION_MIN);
    if !(PROTOCOL_VERSION_MIN..=PROTOCOL_VERSION_MAX).contains(&protocol_version) {
        close_raw(tx, 4011, "VERSION_MISMATCH");
        return None;
    }

    let user = match auth::authenticate_token(&state.pool, &body.token, auth::PREFIX_SESSION).await {
        Ok(user) => user,
        Err(_) => {
            state.hub.record_auth_failure(ip).await;
            close_raw(tx, 4004, "AUTH_FAILED");
            return None;
        }
    };

    let conn = ConnectionHandle::new(user.id, tx.clone());
    conn.set_compress(compress).await;

    if let Err(err) = state.hub.connect(conn.clone(), ip).await {
        let (code, reason) = admission_close_code(err);
        close_raw(tx, code, reason);
        return None;
    }

    let mut bytes = [0u8; 12];
    OsRng.fill_bytes(&mut bytes);
    let session_id = format!("sess_{}", hex::encode(bytes));

    state.hub.save_session(session_id.clone(), state.hub.new_session(user.id)).await;
    conn.configure_session(session_id.clone(), state.hub.clone()).await;

    send_ready(&state.pool, &conn, &user, &session_id, protocol_version).await;
    go_online(state, &conn, &user).await;

    Some(conn)
}

async fn send_ready(pool: &PgPool, conn: &ConnectionHandle, user: &User, session_id: &str, protocol_version: i32) {
    let server_name: Option<String> = sqlx::query_scalar("SELECT value FROM config WHERE key = 'server_name'")
        .fetch_optional(pool)
        .await
        .ok()
        .flatten();
    let server_icon: Option<String> = sqlx::query_scalar("SELECT value FROM config WHERE key = 'server_icon'")
        .fetch_optional(pool)
        .await
        .ok()
        .flatten();

    let capabilities: Vec<String> = CAPABILITIES.iter().map(|s| s.to_string()).collect();
    let payload = events::ready(
        session_id,
        user.id,
        user.effective_display_name(),
        server_name.as_deref().unwrap_or("Vox"),
        server_icon.as_deref(),
        chrono::Utc::now().timestamp_millis(),
        protocol_version,
        &capabilities,
    );
    conn.send_event("ready", payload).await;
}

/// Mark the newly identified user online, broadcast the change to everyone
/// else currently connected, then hand the newcomer a presence snapshot of
/// everyone already online.
async fn go_online(state: &AppState, conn: &ConnectionHandle, user: &User) {
    state
        .hub
        .set_presence(PresenceRecord {
            user_id: user.id,
            status: "online".to_string(),
            custom_status: None,
            activity: None,
        })
        .await;

    let others: Vec<i64> = state
        .hub
        .connected_user_ids()
        .await
        .into_iter()
        .filter(|&uid| uid != user.id)
        .collect();
    let _ = dispatch(
        &state.pool,
        &state.hub,
        "presence_update",
        events::presence_update(user.id, "online", None),
        Some(&others),
    )
    .await;

    for p in state.hub.presence_snapshot(user.id).await {
        conn.send_event(
            "presence_update",
            events::presence_update(p.user_id, &p.status, p.custom_status.as_deref()),
        )
        .await;
    }
}

async fn handle_resume(
    value: Value,
    state: &AppState,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
    ip: &str,
    compress: bool,
) -> Option<ConnectionHandle> {
    let Ok(body) = serde_json::from_value::<ResumeBody>(value.get("d").cloned().unwrap_or(json!({}))) else {
        close_raw(tx, 4002, "DECODE_ERROR");
        return None;
    };

    let user = match auth::authenticate_token(&state.pool, &body.token, auth::PREFIX_SESSION).await {
        Ok(user) => user,
        Err(_) => {
            state.hub.record_auth_failure(ip).await;
            close_raw(tx, 4004, "AUTH_FAILED");
            return None;
        }
    };

    let Some(session) = state.hub.get_session(&body.session_id).await else {
        close_raw(tx, 4009, "SESSION_EXPIRED");
        return None;
    };
    if session.user_id != user.id {
        close_raw(tx, 4004, "AUTH_FAILED");
        return None;
    }

    if let Some(oldest) = session.replay_buffer.front().and_then(|f| f["seq"].as_i64()) {
        if body.last_seq < oldest {
            close_raw(tx, 4010, "REPLAY_EXHAUSTED");
            return None;
        }
    }

    let conn = ConnectionHandle::new(user.id, tx.clone());
    conn.set_compress(compress).await;
    conn.restore_seq(session.seq).await;

    if let Err(err) = state.hub.connect(conn.clone(), ip).await {
        let (code, reason) = admission_close_code(err);
        close_raw(tx, code, reason);
        return None;
    }

    conn.configure_session(body.session_id.clone(), state.hub.clone()).await;

    for frame in &session.replay_buffer {
        if frame["seq"].as_i64().map(|s| s > body.last_seq).unwrap_or(false) {
            conn.send_value(frame.clone()).await;
        }
    }
    state.hub.refresh_session_ttl(&body.session_id).await;
    conn.send_unsequenced("resumed", events::resumed(session.seq)).await;

    Some(conn)
}

// ---------------------------------------------------------------------
// AUTHENTICATED: message loop
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VoiceStateUpdateBody {
    self_mute: Option<bool>,
    self_deaf: Option<bool>,
    video: Option<bool>,
    streaming: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RelayBody {
    #[serde(alias = "mls_type", alias = "cpace_type")]
    subtype: String,
    data: Value,
}

async fn message_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    state: &AppState,
    conn: &ConnectionHandle,
    last_heartbeat: Arc<Mutex<Instant>>,
    close_notify: Arc<Notify>,
) {
    let mut typing_debounce: HashMap<String, Instant> = HashMap::new();

    loop {
        tokio::select! {
            _ = close_notify.notified() => break,
            next = ws_rx.next() => {
                match next {
                    None | Some(Err(_)) => break,
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };
                        let kind = value.get("type").and_then(Value::as_str).unwrap_or("").to_string();
                        let d = value.get("d").cloned().unwrap_or(json!({}));
                        if !handle_authenticated_frame(&kind, d, state, conn, &mut typing_debounce, &last_heartbeat).await {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Returns `false` when the connection must close (duplicate `identify`).
async fn handle_authenticated_frame(
    kind: &str,
    d: Value,
    state: &AppState,
    conn: &ConnectionHandle,
    typing_debounce: &mut HashMap<String, Instant>,
    last_heartbeat: &Arc<Mutex<Instant>>,
) -> bool {
    match kind {
        "heartbeat" => {
            *last_heartbeat.lock().await = Instant::now();
            conn.send_unsequenced("heartbeat_ack", events::heartbeat_ack()).await;
        }
        "identify" | "resume" => {
            conn.close(4005, "ALREADY_AUTHENTICATED");
            return false;
        }
        "typing" => handle_typing(d, state, conn, typing_debounce).await,
        "presence_update" => handle_presence_update(d, state, conn).await,
        "voice_state_update" => handle_voice_state_update(d, state, conn).await,
        "mls_relay" => handle_mls_relay(d, state, conn).await,
        "cpace_relay" => handle_cpace_relay(d, state, conn).await,
        "voice_codec_neg" => handle_voice_codec_neg(d, state, conn).await,
        "stage_response" => handle_stage_response(d, state, conn).await,
        _ => {}
    }
    true
}

async fn handle_typing(d: Value, state: &AppState, conn: &ConnectionHandle, debounce: &mut HashMap<String, Instant>) {
    let (key, channel_id) = if let Some(feed_id) = d.get("feed_id").and_then(Value::as_i64) {
        (format!("feed:{feed_id}"), feed_id.to_string())
    } else if let Some(dm_id) = d.get("dm_id").and_then(Value::as_i64) {
        (format!("dm:{dm_id}"), dm_id.to_string())
    } else {
        return;
    };

    if let Some(last) = debounce.get(&key) {
        if last.elapsed() < Duration::from_secs(TYPING_DEBOUNCE_S) {
            return;
        }
    }
    debounce.insert(key, Instant::now());

    let _ = dispatch(
        &state.pool,
        &state.hub,
        "typing_start",
        events::typing_start(&channel_id, conn.user_id),
        None,
    )
    .await;
}

async fn handle_presence_update(d: Value, state: &AppState, conn: &ConnectionHandle) {
    let Some(status) = d.get("status").and_then(Value::as_str) else { return };
    if !matches!(status, "online" | "idle" | "dnd" | "invisible") {
        return;
    }
    let custom_status = d.get("custom_status").and_then(Value::as_str).map(str::to_string);

    state
        .hub
        .set_presence(PresenceRecord {
            user_id: conn.user_id,
            status: status.to_string(),
            custom_status: custom_status.clone(),
            activity: d.get("activity").cloned(),
        })
        .await;

    let broadcast_status = if status == "invisible" { "offline" } else { status };
    let others: Vec<i64> = state
        .hub
        .connected_user_ids()
        .await
        .into_iter()
        .filter(|&uid| uid != conn.user_id)
        .collect();
    let _ = dispatch(
        &state.pool,
        &state.hub,
        "presence_update",
        events::presence_update(conn.user_id, broadcast_status, custom_status.as_deref()),
        Some(&others),
    )
    .await;
}

async fn fetch_own_voice_state(pool: &PgPool, user_id: i64) -> Option<VoiceState> {
    sqlx::query_as(
        "SELECT user_id, room_id, self_mute, self_deaf, video, streaming FROM voice_states WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .ok()
    .flatten()
}

pub(crate) async fn room_member_states(pool: &PgPool, room_id: Uuid) -> Vec<VoiceState> {
    sqlx::query_as(
        "SELECT user_id, room_id, self_mute, self_deaf, video, streaming FROM voice_states WHERE room_id = $1",
    )
    .bind(room_id)
    .fetch_all(pool)
    .await
    .unwrap_or_default()
}

async fn get_voice_room_users(pool: &PgPool, room_id: Uuid) -> Vec<i64> {
    sqlx::query_scalar("SELECT user_id FROM voice_states WHERE room_id = $1")
        .bind(room_id)
        .fetch_all(pool)
        .await
        .unwrap_or_default()
}

pub(crate) async fn broadcast_voice_state(state: &AppState, room_id: Uuid) {
    let states = room_member_states(&state.pool, room_id).await;
    let payloads: Vec<Value> = states.iter().map(|s| serde_json::to_value(s).unwrap()).collect();
    let _ = dispatch(
        &state.pool,
        &state.hub,
        "voice_state_update",
        events::voice_state_update(&room_id.to_string(), &payloads),
        None,
    )
    .await;
}

async fn handle_voice_state_update(d: Value, state: &AppState, conn: &ConnectionHandle) {
    let Some(mut vs) = fetch_own_voice_state(&state.pool, conn.user_id).await else {
        return;
    };
    let Ok(body) = serde_json::from_value::<VoiceStateUpdateBody>(d) else {
        return;
    };

    vs.self_mute = body.self_mute.unwrap_or(vs.self_mute);
    vs.self_deaf = body.self_deaf.unwrap_or(vs.self_deaf);
    vs.video = body.video.unwrap_or(vs.video);
    vs.streaming = body.streaming.unwrap_or(vs.streaming);

    if sqlx::query(
        "UPDATE voice_states SET self_mute = $1, self_deaf = $2, video = $3, streaming = $4 WHERE user_id = $5",
    )
    .bind(vs.self_mute)
    .bind(vs.self_deaf)
    .bind(vs.video)
    .bind(vs.streaming)
    .bind(conn.user_id)
    .execute(&state.pool)
    .await
    .is_err()
    {
        return;
    }

    broadcast_voice_state(state, vs.room_id).await;
}

async fn handle_mls_relay(d: Value, state: &AppState, conn: &ConnectionHandle) {
    let Ok(body) = serde_json::from_value::<RelayBody>(d) else { return };
    if serde_json::to_vec(&body.data).map(|b| b.len()).unwrap_or(usize::MAX) > RELAY_PAYLOAD_MAX {
        return;
    }
    let (event_type, payload) = match body.subtype.as_str() {
        "welcome" => ("mls_welcome", events::mls_welcome(conn.user_id, &body.data)),
        "commit" => ("mls_commit", events::mls_commit(conn.user_id, &body.data)),
        "proposal" => ("mls_proposal", events::mls_proposal(conn.user_id, &body.data)),
        _ => return,
    };
    let _ = dispatch(&state.pool, &state.hub, event_type, payload, Some(&[conn.user_id])).await;
}

async fn handle_cpace_relay(d: Value, state: &AppState, conn: &ConnectionHandle) {
    let Ok(body) = serde_json::from_value::<RelayBody>(d) else { return };
    if serde_json::to_vec(&body.data).map(|b| b.len()).unwrap_or(usize::MAX) > RELAY_PAYLOAD_MAX {
        return;
    }
    let (event_type, payload) = match body.subtype.as_str() {
        "isi" => ("cpace_isi", events::cpace_isi(conn.user_id, &body.data)),
        "rsi" => ("cpace_rsi", events::cpace_rsi(conn.user_id, &body.data)),
        "confirm" => ("cpace_confirm", events::cpace_confirm(conn.user_id, &body.data)),
        "new_device_key" => ("cpace_new_device_key", events::cpace_new_device_key(conn.user_id, &body.data)),
        _ => return,
    };
    let _ = dispatch(&state.pool, &state.hub, event_type, payload, Some(&[conn.user_id])).await;
}

async fn handle_voice_codec_neg(d: Value, state: &AppState, conn: &ConnectionHandle) {
    let codec = d.get("codec").and_then(Value::as_str).unwrap_or("").to_string();
    let room_id = d.get("room_id").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok());
    let payload = events::voice_codec_neg(conn.user_id, &codec, &d);

    let targets = match room_id {
        Some(room_id) => Some(get_voice_room_users(&state.pool, room_id).await),
        None => None,
    };
    let _ = dispatch(&state.pool, &state.hub, "voice_codec_neg", payload, targets.as_deref()).await;
}

async fn handle_stage_response(d: Value, state: &AppState, conn: &ConnectionHandle) {
    let room_id = d.get("room_id").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok());
    let accepted = d.get("accepted").and_then(Value::as_bool).unwrap_or(false);
    let payload = events::stage_response(&room_id.map(|r| r.to_string()).unwrap_or_default(), conn.user_id, accepted);

    let targets = match room_id {
        Some(room_id) => Some(get_voice_room_users(&state.pool, room_id).await),
        None => None,
    };
    let _ = dispatch(&state.pool, &state.hub, "stage_response", payload, targets.as_deref()).await;
}

// ---------------------------------------------------------------------
// CLOSING
// ---------------------------------------------------------------------

async fn cleanup(state: &AppState, conn: &ConnectionHandle, ip: &str) {
    if let Some(vs) = fetch_own_voice_state(&state.pool, conn.user_id).await {
        let _ = sqlx::query("DELETE FROM voice_states WHERE user_id = $1")
            .bind(conn.user_id)
            .execute(&state.pool)
            .await;
        broadcast_voice_state(state, vs.room_id).await;
    }

    let session_id = conn.session_id().await;
    if !session_id.is_empty() {
        state.hub.refresh_session_ttl(&session_id).await;
    }

    let cleared = state.hub.disconnect(conn, ip).await;
    if cleared {
        let others = state.hub.connected_user_ids().await;
        let _ = dispatch(
            &state.pool,
            &state.hub,
            "presence_update",
            events::presence_update(conn.user_id, "offline", None),
            Some(&others),
        )
        .await;
    }
}

/// Broadcasts close code 4008 to every connection ahead of a graceful
/// shutdown.
pub async fn close_all_for_shutdown(hub: &Hub) {
    for conn in hub.targets(None).await {
        conn.close(4008, "SERVER_RESTART");
    }
}
