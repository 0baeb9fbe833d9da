//! Federation core: keypair persistence, Ed25519 signing/verification, DNS
//! discovery, policy checks, and vouchers.
//!
//! Outbound typed wrappers live in [`client`]; this module is everything a
//! request handler needs to *verify* an inbound S2S call and everything the
//! gateway/REST layer needs to *produce* a signed outbound one.

pub mod client;

use axum::extract::State;
use axum::http::{request::Parts, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{async_trait, Json};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::FederationEntry;
use crate::state::AppState;

/// Outcome of a remote domain's `_voxpolicy` TXT record; unparseable or
/// absent records default to `open` (service.py `lookup_vox_policy`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemotePolicy {
    Open,
    Closed,
    Allowlist,
}

impl RemotePolicy {
    fn from_str(s: &str) -> Self {
        match s {
            "closed" => RemotePolicy::Closed,
            "allowlist" => RemotePolicy::Allowlist,
            _ => RemotePolicy::Open,
        }
    }
}

// ---------------------------------------------------------------------
// Key management
// ---------------------------------------------------------------------

/// Load this server's Ed25519 keypair from the `config` table, generating
/// and persisting one on first use.
pub async fn get_or_create_keypair(pool: &PgPool) -> AppResult<SigningKey> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT value FROM config WHERE key = 'federation_private_key'")
            .fetch_optional(pool)
            .await?;

    if let Some((priv_b64,)) = row {
        let bytes = B64
            .decode(priv_b64)
            .map_err(|_| AppError::Internal)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| AppError::Internal)?;
        return Ok(SigningKey::from_bytes(&bytes));
    }

    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    let signing_key = SigningKey::from_bytes(&seed);
    let pub_b64 = B64.encode(signing_key.verifying_key().to_bytes());
    let priv_b64 = B64.encode(signing_key.to_bytes());

    sqlx::query(
        "INSERT INTO config (key, value) VALUES ('federation_private_key', $1), ('federation_public_key', $2)
         ON CONFLICT (key) DO NOTHING",
    )
    .bind(&priv_b64)
    .bind(&pub_b64)
    .execute(pool)
    .await?;

    Ok(signing_key)
}

pub async fn get_public_key_b64(pool: &PgPool) -> AppResult<String> {
    let key = get_or_create_keypair(pool).await?;
    Ok(B64.encode(key.verifying_key().to_bytes()))
}

// ---------------------------------------------------------------------
// Signing & verification
// ---------------------------------------------------------------------

pub fn sign_body(body: &[u8], key: &SigningKey) -> String {
    let sig: Signature = key.sign(body);
    B64.encode(sig.to_bytes())
}

pub fn verify_signature(body: &[u8], sig_b64: &str, pub_key_b64: &str) -> bool {
    let Ok(sig_bytes) = B64.decode(sig_b64) else {
        return false;
    };
    let Ok(sig_bytes): Result<[u8; 64], _> = sig_bytes.try_into() else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);

    let Ok(pub_bytes) = B64.decode(pub_key_b64) else {
        return false;
    };
    let Ok(pub_bytes): Result<[u8; 32], _> = pub_bytes.try_into() else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pub_bytes) else {
        return false;
    };

    verifying_key.verify(body, &signature).is_ok()
}

pub async fn verify_signature_for_origin(body: &[u8], sig_b64: &str, origin: &str) -> bool {
    match lookup_vox_key(origin).await {
        Some(pub_b64) => verify_signature(body, sig_b64, &pub_b64),
        None => false,
    }
}

// ---------------------------------------------------------------------
// DNS discovery
// ---------------------------------------------------------------------

fn resolver() -> AppResult<TokioAsyncResolver> {
    Ok(TokioAsyncResolver::tokio(
        ResolverConfig::default(),
        ResolverOpts::default(),
    ))
}

/// `_voxkey.<domain>` TXT record, `p=<base64 ed25519 public key>`.
pub async fn lookup_vox_key(domain: &str) -> Option<String> {
    let resolver = resolver().ok()?;
    let answers = resolver.txt_lookup(format!("_voxkey.{domain}.")).await.ok()?;
    for record in answers.iter() {
        let txt = record.to_string();
        for part in txt.split(';') {
            let part = part.trim();
            if let Some(key) = part.strip_prefix("p=") {
                return Some(key.to_string());
            }
        }
    }
    None
}

/// `_voxpolicy.<domain>` TXT record, `federation=open|closed|allowlist`.
/// Defaults to `open` on any lookup failure or an absent `federation=` key.
pub async fn lookup_vox_policy(domain: &str) -> RemotePolicy {
    let Ok(resolver) = resolver() else {
        return RemotePolicy::Open;
    };
    let Ok(answers) = resolver.txt_lookup(format!("_voxpolicy.{domain}.")).await else {
        return RemotePolicy::Open;
    };
    for record in answers.iter() {
        let txt = record.to_string();
        for part in txt.split(';') {
            let part = part.trim();
            if let Some((k, v)) = part.split_once('=') {
                if k.trim() == "federation" {
                    return RemotePolicy::from_str(v.trim());
                }
            }
        }
    }
    RemotePolicy::Open
}

/// `_vox.<domain>` SVCB record giving the actual host/port to dial; falls
/// back to `(domain, 443)` when absent.
pub async fn lookup_vox_host(domain: &str) -> (String, u16) {
    use hickory_resolver::proto::rr::rdata::svcb::{SvcParamKey, SvcParamValue};
    use hickory_resolver::proto::rr::{RData, RecordType};

    let fallback = (domain.to_string(), 443u16);
    let Ok(resolver) = resolver() else {
        return fallback;
    };
    let Ok(lookup) = resolver.lookup(format!("_vox.{domain}."), RecordType::SVCB).await else {
        return fallback;
    };

    for record in lookup.record_iter() {
        let Some(RData::SVCB(svcb)) = record.data() else {
            continue;
        };
        let target = svcb.target_name().to_utf8().trim_end_matches('.').to_string();
        let port = svcb
            .svc_params()
            .iter()
            .find_map(|(key, value)| match (key, value) {
                (SvcParamKey::Port, SvcParamValue::Port(p)) => Some(*p),
                _ => None,
            })
            .unwrap_or(443);
        return (target, port);
    }
    fallback
}

// ---------------------------------------------------------------------
// Policy & blocklist
// ---------------------------------------------------------------------

/// `direction = "inbound"` checks our local blocklist/allowlist policy;
/// `"outbound"` best-effort checks the *remote's* published policy.
pub async fn check_federation_allowed(
    pool: &PgPool,
    config: &Config,
    domain: &str,
    direction: &str,
) -> AppResult<bool> {
    let blocked: Option<FederationEntry> =
        sqlx::query_as("SELECT id, entry, reason, created_at FROM federation_entries WHERE entry = $1")
            .bind(domain)
            .fetch_optional(pool)
            .await?;
    if blocked.is_some() {
        return Ok(false);
    }

    if direction == "inbound" {
        match config.federation_policy.as_str() {
            "closed" => Ok(false),
            "allowlist" => {
                let allowed: Option<FederationEntry> = sqlx::query_as(
                    "SELECT id, entry, reason, created_at FROM federation_entries WHERE entry = $1",
                )
                .bind(format!("allow:{domain}"))
                .fetch_optional(pool)
                .await?;
                Ok(allowed.is_some())
            }
            _ => Ok(true),
        }
    } else {
        Ok(lookup_vox_policy(domain).await != RemotePolicy::Closed)
    }
}

// ---------------------------------------------------------------------
// Voucher system
// ---------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct VoucherPayload {
    pub user_address: String,
    pub target_domain: String,
    pub issued_at: f64,
    pub expires_at: f64,
    pub nonce: String,
}

/// `base64(json payload) || "." || base64(signature)` over the payload bytes.
pub fn create_voucher(user_address: &str, target_domain: &str, key: &SigningKey, ttl_s: i64) -> String {
    let now = chrono::Utc::now().timestamp() as f64;
    let mut nonce_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut nonce_bytes);

    let payload = VoucherPayload {
        user_address: user_address.to_string(),
        target_domain: target_domain.to_string(),
        issued_at: now,
        expires_at: now + ttl_s as f64,
        nonce: B64.encode(nonce_bytes),
    };
    let payload_bytes = serde_json::to_vec(&payload).expect("voucher payload always serializes");
    let sig = sign_body(&payload_bytes, key);
    format!("{}.{sig}", B64.encode(&payload_bytes))
}

/// Validate a voucher's target, expiry, and origin signature, then consume
/// its nonce (insertion-wins replay defense). Returns the decoded payload
/// on success.
pub async fn verify_voucher(
    pool: &PgPool,
    voucher: &str,
    expected_target: &str,
) -> AppResult<VoucherPayload> {
    let (payload_b64, sig_b64) = voucher
        .split_once('.')
        .ok_or_else(|| AppError::FederationAuth("Malformed voucher".into()))?;

    let payload_bytes = B64
        .decode(payload_b64)
        .map_err(|_| AppError::FederationAuth("Malformed voucher payload".into()))?;
    let payload: VoucherPayload = serde_json::from_slice(&payload_bytes)
        .map_err(|_| AppError::FederationAuth("Malformed voucher payload".into()))?;

    if payload.target_domain != expected_target {
        return Err(AppError::FederationAuth("Voucher issued for a different target".into()));
    }

    let now = chrono::Utc::now().timestamp() as f64;
    if now > payload.expires_at {
        return Err(AppError::FederationAuth("Voucher expired".into()));
    }

    let home_domain = payload
        .user_address
        .split_once('@')
        .map(|(_, domain)| domain)
        .ok_or_else(|| AppError::FederationAuth("Voucher user_address missing domain".into()))?;

    let pub_b64 = lookup_vox_key(home_domain)
        .await
        .ok_or_else(|| AppError::FederationAuth("Could not resolve origin signing key".into()))?;

    if !verify_signature(&payload_bytes, sig_b64, &pub_b64) {
        return Err(AppError::FederationAuth("Voucher signature invalid".into()));
    }

    let inserted = sqlx::query(
        "INSERT INTO federation_nonces (nonce, seen_at, expires_at)
         VALUES ($1, now(), now() + interval '10 minutes')
         ON CONFLICT (nonce) DO NOTHING",
    )
    .bind(&payload.nonce)
    .execute(pool)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(AppError::FederationAuth("Voucher already used".into()));
    }

    Ok(payload)
}

/// Sweep nonces past their 10-minute replay window.
pub async fn cleanup_expired_nonces(pool: &PgPool) -> AppResult<()> {
    sqlx::query("DELETE FROM federation_nonces WHERE expires_at <= now()")
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Presence subscriptions
// ---------------------------------------------------------------------

pub async fn add_presence_sub(pool: &PgPool, domain: &str, address: &str) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO federation_presence_subs (domain, user_address) VALUES ($1, $2)
         ON CONFLICT DO NOTHING",
    )
    .bind(domain)
    .bind(address)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_presence_subscribers(pool: &PgPool, address: &str) -> AppResult<Vec<String>> {
    let domains: Vec<String> =
        sqlx::query_scalar("SELECT domain FROM federation_presence_subs WHERE user_address = $1")
            .bind(address)
            .fetch_all(pool)
            .await?;
    Ok(domains)
}

// ---------------------------------------------------------------------
// Signed outbound requests
// ---------------------------------------------------------------------

/// Sign and send `body` to `path` on `target_domain`, stamping the
/// `X-Vox-Origin`/`X-Vox-Signature`/`X-Vox-Timestamp` headers an inbound
/// federation handler verifies. Network/DNS failures are
/// swallowed and surfaced as `None` — a federation peer being unreachable
/// is routine, not exceptional.
pub async fn send_federation_request(
    pool: &PgPool,
    config: &Config,
    http_client: &reqwest::Client,
    target_domain: &str,
    path: &str,
    body: Option<&serde_json::Value>,
    method: reqwest::Method,
) -> Option<reqwest::Response> {
    let (host, port) = lookup_vox_host(target_domain).await;
    let key = get_or_create_keypair(pool).await.ok()?;

    let body_bytes = serde_json::to_vec(body.unwrap_or(&serde_json::json!({}))).ok()?;
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let mut signed = body_bytes.clone();
    signed.extend_from_slice(timestamp.as_bytes());
    let sig = sign_body(&signed, &key);

    let url = format!("https://{host}:{port}{path}");
    http_client
        .request(method, url)
        .header("X-Vox-Origin", &config.federation_domain)
        .header("X-Vox-Signature", sig)
        .header("X-Vox-Timestamp", timestamp)
        .header("Content-Type", "application/json")
        .timeout(std::time::Duration::from_secs(config.federation_request_timeout_s))
        .body(body_bytes)
        .send()
        .await
        .ok()
}

// ---------------------------------------------------------------------
// Inbound request verification
// ---------------------------------------------------------------------

/// The verified origin domain of an inbound federation request, attached to
/// request extensions by [`federation_auth_layer`]. Handlers extract it
/// instead of re-trusting `X-Vox-Origin` themselves.
#[derive(Debug, Clone)]
pub struct FederationOrigin(pub String);

#[async_trait]
impl<S> axum::extract::FromRequestParts<S> for FederationOrigin
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<FederationOrigin>().cloned().ok_or_else(|| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": { "code": "INTERNAL", "message": "federation_auth_layer did not run" }
                })),
            )
        })
    }
}

fn header_str<'a>(request: &'a Request<axum::body::Body>, name: &str) -> Option<&'a str> {
    request.headers().get(name)?.to_str().ok()
}

/// `axum::middleware::from_fn_with_state` layer guarding every
/// `/api/v1/federation/*` route: checks `X-Vox-Origin`/`X-Vox-Signature`/
/// `X-Vox-Timestamp` are present, the timestamp is within
/// [`Config::federation_max_clock_skew_s`], the origin isn't blocked (or is
/// allowlisted under a `closed`/`allowlist` policy), then verifies the
/// signature over `body || timestamp` against the origin's published key —
/// the same construction [`send_federation_request`] signs on the way out.
pub async fn federation_auth_layer(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let origin = header_str(&request, "X-Vox-Origin").map(str::to_string);
    let sig_b64 = header_str(&request, "X-Vox-Signature").map(str::to_string);
    let timestamp = header_str(&request, "X-Vox-Timestamp").map(str::to_string);

    let (origin, sig_b64, timestamp) = match (origin, sig_b64, timestamp) {
        (Some(o), Some(s), Some(t)) => (o, s, t),
        _ => {
            return AppError::FederationAuth("Missing X-Vox-Origin/Signature/Timestamp headers".into())
                .into_response()
        }
    };

    let Ok(ts_val) = timestamp.parse::<i64>() else {
        return AppError::FederationAuth("Malformed X-Vox-Timestamp".into()).into_response();
    };
    let skew = (chrono::Utc::now().timestamp() - ts_val).abs();
    if skew > state.config.federation_max_clock_skew_s {
        return AppError::FederationAuth("Timestamp outside allowed clock skew".into()).into_response();
    }

    match check_federation_allowed(&state.pool, &state.config, &origin, "inbound").await {
        Ok(true) => {}
        Ok(false) => {
            return AppError::FederationAuth("This server is not federating with that origin".into())
                .into_response()
        }
        Err(e) => return e.into_response(),
    }

    let (parts, body) = request.into_parts();
    let body_bytes = match axum::body::to_bytes(body, crate::limits::FEDERATION_BODY_MAX).await {
        Ok(b) => b,
        Err(_) => return AppError::Validation("Request body too large".into()).into_response(),
    };

    let mut signed = body_bytes.to_vec();
    signed.extend_from_slice(timestamp.as_bytes());
    if !verify_signature_for_origin(&signed, &sig_b64, &origin).await {
        return AppError::FederationAuth("Signature verification failed".into()).into_response();
    }

    let mut request = Request::from_parts(parts, axum::body::Body::from(body_bytes));
    request.extensions_mut().insert(FederationOrigin(origin));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let seed = [7u8; 32];
        let key = SigningKey::from_bytes(&seed);
        let pub_b64 = B64.encode(key.verifying_key().to_bytes());

        let sig = sign_body(b"hello federation", &key);
        assert!(verify_signature(b"hello federation", &sig, &pub_b64));
        assert!(!verify_signature(b"tampered", &sig, &pub_b64));
    }

    #[test]
    fn verify_signature_rejects_malformed_inputs() {
        assert!(!verify_signature(b"x", "not-base64!!", "also-not-base64!!"));
    }

    #[test]
    fn remote_policy_defaults_to_open_for_unknown_values() {
        assert_eq!(RemotePolicy::from_str("garbage"), RemotePolicy::Open);
        assert_eq!(RemotePolicy::from_str("closed"), RemotePolicy::Closed);
    }
}
