//! Outbound federation client — thin typed wrappers around
//! [`super::send_federation_request`], one per inbound federation endpoint
//! this server also calls on remote peers.
//!
//! Every function here takes a full `user_address` or `to_addr` of the form
//! `user@domain`; callers that already hold the parsed domain should prefer
//! calling `send_federation_request` directly (as the inbound REST handlers
//! for e.g. `/federation/block` do).

use serde_json::{json, Value};
use sqlx::PgPool;

use crate::config::Config;
use crate::federation::{create_voucher, get_or_create_keypair, send_federation_request};

fn domain_of(address: &str) -> Option<&str> {
    address.split_once('@').map(|(_, domain)| domain)
}

pub async fn relay_dm_message(
    pool: &PgPool,
    config: &Config,
    http_client: &reqwest::Client,
    from_addr: &str,
    to_addr: &str,
    opaque_blob: &str,
) -> bool {
    let Some(domain) = domain_of(to_addr) else {
        return false;
    };
    let body = json!({ "from": from_addr, "to": to_addr, "opaque_blob": opaque_blob });
    let resp = send_federation_request(
        pool,
        config,
        http_client,
        domain,
        "/api/v1/federation/relay/message",
        Some(&body),
        reqwest::Method::POST,
    )
    .await;
    resp.is_some_and(|r| r.status().is_success() || r.status().as_u16() < 300)
}

pub async fn relay_typing(
    pool: &PgPool,
    config: &Config,
    http_client: &reqwest::Client,
    from_addr: &str,
    to_addr: &str,
) -> bool {
    let Some(domain) = domain_of(to_addr) else {
        return false;
    };
    let body = json!({ "from": from_addr, "to": to_addr });
    let resp = send_federation_request(
        pool,
        config,
        http_client,
        domain,
        "/api/v1/federation/relay/typing",
        Some(&body),
        reqwest::Method::POST,
    )
    .await;
    resp.is_some_and(|r| r.status().as_u16() < 300)
}

pub async fn relay_read_receipt(
    pool: &PgPool,
    config: &Config,
    http_client: &reqwest::Client,
    from_addr: &str,
    to_addr: &str,
    up_to_msg_id: i64,
) -> bool {
    let Some(domain) = domain_of(to_addr) else {
        return false;
    };
    let body = json!({ "from": from_addr, "to": to_addr, "up_to_msg_id": up_to_msg_id.to_string() });
    let resp = send_federation_request(
        pool,
        config,
        http_client,
        domain,
        "/api/v1/federation/relay/read",
        Some(&body),
        reqwest::Method::POST,
    )
    .await;
    resp.is_some_and(|r| r.status().as_u16() < 300)
}

pub async fn fetch_remote_prekeys(
    pool: &PgPool,
    config: &Config,
    http_client: &reqwest::Client,
    user_address: &str,
) -> Option<Value> {
    let domain = domain_of(user_address)?;
    let path = format!("/api/v1/federation/users/{user_address}/prekeys");
    let resp = send_federation_request(pool, config, http_client, domain, &path, None, reqwest::Method::GET).await?;
    if resp.status() == reqwest::StatusCode::OK {
        resp.json().await.ok()
    } else {
        None
    }
}

pub async fn fetch_remote_profile(
    pool: &PgPool,
    config: &Config,
    http_client: &reqwest::Client,
    user_address: &str,
) -> Option<Value> {
    let domain = domain_of(user_address)?;
    let path = format!("/api/v1/federation/users/{user_address}");
    let resp = send_federation_request(pool, config, http_client, domain, &path, None, reqwest::Method::GET).await?;
    if resp.status() == reqwest::StatusCode::OK {
        resp.json().await.ok()
    } else {
        None
    }
}

pub async fn subscribe_presence(
    pool: &PgPool,
    config: &Config,
    http_client: &reqwest::Client,
    user_address: &str,
) -> bool {
    let Some(domain) = domain_of(user_address) else {
        return false;
    };
    let body = json!({ "user_address": user_address });
    let resp = send_federation_request(
        pool,
        config,
        http_client,
        domain,
        "/api/v1/federation/presence/subscribe",
        Some(&body),
        reqwest::Method::POST,
    )
    .await;
    resp.is_some_and(|r| r.status().as_u16() < 300)
}

pub async fn notify_presence(
    pool: &PgPool,
    config: &Config,
    http_client: &reqwest::Client,
    domain: &str,
    user_address: &str,
    status: &str,
    activity: Option<&str>,
) -> bool {
    let mut body = json!({ "user_address": user_address, "status": status });
    if let Some(activity) = activity {
        body["activity"] = json!(activity);
    }
    let resp = send_federation_request(
        pool,
        config,
        http_client,
        domain,
        "/api/v1/federation/presence/notify",
        Some(&body),
        reqwest::Method::POST,
    )
    .await;
    resp.is_some_and(|r| r.status().as_u16() < 300)
}

pub async fn send_join_request(
    pool: &PgPool,
    config: &Config,
    http_client: &reqwest::Client,
    user_address: &str,
    target_domain: &str,
    invite_code: Option<&str>,
) -> Option<Value> {
    let key = get_or_create_keypair(pool).await.ok()?;
    let voucher = create_voucher(user_address, target_domain, &key, config.federation_voucher_max_ttl_s);
    let mut body = json!({ "user_address": user_address, "voucher": voucher });
    if let Some(code) = invite_code {
        body["invite_code"] = json!(code);
    }
    let resp = send_federation_request(
        pool,
        config,
        http_client,
        target_domain,
        "/api/v1/federation/join",
        Some(&body),
        reqwest::Method::POST,
    )
    .await?;
    if resp.status() == reqwest::StatusCode::OK {
        resp.json().await.ok()
    } else {
        None
    }
}

pub async fn send_block_notification(
    pool: &PgPool,
    config: &Config,
    http_client: &reqwest::Client,
    domain: &str,
    reason: Option<&str>,
) -> bool {
    let mut body = json!({});
    if let Some(reason) = reason {
        body["reason"] = json!(reason);
    }
    let resp = send_federation_request(
        pool,
        config,
        http_client,
        domain,
        "/api/v1/federation/block",
        Some(&body),
        reqwest::Method::POST,
    )
    .await;
    resp.is_some_and(|r| r.status().as_u16() < 300)
}
