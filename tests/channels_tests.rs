mod common;

use axum::http::StatusCode;
use serde_json::json;

// ============================================================================
// Helpers
// ============================================================================

/// Register a user and have them join a server, returning their token.
async fn register_and_join(app: axum::Router, server_id: &str, password: &str) -> String {
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), password).await;
    common::post_json_authed(app, &format!("/api/v1/servers/{server_id}/join"), &token, json!({}))
        .await;
    token
}

// ============================================================================
// POST /servers/:id/feeds — create feed
// ============================================================================

#[tokio::test]
async fn create_feed_success() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Guild").await;
    let sid = server["id"].as_str().unwrap();

    let (status, body) = common::post_json_authed(
        app,
        &format!("/api/v1/servers/{sid}/feeds"),
        &token,
        json!({ "name": "general" }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "general");
    assert_eq!(body["space_type"], "feed");
    assert_eq!(body["server_id"], sid);
    assert_eq!(body["position"], 0, "first feed should get position 0");
}

#[tokio::test]
async fn create_feed_with_topic_and_category() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Rich Guild").await;
    let sid = server["id"].as_str().unwrap();

    let (status, body) = common::post_json_authed(
        app,
        &format!("/api/v1/servers/{sid}/feeds"),
        &token,
        json!({ "name": "announcements", "topic": "Server news" }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["topic"], "Server news");
}

#[tokio::test]
async fn create_feed_positions_increment() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Multi Feed Guild").await;
    let sid = server["id"].as_str().unwrap();

    let ch1 = common::create_feed(app.clone(), &token, sid, "first").await;
    let ch2 = common::create_feed(app.clone(), &token, sid, "second").await;

    assert_eq!(ch1["position"], 0);
    assert_eq!(ch2["position"], 1);
}

#[tokio::test]
async fn create_feed_and_room_positions_are_independent() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Mixed Guild").await;
    let sid = server["id"].as_str().unwrap();

    let feed = common::create_feed(app.clone(), &token, sid, "general").await;
    let room = common::create_room(app.clone(), &token, sid, "General Voice").await;

    assert_eq!(feed["position"], 0, "feeds and rooms track position separately");
    assert_eq!(room["position"], 0);
}

#[tokio::test]
async fn create_feed_requires_auth() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Auth Guild").await;
    let sid = server["id"].as_str().unwrap();

    let (status, _) =
        common::post_json(app, &format!("/api/v1/servers/{sid}/feeds"), json!({ "name": "general" })).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_feed_non_member_forbidden() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let owner_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &owner_token, "Owner Guild").await;
    let sid = server["id"].as_str().unwrap();

    let outsider_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;

    let (status, _) = common::post_json_authed(
        app,
        &format!("/api/v1/servers/{sid}/feeds"),
        &outsider_token,
        json!({ "name": "hijack" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_feed_rejects_empty_name() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Validation Guild").await;
    let sid = server["id"].as_str().unwrap();

    let (status, _) = common::post_json_authed(
        app,
        &format!("/api/v1/servers/{sid}/feeds"),
        &token,
        json!({ "name": "" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_feed_on_unknown_server_returns_404() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;

    let (status, _) = common::post_json_authed(
        app,
        "/api/v1/servers/00000000-0000-0000-0000-000000000000/feeds",
        &token,
        json!({ "name": "general" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// GET /servers/:id/feeds, /servers/:id/rooms — list
// ============================================================================

#[tokio::test]
async fn list_feeds_empty_on_new_server() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Empty Guild").await;
    let sid = server["id"].as_str().unwrap();

    let (status, body) =
        common::get_authed(app, &format!("/api/v1/servers/{sid}/feeds"), &token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]), "new server should have no feeds");
}

#[tokio::test]
async fn list_feeds_includes_created_feeds_only() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "List Guild").await;
    let sid = server["id"].as_str().unwrap();

    common::create_feed(app.clone(), &token, sid, "general").await;
    common::create_feed(app.clone(), &token, sid, "announcements").await;
    common::create_room(app.clone(), &token, sid, "General Voice").await;

    let (status, body) =
        common::get_authed(app, &format!("/api/v1/servers/{sid}/feeds"), &token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2, "rooms must not appear in the feeds list");
    assert_eq!(body[0]["name"], "general");
    assert_eq!(body[1]["name"], "announcements");
}

#[tokio::test]
async fn list_rooms_includes_created_rooms_only() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "List Room Guild").await;
    let sid = server["id"].as_str().unwrap();

    common::create_feed(app.clone(), &token, sid, "general").await;
    common::create_room(app.clone(), &token, sid, "Lounge").await;

    let (status, body) =
        common::get_authed(app, &format!("/api/v1/servers/{sid}/rooms"), &token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "Lounge");
}

#[tokio::test]
async fn list_feeds_requires_auth() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Auth List Guild").await;
    let sid = server["id"].as_str().unwrap();

    let (status, _) = common::get_no_auth(app, &format!("/api/v1/servers/{sid}/feeds")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn list_feeds_non_member_sees_404() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let owner_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &owner_token, "Private Guild").await;
    let sid = server["id"].as_str().unwrap();

    let outsider_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let (status, _) =
        common::get_authed(app, &format!("/api/v1/servers/{sid}/feeds"), &outsider_token).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_feeds_member_can_list() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let owner_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &owner_token, "Member List Guild").await;
    let sid = server["id"].as_str().unwrap();
    common::create_feed(app.clone(), &owner_token, sid, "general").await;

    let member_token = register_and_join(app.clone(), sid, "pass1234").await;

    let (status, body) =
        common::get_authed(app, &format!("/api/v1/servers/{sid}/feeds"), &member_token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

// ============================================================================
// GET /channels/:id — get a feed or room
// ============================================================================

#[tokio::test]
async fn get_channel_success() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Get Guild").await;
    let sid = server["id"].as_str().unwrap();
    let ch = common::create_feed(app.clone(), &token, sid, "general").await;
    let cid = ch["id"].as_str().unwrap();

    let (status, body) = common::get_authed(app, &format!("/api/v1/channels/{cid}"), &token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], cid);
    assert_eq!(body["name"], "general");
}

#[tokio::test]
async fn get_channel_not_found() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;

    let (status, _) = common::get_authed(
        app,
        "/api/v1/channels/00000000-0000-0000-0000-000000000000",
        &token,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_channel_member_can_read() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let owner_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &owner_token, "Member Read Guild").await;
    let sid = server["id"].as_str().unwrap();
    let ch = common::create_feed(app.clone(), &owner_token, sid, "general").await;
    let cid = ch["id"].as_str().unwrap();

    let member_token = register_and_join(app.clone(), sid, "pass1234").await;

    let (status, body) =
        common::get_authed(app, &format!("/api/v1/channels/{cid}"), &member_token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], cid);
}

#[tokio::test]
async fn get_channel_non_member_returns_404() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let owner_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &owner_token, "Non-Member Guild").await;
    let sid = server["id"].as_str().unwrap();
    let ch = common::create_feed(app.clone(), &owner_token, sid, "secret").await;
    let cid = ch["id"].as_str().unwrap();

    let outsider_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;

    let (status, _) =
        common::get_authed(app, &format!("/api/v1/channels/{cid}"), &outsider_token).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// PATCH /channels/:id — update a feed or room (server owner only)
// ============================================================================

#[tokio::test]
async fn update_channel_name_success() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Update Guild").await;
    let sid = server["id"].as_str().unwrap();
    let ch = common::create_feed(app.clone(), &token, sid, "old-name").await;
    let cid = ch["id"].as_str().unwrap();

    let (status, body) = common::patch_json_authed(
        app,
        &format!("/api/v1/channels/{cid}"),
        &token,
        json!({ "name": "new-name" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "new-name");
    // Type and position should be unchanged.
    assert_eq!(body["space_type"], "feed");
    assert_eq!(body["position"], 0);
}

#[tokio::test]
async fn update_channel_non_owner_forbidden() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let owner_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &owner_token, "Perm Guild").await;
    let sid = server["id"].as_str().unwrap();
    let ch = common::create_feed(app.clone(), &owner_token, sid, "channel").await;
    let cid = ch["id"].as_str().unwrap();

    let member_token = register_and_join(app.clone(), sid, "pass1234").await;

    let (status, _) = common::patch_json_authed(
        app,
        &format!("/api/v1/channels/{cid}"),
        &member_token,
        json!({ "name": "hijacked" }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn update_channel_empty_name_rejected() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Validation PATCH Guild").await;
    let sid = server["id"].as_str().unwrap();
    let ch = common::create_feed(app.clone(), &token, sid, "channel").await;
    let cid = ch["id"].as_str().unwrap();

    let (status, _) = common::patch_json_authed(
        app,
        &format!("/api/v1/channels/{cid}"),
        &token,
        json!({ "name": "" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_channel_not_found() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;

    let (status, _) = common::patch_json_authed(
        app,
        "/api/v1/channels/00000000-0000-0000-0000-000000000000",
        &token,
        json!({ "name": "new" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_channel_requires_auth() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Auth PATCH Guild").await;
    let sid = server["id"].as_str().unwrap();
    let ch = common::create_feed(app.clone(), &token, sid, "channel").await;
    let cid = ch["id"].as_str().unwrap();

    let (status, _) = common::patch_no_auth(
        app,
        &format!("/api/v1/channels/{cid}"),
        json!({ "name": "x" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// DELETE /channels/:id — delete a feed or room (server owner only)
// ============================================================================

#[tokio::test]
async fn delete_channel_success() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Delete Guild").await;
    let sid = server["id"].as_str().unwrap();
    let ch = common::create_feed(app.clone(), &token, sid, "doomed").await;
    let cid = ch["id"].as_str().unwrap();

    let (status, _) =
        common::delete_authed(app.clone(), &format!("/api/v1/channels/{cid}"), &token).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Confirm it's gone.
    let (status, _) = common::get_authed(app, &format!("/api/v1/channels/{cid}"), &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_channel_non_owner_forbidden() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let owner_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &owner_token, "Del Perm Guild").await;
    let sid = server["id"].as_str().unwrap();
    let ch = common::create_feed(app.clone(), &owner_token, sid, "protected").await;
    let cid = ch["id"].as_str().unwrap();

    let member_token = register_and_join(app.clone(), sid, "pass1234").await;

    let (status, _) =
        common::delete_authed(app, &format!("/api/v1/channels/{cid}"), &member_token).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn delete_channel_not_found() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;

    let (status, _) = common::delete_authed(
        app,
        "/api/v1/channels/00000000-0000-0000-0000-000000000000",
        &token,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_channel_requires_auth() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &token, "Auth DELETE Guild").await;
    let sid = server["id"].as_str().unwrap();
    let ch = common::create_feed(app.clone(), &token, sid, "channel").await;
    let cid = ch["id"].as_str().unwrap();

    let (status, _) = common::delete_no_auth(app, &format!("/api/v1/channels/{cid}")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
