mod common;

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

// ============================================================================
// Test fixture helpers
// ============================================================================

/// Full fixture: owner, member, outsider; server with vc1, vc2 (rooms) and a feed.
struct Fixture {
    owner_token: String,
    member_token: String,
    outsider_token: String,
    #[allow(dead_code)]
    server_id: String,
    vc1_id: String,
    vc2_id: String,
    feed_id: String,
}

async fn setup(app: axum::Router) -> Fixture {
    let owner_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    let server = common::create_server(app.clone(), &owner_token, "Voice Guild").await;
    let server_id = server["id"].as_str().unwrap().to_owned();

    let vc1 = common::create_room(app.clone(), &owner_token, &server_id, "General Voice").await;
    let vc1_id = vc1["id"].as_str().unwrap().to_owned();

    let vc2 = common::create_room(app.clone(), &owner_token, &server_id, "Gaming Voice").await;
    let vc2_id = vc2["id"].as_str().unwrap().to_owned();

    let feed = common::create_feed(app.clone(), &owner_token, &server_id, "general").await;
    let feed_id = feed["id"].as_str().unwrap().to_owned();

    let member_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;
    common::post_json_authed(
        app.clone(),
        &format!("/api/v1/servers/{server_id}/join"),
        &member_token,
        json!({}),
    )
    .await;

    let outsider_token =
        common::register_and_get_token(app.clone(), &common::unique_username(), "pass1234").await;

    Fixture {
        owner_token,
        member_token,
        outsider_token,
        server_id,
        vc1_id,
        vc2_id,
        feed_id,
    }
}

// ============================================================================
// POST /rooms/:room_id/voice — join
// ============================================================================

#[tokio::test]
async fn join_room_returns_201() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    let (status, body) = common::post_json_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
        json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["room_id"], f.vc1_id);
    assert!(!body["self_mute"].as_bool().unwrap());
    assert!(!body["self_deaf"].as_bool().unwrap());
    assert!(!body["video"].as_bool().unwrap());
    assert!(!body["streaming"].as_bool().unwrap());
    assert!(body["user_id"].is_number());
}

#[tokio::test]
async fn join_requires_auth() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    let (status, _) =
        common::post_json(app, &format!("/api/v1/rooms/{}/voice", f.vc1_id), json!({})).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn join_requires_server_membership() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    let (status, _) = common::post_json_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.outsider_token,
        json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn join_feed_returns_400() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    let (status, _) = common::post_json_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.feed_id),
        &f.owner_token,
        json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn join_nonexistent_room_returns_404() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    let fake_id = Uuid::new_v4();
    let (status, _) = common::post_json_authed(
        app,
        &format!("/api/v1/rooms/{fake_id}/voice"),
        &f.owner_token,
        json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn joining_second_room_auto_leaves_first() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    // Join vc1
    let (status, body) = common::post_json_authed(
        app.clone(),
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["room_id"], f.vc1_id);

    // Join vc2 — should atomically move the user
    let (status, body) = common::post_json_authed(
        app.clone(),
        &format!("/api/v1/rooms/{}/voice", f.vc2_id),
        &f.owner_token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["room_id"], f.vc2_id);

    // vc1 should now be empty
    let (status, list) = common::get_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 0);
}

// ============================================================================
// DELETE /rooms/:room_id/voice — leave
// ============================================================================

#[tokio::test]
async fn leave_room_returns_204() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    // Join first
    common::post_json_authed(
        app.clone(),
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
        json!({}),
    )
    .await;

    let (status, _) = common::delete_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
    )
    .await;

    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn leave_when_not_in_any_room_returns_404() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    let (status, _) = common::delete_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn leave_wrong_room_returns_404() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    // Join vc1
    common::post_json_authed(
        app.clone(),
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
        json!({}),
    )
    .await;

    // Try to leave vc2 — should be 404 (user is in vc1, not vc2)
    let (status, _) = common::delete_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc2_id),
        &f.owner_token,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// PATCH /rooms/:room_id/voice — update state
// ============================================================================

#[tokio::test]
async fn update_self_mute_returns_200() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    common::post_json_authed(
        app.clone(),
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
        json!({}),
    )
    .await;

    let (status, body) = common::patch_json_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
        json!({ "self_mute": true }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["self_mute"].as_bool().unwrap());
    assert!(!body["self_deaf"].as_bool().unwrap());
}

#[tokio::test]
async fn update_self_deaf_returns_200() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    common::post_json_authed(
        app.clone(),
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
        json!({}),
    )
    .await;

    let (status, body) = common::patch_json_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
        json!({ "self_deaf": true }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["self_deaf"].as_bool().unwrap());
    assert!(!body["self_mute"].as_bool().unwrap());
}

#[tokio::test]
async fn update_video_and_streaming_returns_200() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    common::post_json_authed(
        app.clone(),
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
        json!({}),
    )
    .await;

    let (status, body) = common::patch_json_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
        json!({ "video": true, "streaming": true }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["video"].as_bool().unwrap());
    assert!(body["streaming"].as_bool().unwrap());
}

#[tokio::test]
async fn update_when_not_in_room_returns_404() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    let (status, _) = common::patch_json_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
        json!({ "self_mute": true }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_requires_auth() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    let (status, _) = common::patch_no_auth(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        json!({ "self_mute": true }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// GET /rooms/:room_id/voice — list participants
// ============================================================================

#[tokio::test]
async fn list_voice_participants_empty() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    let (status, body) = common::get_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn list_voice_participants_returns_joined_users() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    // Owner and member both join vc1
    common::post_json_authed(
        app.clone(),
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
        json!({}),
    )
    .await;
    common::post_json_authed(
        app.clone(),
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.member_token,
        json!({}),
    )
    .await;

    let (status, body) = common::get_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.owner_token,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    // All entries reference vc1
    for entry in body.as_array().unwrap() {
        assert_eq!(entry["room_id"], f.vc1_id);
    }
}

#[tokio::test]
async fn list_voice_requires_membership() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let f = setup(app.clone()).await;

    let (status, _) = common::get_authed(
        app,
        &format!("/api/v1/rooms/{}/voice", f.vc1_id),
        &f.outsider_token,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
