mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use catalog_auth::auth::refresh::hash_token;
use catalog_auth::store::RefreshTokenRepository;
use common::{AUDIENCE, TestApp, assert_generic_unauthorized, bearer_request, json_request, read_json};
use serde_json::{Value, json};

async fn refresh(app: &TestApp, token: &str) -> (StatusCode, Value) {
    let response = app
        .send(json_request(
            "POST",
            "/auth/refresh",
            json!({ "refresh_token": token, "audience": AUDIENCE }),
        ))
        .await;
    let status = response.status();
    (status, read_json(response).await)
}

async fn logout(app: &TestApp, token: &str) -> StatusCode {
    app.send(json_request(
        "POST",
        "/auth/logout",
        json!({ "refresh_token": token }),
    ))
    .await
    .status()
}

#[tokio::test]
async fn single_path_rotation_chains_tokens() {
    let app = TestApp::start(None).await;
    let login = app.login("google-sub-1", "a@example.com").await;
    let r0 = login["refresh_token"].as_str().expect("r0").to_string();

    let (status, body) = refresh(&app, &r0).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 1800);
    let r1 = body["refresh_token"].as_str().expect("r1").to_string();
    assert_ne!(r0, r1);

    let (status, body) = refresh(&app, &r1).await;
    assert_eq!(status, StatusCode::OK);
    let r2 = body["refresh_token"].as_str().expect("r2").to_string();

    let record = app
        .store
        .refresh_token_by_hash(&hash_token(&r2))
        .await
        .expect("lookup")
        .expect("r2 record");
    assert_eq!(record.previous_token_hash, Some(hash_token(&r1)));
    assert!(record.revoked_at.is_none());

    let retired = app
        .store
        .refresh_token_by_hash(&hash_token(&r0))
        .await
        .expect("lookup")
        .expect("r0 record");
    assert_eq!(retired.revoked_reason.as_deref(), Some("rotated"));
}

#[tokio::test]
async fn reuse_of_rotated_token_revokes_session_tree() {
    let app = TestApp::start(None).await;
    let login = app.login("google-sub-1", "a@example.com").await;
    let r0 = login["refresh_token"].as_str().expect("r0").to_string();

    let (_, body) = refresh(&app, &r0).await;
    let r1 = body["refresh_token"].as_str().expect("r1").to_string();

    let (status, body) = refresh(&app, &r0).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_generic_unauthorized(&body);

    let (status, body) = refresh(&app, &r1).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_generic_unauthorized(&body);

    let record = app
        .store
        .refresh_token_by_hash(&hash_token(&r1))
        .await
        .expect("lookup")
        .expect("r1 record");
    assert_eq!(record.revoked_reason.as_deref(), Some("reuse_detected"));
}

#[tokio::test]
async fn unknown_refresh_token_and_audience_are_rejected() {
    let app = TestApp::start(None).await;
    let (status, body) = refresh(&app, &"ab".repeat(64)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_generic_unauthorized(&body);

    let login = app.login("google-sub-1", "a@example.com").await;
    let r0 = login["refresh_token"].as_str().expect("r0");
    let response = app
        .send(json_request(
            "POST",
            "/auth/refresh",
            json!({ "refresh_token": r0, "audience": "https://evil.example" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The rejected audience must not have consumed the token.
    let (status, _) = refresh(&app, r0).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn logout_always_succeeds_and_kills_the_token() {
    let app = TestApp::start(None).await;
    let login = app.login("google-sub-1", "a@example.com").await;
    let r0 = login["refresh_token"].as_str().expect("r0").to_string();

    assert_eq!(logout(&app, &r0).await, StatusCode::OK);
    assert_eq!(logout(&app, &r0).await, StatusCode::OK);
    assert_eq!(logout(&app, "never-issued").await, StatusCode::OK);

    let (status, body) = refresh(&app, &r0).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_generic_unauthorized(&body);
}

#[tokio::test]
async fn logout_all_revokes_every_device() {
    let app = TestApp::start(None).await;
    let phone = app.login("google-sub-1", "a@example.com").await;
    let laptop = app.login("google-sub-1", "a@example.com").await;
    let other_user = app.login("google-sub-2", "b@example.com").await;

    let access = phone["access_token"].as_str().expect("access");
    let response = app
        .send(bearer_request("POST", "/auth/logout-all", access))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({ "revoked": 2 }));

    for session in [&phone, &laptop] {
        let token = session["refresh_token"].as_str().expect("refresh");
        let (status, _) = refresh(&app, token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let token = other_user["refresh_token"].as_str().expect("refresh");
    let (status, _) = refresh(&app, token).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn logout_all_requires_bearer() {
    let app = TestApp::start(None).await;
    let response = app
        .send(json_request("POST", "/auth/logout-all", json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_generic_unauthorized(&read_json(response).await);
}

#[tokio::test]
async fn logout_answers_ok_for_unreadable_bodies() {
    let app = TestApp::start(None).await;
    let response = app
        .send(json_request("POST", "/auth/logout", json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "ok");

    let garbage = Request::post("/auth/logout")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .expect("request");
    assert_eq!(app.send(garbage).await.status(), StatusCode::OK);

    let bare = Request::post("/auth/logout")
        .body(Body::empty())
        .expect("request");
    assert_eq!(app.send(bare).await.status(), StatusCode::OK);
}
