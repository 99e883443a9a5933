mod common;

use axum::http::StatusCode;
use serde_json::json;

// ============================================================================
// register_success
// ============================================================================

#[tokio::test]
async fn register_success() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let email = common::unique_email();

    let (status, body) = common::post_json(
        app,
        "/auth/register",
        json!({ "email": email, "username": "alice", "password": "securepassword123" }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    assert!(body["token"].is_string());
    assert_eq!(body["user"]["email"], email.as_str());
    assert_eq!(body["user"]["username"], "alice");
}

// ============================================================================
// register_duplicate_email
// ============================================================================

#[tokio::test]
async fn register_duplicate_email() {
    let pool = common::test_pool().await;
    let email = common::unique_email();

    let app = common::create_test_app(pool.clone());
    let (status, _) = common::post_json(
        app,
        "/auth/register",
        json!({ "email": email, "username": "bob", "password": "securepassword123" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let app = common::create_test_app(pool);
    let (status, body) = common::post_json(
        app,
        "/auth/register",
        json!({ "email": email, "username": "bob2", "password": "anotherpassword123" }),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(
        body["error"].is_string(),
        "expected 'error' key in body: {body}"
    );
}

// ============================================================================
// register_validates_short_password
// ============================================================================

#[tokio::test]
async fn register_validates_short_password() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let email = common::unique_email();

    // Password is exactly 7 characters — one below the 8-character minimum.
    let (status, body) = common::post_json(
        app,
        "/auth/register",
        json!({ "email": email, "username": "shortpw", "password": "short12" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
}

// ============================================================================
// register_validates_malformed_email
// ============================================================================

#[tokio::test]
async fn register_validates_malformed_email() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let (status, body) = common::post_json(
        app,
        "/auth/register",
        json!({ "email": "not-an-email", "username": "carol", "password": "securepassword123" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
}

// ============================================================================
// register_validates_short_username
// ============================================================================

#[tokio::test]
async fn register_validates_short_username() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let email = common::unique_email();

    // Username is exactly 2 characters — one below the 3-character minimum.
    let (status, body) = common::post_json(
        app,
        "/auth/register",
        json!({ "email": email, "username": "ab", "password": "securepassword123" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
}

// ============================================================================
// login_success
// ============================================================================

#[tokio::test]
async fn login_success() {
    let pool = common::test_pool().await;
    let email = common::unique_email();
    let password = "securepassword123";

    let app = common::create_test_app(pool.clone());
    let (status, _) = common::post_json(
        app,
        "/auth/register",
        json!({ "email": email, "username": "dave", "password": password }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let app = common::create_test_app(pool);
    let (status, body) = common::post_json(
        app,
        "/auth/login",
        json!({ "email": email, "password": password }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert!(body["token"].is_string(), "missing token: {body}");
    assert!(body["user"].is_object(), "missing user: {body}");
    assert_eq!(body["user"]["email"], email.as_str());
}

// ============================================================================
// login_wrong_password
// ============================================================================

#[tokio::test]
async fn login_wrong_password() {
    let pool = common::test_pool().await;
    let email = common::unique_email();

    let app = common::create_test_app(pool.clone());
    let (status, _) = common::post_json(
        app,
        "/auth/register",
        json!({ "email": email, "username": "erin", "password": "correctpassword123" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let app = common::create_test_app(pool);
    let (status, body) = common::post_json(
        app,
        "/auth/login",
        json!({ "email": email, "password": "wrongpassword999" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED, "body: {body}");
    assert!(
        body["error"].is_string(),
        "expected 'error' key in body: {body}"
    );
}

// ============================================================================
// login_unknown_user
// ============================================================================

#[tokio::test]
async fn login_unknown_user() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let (status, body) = common::post_json(
        app,
        "/auth/login",
        json!({ "email": "nobody@example.test", "password": "somepassword123" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED, "body: {body}");
    assert!(
        body["error"].is_string(),
        "expected 'error' key in body: {body}"
    );
}

// ============================================================================
// login_token_authenticates_protected_route
// ============================================================================

#[tokio::test]
async fn login_token_authenticates_protected_route() {
    let pool = common::test_pool().await;
    let email = common::unique_email();
    let password = "securepassword123";

    let app = common::create_test_app(pool.clone());
    let (status, _) = common::post_json(
        app,
        "/auth/register",
        json!({ "email": email, "username": "frank", "password": password }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let app = common::create_test_app(pool.clone());
    let (status, body) = common::post_json(
        app,
        "/auth/login",
        json!({ "email": email, "password": password }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");

    let token = body["token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool);
    let (status, me_body) = common::get_authed(app, "/auth/me", &token).await;

    assert_eq!(status, StatusCode::OK, "token from login was rejected: {me_body}");
    assert_eq!(me_body["email"], email.as_str());
}

// ============================================================================
// me_requires_bearer_token
// ============================================================================

#[tokio::test]
async fn me_requires_bearer_token() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let (status, _) = common::get_no_auth(app, "/auth/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// me_rejects_malformed_token
// ============================================================================

#[tokio::test]
async fn me_rejects_malformed_token() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let (status, _) = common::get_authed(app, "/auth/me", "this.is.not.a.valid.jwt").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// register_returns_different_tokens_each_call
// ============================================================================

#[tokio::test]
async fn register_returns_different_tokens_each_call() {
    let pool = common::test_pool().await;

    let email_a = common::unique_email();
    let email_b = common::unique_email();

    let app = common::create_test_app(pool.clone());
    let (status, body_a) = common::post_json(
        app,
        "/auth/register",
        json!({ "email": email_a, "username": "gina", "password": "securepassword123" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "first register failed: {body_a}");

    let app = common::create_test_app(pool);
    let (status, body_b) = common::post_json(
        app,
        "/auth/register",
        json!({ "email": email_b, "username": "harry", "password": "securepassword123" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "second register failed: {body_b}");

    let token_a = body_a["token"].as_str().unwrap();
    let token_b = body_b["token"].as_str().unwrap();

    assert_ne!(token_a, token_b, "two distinct users received identical tokens");
}
