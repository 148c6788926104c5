//! Session lifecycle against a mock auth API over HTTP.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use cavemaster_session::AuthContext;
use cavemaster_session::guard::RouteTarget;
use cavemaster_session::role::Role;
use cavemaster_session::error::ApiError;
use cavemaster_session::session::{AuthApi, HttpAuthApi, LoginOutcome, LoginRequest};
use cavemaster_session::storage::{KeyValueStore, MemoryStore, PROFILE_KEY, USER_ROLE_KEY};
use common::{MockServer, mint_token, test_config};
use serde_json::json;

#[tokio::test]
async fn test_login_persists_token_and_loads_profile() {
    let token = mint_token(3600, Some("Manager"));
    let server = MockServer::start(&token).await;
    let (ctx, storage) = server.context();
    let mut updates = ctx.session.subscribe();

    let (role, profile) = match ctx.session.login("nadia@cavemaster.test", "s3cret").await {
        LoginOutcome::Authenticated { role, profile } => (role, profile),
        other => panic!("expected authenticated outcome, got {other:?}"),
    };
    assert_eq!(role, Some(Role::Manager));

    let user = profile.wait().await.expect("profile loaded");
    assert_eq!(user.id, "42");
    assert_eq!(user.display_name(), "Nadia Ferri");

    assert_eq!(ctx.tokens.get_token().unwrap().as_deref(), Some(token.as_str()));
    assert_eq!(ctx.tokens.stored_role().unwrap().as_deref(), Some("manager"));
    assert_eq!(storage.get(USER_ROLE_KEY).unwrap().as_deref(), Some("manager"));
    assert!(storage.get(PROFILE_KEY).unwrap().is_some());
    assert!(ctx.session.is_authenticated());
    assert!(ctx.session.has_role(&Role::Manager));
    assert!(ctx.session.has_any_role(&[Role::Admin, Role::Manager]));
    assert!(!ctx.session.has_role(&Role::Admin));

    let seen = tokio::time::timeout(
        Duration::from_secs(2),
        updates.wait_for(Option::is_some),
    )
    .await
    .expect("subscriber notified")
    .expect("sender alive")
    .clone();
    assert_eq!(seen.unwrap().email, "nadia@cavemaster.test");

    assert_eq!(
        server.state.last_authorization().as_deref(),
        Some(format!("Bearer {token}").as_str())
    );
    assert_eq!(
        server.state.last_body(),
        Some(json!({"email": "nadia@cavemaster.test", "password": "s3cret"}))
    );
}

#[tokio::test]
async fn test_login_network_failure_leaves_no_session() {
    // Nothing listens on port 9 of the loopback interface.
    let config = Arc::new(test_config("http://127.0.0.1:9"));
    let storage = Arc::new(MemoryStore::new());
    let api = HttpAuthApi::new(&config.api).unwrap();
    let ctx = AuthContext::with_parts(
        config,
        Arc::clone(&storage) as Arc<dyn KeyValueStore>,
        Arc::new(api),
    );

    let outcome = ctx.session.login("nadia@cavemaster.test", "s3cret").await;

    assert!(matches!(outcome, LoginOutcome::Failed { .. }));
    assert!(!ctx.session.is_authenticated());
    assert!(ctx.tokens.get_token().unwrap().is_none());
    assert!(storage.is_empty());
}

#[tokio::test]
async fn test_login_without_token_is_rejected() {
    let server = MockServer::start("unused").await;
    server
        .state
        .set_login_body(json!({ "message": "Invalid credentials" }));
    let (ctx, _) = server.context();

    let outcome = ctx.session.login("nadia@cavemaster.test", "wrong").await;

    match outcome {
        LoginOutcome::Rejected { message } => {
            assert_eq!(message.as_deref(), Some("Invalid credentials"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(!ctx.tokens.is_logged().unwrap());
}

#[tokio::test]
async fn test_undecodable_login_body_is_an_http_error() {
    let server = MockServer::start("unused").await;
    server.state.set_login_body(json!(["not", "an", "object"]));
    let api = HttpAuthApi::new(&test_config(&server.base_url()).api).unwrap();

    let request = LoginRequest {
        email: "nadia@cavemaster.test".to_string(),
        password: "s3cret".to_string(),
    };
    match api.login(&request).await {
        Err(ApiError::Http(e)) => assert!(e.is_decode()),
        other => panic!("expected a decode error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_login_error_status_is_failure() {
    let server = MockServer::start("unused").await;
    *server.state.login_status.lock().unwrap() = StatusCode::UNAUTHORIZED;
    let (ctx, _) = server.context();

    let outcome = ctx.session.login("nadia@cavemaster.test", "wrong").await;

    assert!(!outcome.is_authenticated());
    assert!(!ctx.session.is_authenticated());
}

#[tokio::test]
async fn test_token_role_claim_wins_over_response_role() {
    let token = mint_token(3600, Some("waitress"));
    let server = MockServer::start(&token).await;
    server
        .state
        .set_login_body(json!({ "token": token, "role": "admin" }));
    let (ctx, _) = server.context();

    let outcome = ctx.session.login("lea@cavemaster.test", "pw").await;
    assert!(outcome.is_authenticated());

    assert_eq!(ctx.session.get_user_role(), Some(Role::Waitress));
    assert_eq!(ctx.tokens.stored_role().unwrap().as_deref(), Some("waitress"));
}

#[tokio::test]
async fn test_response_role_used_when_token_has_none() {
    let token = mint_token(3600, None);
    let server = MockServer::start(&token).await;
    server
        .state
        .set_login_body(json!({ "token": token, "role": "client" }));
    let (ctx, _) = server.context();

    assert!(ctx.session.login("c@cavemaster.test", "pw").await.is_authenticated());
    assert_eq!(ctx.session.get_user_role(), Some(Role::Client));
}

#[tokio::test]
async fn test_profile_unauthorized_logs_out() {
    let token = mint_token(3600, Some("admin"));
    let server = MockServer::start(&token).await;
    let (ctx, storage) = server.context();
    ctx.tokens.save_token(&token, Some("admin")).unwrap();
    server.state.set_profile_status(StatusCode::UNAUTHORIZED);

    let profile = ctx.session.get_current_user_profile().await.unwrap();

    assert!(profile.is_none());
    assert!(ctx.tokens.get_token().unwrap().is_none());
    assert!(storage.get(USER_ROLE_KEY).unwrap().is_none());
    assert!(ctx.session.current_user().is_none());
}

#[tokio::test]
async fn test_profile_transient_failure_keeps_caches() {
    let token = mint_token(3600, Some("manager"));
    let server = MockServer::start(&token).await;
    let (ctx, storage) = server.context();
    ctx.tokens.save_token(&token, Some("manager")).unwrap();

    let first = ctx.session.get_current_user_profile().await.unwrap();
    assert!(first.is_some());

    server
        .state
        .set_profile_status(StatusCode::INTERNAL_SERVER_ERROR);
    let err = ctx.session.get_current_user_profile().await.unwrap_err();
    assert!(err.to_string().contains("500"));

    assert_eq!(ctx.session.current_user(), first);
    assert!(storage.get(PROFILE_KEY).unwrap().is_some());
    assert!(ctx.tokens.is_logged().unwrap());
}

#[tokio::test]
async fn test_profile_without_token_is_none() {
    let server = MockServer::start("unused").await;
    let (ctx, _) = server.context();

    assert!(ctx.session.get_current_user_profile().await.unwrap().is_none());
    assert!(ctx.session.load_current_user_profile(false).await.unwrap().is_none());
    assert_eq!(server.state.profile_hits(), 0);
}

#[tokio::test]
async fn test_load_profile_prefers_memory_then_cache() {
    let token = mint_token(3600, Some("manager"));
    let server = MockServer::start(&token).await;
    let (ctx, storage) = server.context();
    ctx.tokens.save_token(&token, Some("manager")).unwrap();

    let fetched = ctx.session.load_current_user_profile(false).await.unwrap();
    assert!(fetched.is_some());
    assert_eq!(server.state.profile_hits(), 1);

    // Memory hit
    let again = ctx.session.load_current_user_profile(false).await.unwrap();
    assert_eq!(again, fetched);
    assert_eq!(server.state.profile_hits(), 1);

    // Durable cache hit from a fresh service over the same storage
    let api = HttpAuthApi::new(&ctx.config.api).unwrap();
    let restarted = AuthContext::with_parts(
        Arc::clone(&ctx.config),
        Arc::clone(&storage) as Arc<dyn KeyValueStore>,
        Arc::new(api),
    );
    let cached = restarted.session.load_current_user_profile(false).await.unwrap();
    assert_eq!(cached.as_deref(), fetched.as_deref());
    assert_eq!(restarted.session.current_user().as_deref(), fetched.as_deref());
    assert_eq!(server.state.profile_hits(), 1);

    // Forced refresh goes to the API
    ctx.session.load_current_user_profile(true).await.unwrap();
    assert_eq!(server.state.profile_hits(), 2);
}

#[tokio::test]
async fn test_corrupt_cached_profile_is_replaced() {
    let token = mint_token(3600, Some("manager"));
    let server = MockServer::start(&token).await;
    let (ctx, storage) = server.context();
    ctx.tokens.save_token(&token, Some("manager")).unwrap();
    storage.set(PROFILE_KEY, "{not json").unwrap();

    let profile = ctx.session.load_current_user_profile(false).await.unwrap();

    assert_eq!(profile.unwrap().id, "42");
    assert_eq!(server.state.profile_hits(), 1);
    let cached = storage.get(PROFILE_KEY).unwrap().unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&cached).is_ok());
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let token = mint_token(3600, Some("admin"));
    let server = MockServer::start(&token).await;
    let (ctx, storage) = server.context();
    assert!(ctx.session.login("a@cavemaster.test", "pw").await.is_authenticated());
    ctx.session.load_current_user_profile(false).await.unwrap();

    assert_eq!(ctx.session.logout(), RouteTarget::Home);
    assert!(storage.is_empty());
    assert!(ctx.session.current_user().is_none());

    assert_eq!(ctx.session.logout(), RouteTarget::Home);
    assert!(storage.is_empty());
    assert!(ctx.session.current_user().is_none());
    assert!(!ctx.session.is_authenticated());
    assert_eq!(ctx.session.get_user_role(), None);
}

#[tokio::test]
async fn test_clearing_token_directly_drops_current_user() {
    let token = mint_token(3600, Some("manager"));
    let server = MockServer::start(&token).await;
    let (ctx, storage) = server.context();
    let updates = ctx.session.subscribe();

    let LoginOutcome::Authenticated { profile, .. } =
        ctx.session.login("nadia@cavemaster.test", "s3cret").await
    else {
        panic!("expected authenticated outcome");
    };
    assert!(profile.wait().await.is_some());
    assert!(ctx.session.current_user().is_some());

    assert_eq!(ctx.tokens.clear_token_expired().unwrap(), RouteTarget::AuthEntry);

    assert!(ctx.tokens.get_token().unwrap().is_none());
    assert!(ctx.session.current_user().is_none());
    assert!(updates.borrow().is_none());
    assert!(storage.get(PROFILE_KEY).unwrap().is_none());
}

#[tokio::test]
async fn test_logout_expired_points_to_auth_entry() {
    let token = mint_token(3600, Some("admin"));
    let server = MockServer::start(&token).await;
    let (ctx, storage) = server.context();
    assert!(ctx.session.login("a@cavemaster.test", "pw").await.is_authenticated());

    assert_eq!(ctx.session.logout_expired(), RouteTarget::AuthEntry);
    assert!(storage.is_empty());
    assert!(ctx.session.current_user().is_none());
    assert!(!ctx.session.is_authenticated());
}

#[tokio::test]
async fn test_expired_token_logs_out_on_check() {
    let server = MockServer::start("unused").await;
    let (ctx, storage) = server.context();
    ctx.tokens
        .save_token(&mint_token(-1, Some("admin")), Some("admin"))
        .unwrap();
    storage.set(USER_ROLE_KEY, "admin").unwrap();

    assert!(ctx.tokens.is_token_expired().unwrap());
    assert!(!ctx.session.is_authenticated());
    assert!(storage.is_empty());
}

#[tokio::test]
async fn test_undecodable_token_logs_out_and_role_falls_back() {
    let server = MockServer::start("unused").await;
    let (ctx, storage) = server.context();
    ctx.tokens.save_token("garbage", Some("client")).unwrap();
    storage.set(USER_ROLE_KEY, "waitress").unwrap();

    // Cached role string comes before the role saved with the token
    assert_eq!(ctx.session.get_user_role(), Some(Role::Waitress));
    storage.remove(USER_ROLE_KEY).unwrap();
    assert_eq!(ctx.session.get_user_role(), Some(Role::Client));

    assert!(!ctx.session.is_authenticated());
    assert!(!ctx.tokens.is_logged().unwrap());
    assert_eq!(ctx.session.get_user_role(), None);
}

#[tokio::test]
async fn test_password_flows_shape_requests() {
    let token = mint_token(3600, Some("client"));
    let server = MockServer::start(&token).await;
    let (ctx, _) = server.context();

    let forgot = ctx.session.forgot_password("c@cavemaster.test").await;
    assert!(forgot.success);
    assert_eq!(
        server.state.last_body(),
        Some(json!({"email": "c@cavemaster.test"}))
    );

    let reset = ctx
        .session
        .reset_password("c@cavemaster.test", "CfDJ8%2Bab%2Fcd%3D%3D", "n3w")
        .await;
    assert!(reset.success);
    assert_eq!(
        server.state.last_body(),
        Some(json!({"email": "c@cavemaster.test", "token": "CfDJ8+ab/cd==", "newPassword": "n3w"}))
    );

    let valid = ctx
        .session
        .validate_reset_token("c@cavemaster.test", "a%2Bb")
        .await;
    assert!(valid.success);
    assert_eq!(
        server.state.last_body(),
        Some(json!({"email": "c@cavemaster.test", "token": "a+b"}))
    );

    // Signed out: no request is made
    let refused = ctx.session.change_password("old", "new").await;
    assert!(!refused.success);

    ctx.tokens.save_token(&token, Some("client")).unwrap();
    let changed = ctx.session.change_password("old", "new").await;
    assert!(changed.success);
    assert_eq!(changed.message.as_deref(), Some("Password changed"));
    assert_eq!(
        server.state.last_authorization().as_deref(),
        Some(format!("Bearer {token}").as_str())
    );
    assert_eq!(
        server.state.last_body(),
        Some(json!({"currentPassword": "old", "newPassword": "new"}))
    );
}

#[tokio::test]
async fn test_password_flow_network_failure_degrades() {
    let config = Arc::new(test_config("http://127.0.0.1:9"));
    let api = HttpAuthApi::new(&config.api).unwrap();
    let ctx = AuthContext::with_parts(
        config,
        Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>,
        Arc::new(api),
    );

    let response = ctx.session.forgot_password("c@cavemaster.test").await;

    assert!(!response.success);
    assert!(response.message.is_some());
}

#[tokio::test]
async fn test_interceptor_follows_session() {
    let token = mint_token(3600, Some("admin"));
    let server = MockServer::start(&token).await;
    let (ctx, _) = server.context();

    let request = reqwest::Client::new()
        .get(format!("{}/api/caves", server.base_url()))
        .build()
        .unwrap();
    assert!(ctx.interceptor.apply(request).headers().get("authorization").is_none());

    assert!(ctx.session.login("a@cavemaster.test", "pw").await.is_authenticated());
    let request = reqwest::Client::new()
        .get(format!("{}/api/caves", server.base_url()))
        .build()
        .unwrap();
    let request = ctx.interceptor.apply(request);
    assert_eq!(
        request.headers()["authorization"],
        format!("Bearer {token}").as_str()
    );
}
