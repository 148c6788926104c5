//! Shared fixtures: configuration, token minting and a mock auth API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cavemaster_session::AuthContext;
use cavemaster_session::config::{
    ApiConfig, AppConfig, DEFAULT_ROLE_CLAIM, RoutesConfig, StorageBackend, StorageConfig,
    TokenConfig,
};
use cavemaster_session::storage::{KeyValueStore, MemoryStore};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};

pub fn test_config(base_url: &str) -> AppConfig {
    AppConfig {
        api: ApiConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            login_path: "/api/Auth/login".to_string(),
            profile_path: "/api/Auth/me".to_string(),
            forgot_password_path: "/api/Auth/forgot-password".to_string(),
            reset_password_path: "/api/Auth/reset-password".to_string(),
            validate_reset_token_path: "/api/Auth/validate-reset-token".to_string(),
            change_password_path: "/api/Auth/change-password".to_string(),
        },
        storage: StorageConfig {
            backend: StorageBackend::Memory,
            path: PathBuf::from("unused.json"),
            token_key: "cm_x7f2_sess".to_string(),
        },
        token: TokenConfig {
            role_claim: DEFAULT_ROLE_CLAIM.to_string(),
        },
        routes: RoutesConfig {
            home: "/".to_string(),
            auth_entry: "/auth".to_string(),
            login: "/auth/login".to_string(),
            access_denied: "/access-denied".to_string(),
            dashboards: HashMap::from([
                ("admin".to_string(), "/admin/dashboard".to_string()),
                ("manager".to_string(), "/manager/dashboard".to_string()),
                ("waitress".to_string(), "/waitress/dashboard".to_string()),
            ]),
        },
    }
}

/// Signed JWT expiring `exp_offset` seconds from now.
pub fn mint_token(exp_offset: i64, role: Option<&str>) -> String {
    let mut claims = json!({
        "sub": "42",
        "email": "nadia@cavemaster.test",
        "exp": chrono::Utc::now().timestamp() + exp_offset,
    });
    if let Some(role) = role {
        claims[DEFAULT_ROLE_CLAIM] = json!(role);
    }
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"cavemaster-test-secret"),
    )
    .expect("token encodes")
}

pub fn profile_json() -> Value {
    json!({
        "id": 42,
        "firstName": "Nadia",
        "lastName": "Ferri",
        "email": "nadia@cavemaster.test",
        "phoneNumber": "+33 6 12 34 56 78",
        "roles": ["Manager"],
        "isEnabled": true,
        "caveId": 3
    })
}

/// Programmable stand-in for the auth server.
#[derive(Debug)]
pub struct MockState {
    pub login_body: Mutex<Value>,
    pub login_status: Mutex<StatusCode>,
    pub profile_status: Mutex<StatusCode>,
    pub profile_hits: AtomicUsize,
    pub last_authorization: Mutex<Option<String>>,
    pub last_body: Mutex<Option<Value>>,
}

impl MockState {
    pub fn set_login_body(&self, body: Value) {
        *self.login_body.lock().unwrap() = body;
    }

    pub fn set_profile_status(&self, status: StatusCode) {
        *self.profile_status.lock().unwrap() = status;
    }

    pub fn profile_hits(&self) -> usize {
        self.profile_hits.load(Ordering::SeqCst)
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.last_authorization.lock().unwrap().clone()
    }

    pub fn last_body(&self) -> Option<Value> {
        self.last_body.lock().unwrap().clone()
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockServer {
    pub async fn start(token: &str) -> Self {
        let state = Arc::new(MockState {
            login_body: Mutex::new(json!({ "token": token, "message": "ok" })),
            login_status: Mutex::new(StatusCode::OK),
            profile_status: Mutex::new(StatusCode::OK),
            profile_hits: AtomicUsize::new(0),
            last_authorization: Mutex::new(None),
            last_body: Mutex::new(None),
        });

        let app = Router::new()
            .route("/api/Auth/login", post(login))
            .route("/api/Auth/me", get(profile))
            .route("/api/Auth/forgot-password", post(action))
            .route("/api/Auth/reset-password", post(action))
            .route("/api/Auth/validate-reset-token", post(action))
            .route("/api/Auth/change-password", post(change_password))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock server");
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Context over the HTTP API and in-memory storage.
    pub fn context(&self) -> (AuthContext, Arc<MemoryStore>) {
        let storage = Arc::new(MemoryStore::new());
        let config = Arc::new(test_config(&self.base_url()));
        let api = cavemaster_session::session::HttpAuthApi::new(&config.api).expect("api");
        let ctx = AuthContext::with_parts(
            config,
            Arc::clone(&storage) as Arc<dyn KeyValueStore>,
            Arc::new(api),
        );
        (ctx, storage)
    }
}

fn remember_auth(state: &MockState, headers: &HeaderMap) {
    *state.last_authorization.lock().unwrap() = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    *state.last_body.lock().unwrap() = Some(body);
    let status = *state.login_status.lock().unwrap();
    let reply = state.login_body.lock().unwrap().clone();
    (status, Json(reply)).into_response()
}

async fn profile(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.profile_hits.fetch_add(1, Ordering::SeqCst);
    remember_auth(&state, &headers);
    let status = *state.profile_status.lock().unwrap();
    if status.is_success() {
        (status, Json(profile_json())).into_response()
    } else {
        (status, "profile unavailable").into_response()
    }
}

async fn action(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    *state.last_body.lock().unwrap() = Some(body);
    Json(json!({ "success": true, "message": "done" })).into_response()
}

async fn change_password(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    remember_auth(&state, &headers);
    *state.last_body.lock().unwrap() = Some(body);
    if headers.contains_key(AUTHORIZATION) {
        (StatusCode::OK, "Password changed").into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}
