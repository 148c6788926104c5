//! CaveMaster session core
//!
//! Token lifecycle, session state and role-based navigation gating for the
//! CaveMaster admin, manager, waitress and client dashboards.
//!
//! # Architecture
//!
//! - **Token Store**: persists the bearer token and its role, decodes claims
//! - **Session Service**: login/logout, profile caching, role queries
//! - **Request Augmentor**: attaches `Authorization: Bearer` to requests
//! - **Route Guard**: allows, denies or redirects navigation by role
//!
//! Claims are decoded without signature verification. They drive client-side
//! routing only; the auth API authorizes every call on its own.
//!
//! # Modules
//!
//! - [`config`]: layered configuration
//! - [`storage`]: durable key-value storage
//! - [`token`]: [`TokenStore`](token::TokenStore) and claim decoding
//! - [`session`]: [`SessionService`](session::SessionService) and the auth API
//! - [`interceptor`]: bearer token request augmentation
//! - [`guard`]: [`RouteGuard`](guard::RouteGuard)

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod error;
pub mod guard;
pub mod interceptor;
pub mod role;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod token;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::SessionError;
use crate::guard::RouteGuard;
use crate::interceptor::BearerAuth;
use crate::session::{AuthApi, HttpAuthApi, SessionService};
use crate::storage::KeyValueStore;
use crate::token::TokenStore;

/// The session core wired together, handed to whatever needs it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Global configuration.
    pub config: Arc<AppConfig>,
    /// Owner of the stored token.
    pub tokens: TokenStore,
    /// Login/logout and the current user.
    pub session: SessionService,
    /// Navigation gate.
    pub guard: RouteGuard,
    /// Bearer augmentation for outgoing requests.
    pub interceptor: BearerAuth,
}

impl AuthContext {
    /// Build storage and the HTTP auth API from configuration.
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, SessionError> {
        let storage = storage::from_config(&config.storage)?;
        let api: Arc<dyn AuthApi> = Arc::new(HttpAuthApi::new(&config.api)?);
        Ok(Self::with_parts(config, storage, api))
    }

    /// Wire the components over explicit storage and API.
    pub fn with_parts(
        config: Arc<AppConfig>,
        storage: Arc<dyn KeyValueStore>,
        api: Arc<dyn AuthApi>,
    ) -> Self {
        let tokens = TokenStore::new(Arc::clone(&storage), config.storage.token_key.clone());
        let session = SessionService::new(
            api,
            tokens.clone(),
            storage,
            config.token.role_claim.clone(),
        );
        let guard = RouteGuard::new(session.clone(), Arc::new(config.routes.clone()));
        let interceptor = BearerAuth::from_store(tokens.clone());

        Self {
            config,
            tokens,
            session,
            guard,
            interceptor,
        }
    }
}
