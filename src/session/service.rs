//! Login, logout, profile caching and role queries.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::api::{
    ActionResponse, AuthApi, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
    ResetPasswordRequest, ValidateResetTokenRequest,
};
use super::profile::UserProfile;
use crate::error::{ApiError, Result, SessionError};
use crate::guard::RouteTarget;
use crate::role::Role;
use crate::storage::{KeyValueStore, PROFILE_KEY, USER_ROLE_KEY};
use crate::token::{TokenClaims, TokenStore};

/// Shared handle to the current user. `None` means signed out.
pub type CurrentUser = Option<Arc<UserProfile>>;

/// Result of [`SessionService::login`].
#[derive(Debug)]
pub enum LoginOutcome {
    /// A token was issued and persisted; the profile is loading.
    Authenticated {
        role: Option<Role>,
        profile: ProfileTask,
    },
    /// The API answered without a token.
    Rejected { message: Option<String> },
    /// The API could not be reached or answered with an error.
    Failed { reason: String },
}

impl LoginOutcome {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Background profile fetch started by a successful login.
#[derive(Debug)]
pub struct ProfileTask {
    handle: JoinHandle<CurrentUser>,
}

impl ProfileTask {
    /// Wait for the fetch. `None` if it failed or the session ended first.
    pub async fn wait(self) -> CurrentUser {
        match self.handle.await {
            Ok(profile) => profile,
            Err(e) => {
                error!(name: "session.profile.task_failed", error = %e, "Profile task did not complete");
                None
            }
        }
    }
}

/// Orchestrates the session on top of [`TokenStore`].
///
/// The current user is held in a `watch` channel: every write replaces the
/// whole value and is seen by all subscribers. Writes are serialized by the
/// session generation lock. Login and logout each start a new generation,
/// and a profile fetch only lands if its generation is still current.
#[derive(Debug, Clone)]
pub struct SessionService {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    api: Arc<dyn AuthApi>,
    tokens: TokenStore,
    storage: Arc<dyn KeyValueStore>,
    role_claim: String,
    current: watch::Sender<CurrentUser>,
    generation: Mutex<u64>,
}

impl SessionService {
    pub fn new(
        api: Arc<dyn AuthApi>,
        tokens: TokenStore,
        storage: Arc<dyn KeyValueStore>,
        role_claim: impl Into<String>,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            inner: Arc::new(SessionInner {
                api,
                tokens,
                storage,
                role_claim: role_claim.into(),
                current,
                generation: Mutex::new(0),
            }),
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    /// Stream of current-user changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CurrentUser> {
        self.inner.current.subscribe()
    }

    /// Snapshot of the in-memory current user.
    ///
    /// `None` whenever the token store holds no token, even if the token was
    /// cleared through [`TokenStore`] directly. In that case the holder is
    /// reset and subscribers see `None` too.
    pub fn current_user(&self) -> CurrentUser {
        let user = self.inner.current.borrow().clone();
        if user.is_none() {
            return None;
        }
        match self.inner.tokens.is_logged() {
            Ok(true) => user,
            Ok(false) => self.drop_orphaned_user(),
            Err(e) => {
                error!(name: "session.auth.storage_failed", error = %e, "Token storage unavailable");
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Login / logout
    // ─────────────────────────────────────────────────────────────────────────

    /// Send credentials; on success persist the token and start loading the
    /// profile in the background. Never fails: errors degrade to
    /// [`LoginOutcome::Failed`].
    pub async fn login(&self, email: &str, password: &str) -> LoginOutcome {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };

        let response = match self.inner.api.login(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(name: "session.login.failed", error = %e, "Login request failed");
                return LoginOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let Some(token) = response.token.filter(|t| !t.is_empty()) else {
            info!(name: "session.login.rejected", "Login answered without a token");
            return LoginOutcome::Rejected {
                message: response.message,
            };
        };

        let role = TokenClaims::decode(&token)
            .ok()
            .and_then(|claims| claims.role(&self.inner.role_claim))
            .or_else(|| response.role.as_deref().map(Role::from));

        let generation = {
            let mut current = self.lock_generation();
            *current = current.wrapping_add(1);

            let persisted = self
                .inner
                .tokens
                .save_token(&token, role.as_ref().map(Role::as_str))
                .and_then(|()| match &role {
                    Some(role) => self.inner.storage.set(USER_ROLE_KEY, role.as_str()),
                    None => self.inner.storage.remove(USER_ROLE_KEY),
                })
                .and_then(|()| self.inner.storage.remove(PROFILE_KEY));
            if let Err(e) = persisted {
                error!(name: "session.login.persist_failed", error = %e, "Could not persist session");
                self.clear_session(&mut current, SessionEnd::Logout);
                return LoginOutcome::Failed {
                    reason: e.to_string(),
                };
            }
            self.inner.current.send_replace(None);
            *current
        };

        info!(name: "session.login.succeeded", role = ?role, "Logged in");

        let this = self.clone();
        let handle = tokio::spawn(async move {
            match this.fetch_profile(generation).await {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(name: "session.profile.initial_fetch_failed", error = %e, "Profile not loaded after login");
                    None
                }
            }
        });

        LoginOutcome::Authenticated {
            role,
            profile: ProfileTask { handle },
        }
    }

    /// Clear token, role and cached profile, and reset the current user.
    ///
    /// Idempotent. Any profile fetch still in flight is invalidated. Returns
    /// the route the caller should navigate to.
    pub fn logout(&self) -> RouteTarget {
        let mut current = self.lock_generation();
        self.clear_session(&mut current, SessionEnd::Logout)
    }

    /// Like [`logout`](Self::logout) for a session whose token has expired.
    ///
    /// Returns [`RouteTarget::AuthEntry`].
    pub fn logout_expired(&self) -> RouteTarget {
        let mut current = self.lock_generation();
        self.clear_session(&mut current, SessionEnd::Expired)
    }

    /// Caller holds the generation lock.
    fn clear_session(&self, generation: &mut u64, end: SessionEnd) -> RouteTarget {
        *generation = generation.wrapping_add(1);

        let cleared = match end {
            SessionEnd::Logout => self.inner.tokens.clear_token(),
            SessionEnd::Expired => self.inner.tokens.clear_token_expired(),
        };
        let target = match cleared {
            Ok(target) => target,
            Err(e) => {
                error!(name: "session.logout.token_clear_failed", error = %e, "Could not clear token");
                end.fallback_target()
            }
        };
        for key in [USER_ROLE_KEY, PROFILE_KEY] {
            if let Err(e) = self.inner.storage.remove(key) {
                error!(name: "session.logout.clear_failed", key, error = %e, "Could not clear record");
            }
        }

        if self.inner.current.send_if_modified(|user| user.take().is_some()) {
            info!(name: "session.logout", "Logged out");
        }
        target
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Profile
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch the profile from the API and cache it.
    ///
    /// No token: the current user becomes `None`. A 401 logs out. Any other
    /// failure is returned and leaves both the in-memory holder and the
    /// durable cache as they were.
    pub async fn get_current_user_profile(&self) -> Result<CurrentUser> {
        let generation = *self.lock_generation();
        self.fetch_profile(generation).await
    }

    /// Memory first, then the durable cache, then the API.
    ///
    /// `force_refresh` skips both caches. An unreadable cache entry is
    /// removed before falling through to the API.
    pub async fn load_current_user_profile(&self, force_refresh: bool) -> Result<CurrentUser> {
        if !self.inner.tokens.is_logged()? {
            self.reset_current_user();
            return Ok(None);
        }

        if !force_refresh {
            if let Some(profile) = self.current_user() {
                return Ok(Some(profile));
            }

            if let Some(raw) = self.inner.storage.get(PROFILE_KEY)? {
                match serde_json::from_str::<UserProfile>(&raw) {
                    Ok(profile) => {
                        let profile = Arc::new(profile);
                        let _guard = self.lock_generation();
                        if !self.inner.tokens.is_logged()? {
                            return Ok(None);
                        }
                        self.inner.current.send_replace(Some(Arc::clone(&profile)));
                        debug!(name: "session.profile.cache_hit", "Profile restored from cache");
                        return Ok(Some(profile));
                    }
                    Err(e) => {
                        warn!(name: "session.profile.cache_corrupt", error = %e, "Dropping unreadable cached profile");
                        self.inner.storage.remove(PROFILE_KEY)?;
                    }
                }
            }
        }

        self.get_current_user_profile().await
    }

    async fn fetch_profile(&self, generation: u64) -> Result<CurrentUser> {
        let Some(token) = self.inner.tokens.get_token()? else {
            self.reset_current_user();
            return Ok(None);
        };

        match self.inner.api.current_profile(&token).await {
            Ok(profile) => {
                let profile = Arc::new(profile);
                let raw = serde_json::to_string(profile.as_ref())?;

                let current = self.lock_generation();
                if *current != generation {
                    debug!(name: "session.profile.stale", "Discarding profile for an ended session");
                    return Ok(None);
                }
                self.inner.storage.set(PROFILE_KEY, &raw)?;
                self.inner.current.send_replace(Some(Arc::clone(&profile)));
                drop(current);

                debug!(name: "session.profile.loaded", user_id = %profile.id, "Profile loaded");
                Ok(Some(profile))
            }
            Err(ApiError::Unauthorized) => {
                let mut current = self.lock_generation();
                if *current == generation {
                    warn!(name: "session.profile.unauthorized", "Token rejected, logging out");
                    self.clear_session(&mut current, SessionEnd::Logout);
                }
                Ok(None)
            }
            Err(e) => {
                warn!(name: "session.profile.fetch_failed", error = %e, "Profile fetch failed");
                Err(SessionError::Api(e))
            }
        }
    }

    /// Reset the holder if the token is still absent once the lock is held.
    fn drop_orphaned_user(&self) -> CurrentUser {
        let _guard = self.lock_generation();
        if let Ok(true) = self.inner.tokens.is_logged() {
            return self.inner.current.borrow().clone();
        }
        if self.inner.current.send_if_modified(|user| user.take().is_some()) {
            debug!(name: "session.profile.orphaned", "Token gone, dropping current user");
        }
        if let Err(e) = self.inner.storage.remove(PROFILE_KEY) {
            warn!(name: "session.profile.clear_failed", error = %e, "Could not clear cached profile");
        }
        None
    }

    fn reset_current_user(&self) {
        let _guard = self.lock_generation();
        self.inner.current.send_if_modified(|user| user.take().is_some());
        if let Err(e) = self.inner.storage.remove(PROFILE_KEY) {
            warn!(name: "session.profile.clear_failed", error = %e, "Could not clear cached profile");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Role of the current session.
    ///
    /// The token's role claim wins; if it cannot be decoded, fall back to
    /// the cached role string, then to the role saved with the token.
    pub fn get_user_role(&self) -> Option<Role> {
        match self.inner.tokens.get_payload() {
            Ok(Some(claims)) => {
                if let Some(role) = claims.role(&self.inner.role_claim) {
                    return Some(role);
                }
            }
            Ok(None) => return None,
            Err(e) => {
                debug!(name: "session.role.decode_failed", error = %e, "Falling back to cached role");
            }
        }

        let cached = self
            .inner
            .storage
            .get(USER_ROLE_KEY)
            .ok()
            .flatten()
            .or_else(|| self.inner.tokens.stored_role().ok().flatten());

        cached
            .filter(|role| !role.trim().is_empty())
            .map(|role| Role::from(role.as_str()))
    }

    /// `true` for a present, decodable, unexpired token.
    ///
    /// Expired or undecodable tokens log out as a side effect.
    pub fn is_authenticated(&self) -> bool {
        match self.inner.tokens.get_token() {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.drop_orphaned_user();
                return false;
            }
            Err(e) => {
                error!(name: "session.auth.storage_failed", error = %e, "Token storage unavailable");
                return false;
            }
        }

        match self.inner.tokens.is_token_expired() {
            Ok(false) => true,
            Ok(true) => {
                info!(name: "session.auth.expired", "Token expired, logging out");
                let target = self.logout_expired();
                debug!(name: "session.auth.redirect", ?target, "Session expired");
                false
            }
            Err(e) => {
                warn!(name: "session.auth.invalid_token", error = %e, "Token unreadable, logging out");
                self.logout();
                false
            }
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.get_user_role().is_some_and(|current| &current == role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        self.get_user_role()
            .is_some_and(|current| roles.contains(&current))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Password flows
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn forgot_password(&self, email: &str) -> ActionResponse {
        let request = ForgotPasswordRequest {
            email: email.to_string(),
        };
        degrade(
            "forgot_password",
            self.inner.api.forgot_password(&request).await,
        )
    }

    /// `token` may arrive URL-encoded from the reset link.
    pub async fn reset_password(
        &self,
        email: &str,
        token: &str,
        new_password: &str,
    ) -> ActionResponse {
        let request = ResetPasswordRequest {
            email: email.to_string(),
            token: decode_reset_token(token),
            new_password: new_password.to_string(),
        };
        degrade(
            "reset_password",
            self.inner.api.reset_password(&request).await,
        )
    }

    pub async fn validate_reset_token(&self, email: &str, token: &str) -> ActionResponse {
        let request = ValidateResetTokenRequest {
            email: email.to_string(),
            token: decode_reset_token(token),
        };
        degrade(
            "validate_reset_token",
            self.inner.api.validate_reset_token(&request).await,
        )
    }

    /// Requires a session; answers with a failure when signed out.
    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> ActionResponse {
        let token = match self.inner.tokens.get_token() {
            Ok(Some(token)) => token,
            Ok(None) => return ActionResponse::failure("Not logged in"),
            Err(e) => return ActionResponse::failure(e.to_string()),
        };
        let request = ChangePasswordRequest {
            current_password: current_password.to_string(),
            new_password: new_password.to_string(),
        };
        degrade(
            "change_password",
            self.inner.api.change_password(&token, &request).await,
        )
    }

    fn lock_generation(&self) -> std::sync::MutexGuard<'_, u64> {
        self.inner
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy)]
enum SessionEnd {
    Logout,
    Expired,
}

impl SessionEnd {
    fn fallback_target(self) -> RouteTarget {
        match self {
            Self::Logout => RouteTarget::Home,
            Self::Expired => RouteTarget::AuthEntry,
        }
    }
}

fn decode_reset_token(token: &str) -> String {
    match urlencoding::decode(token) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            debug!(error = %e, "Reset token is not percent-encoded UTF-8, sending as is");
            token.to_string()
        }
    }
}

fn degrade(
    operation: &'static str,
    result: std::result::Result<ActionResponse, ApiError>,
) -> ActionResponse {
    match result {
        Ok(response) => response,
        Err(e) => {
            warn!(name: "session.password.failed", operation, error = %e, "Password request failed");
            ActionResponse::failure(e.to_string())
        }
    }
}
