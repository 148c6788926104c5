use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::claims::TokenClaims;
use crate::error::{StorageError, TokenError};
use crate::guard::RouteTarget;
use crate::storage::KeyValueStore;

/// The composite record kept under the token key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenRecord {
    token: String,
    #[serde(default)]
    role: Option<String>,
}

/// Sole owner of the persisted bearer token and its role.
///
/// No other component reads or writes the token record. Clearing operations
/// return the route the caller should navigate to instead of navigating.
#[derive(Debug, Clone)]
pub struct TokenStore {
    storage: Arc<dyn KeyValueStore>,
    key: String,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// Persist `{token, role}` as one record. The token format is not checked.
    pub fn save_token(&self, token: &str, role: Option<&str>) -> Result<(), StorageError> {
        let record = TokenRecord {
            token: token.to_string(),
            role: role.map(str::to_string),
        };
        self.storage.set(&self.key, &serde_json::to_string(&record)?)?;
        debug!(name: "token.saved", role = ?role, "Token record saved");
        Ok(())
    }

    /// `true` iff a record exists. Expiry is not checked.
    pub fn is_logged(&self) -> Result<bool, StorageError> {
        Ok(self.storage.get(&self.key)?.is_some())
    }

    pub fn get_token(&self) -> Result<Option<String>, StorageError> {
        Ok(self.record()?.map(|r| r.token))
    }

    /// Role saved alongside the token, if any.
    pub fn stored_role(&self) -> Result<Option<String>, StorageError> {
        Ok(self.record()?.and_then(|r| r.role))
    }

    /// Claims of the stored token, `None` when no token is stored.
    pub fn get_payload(&self) -> Result<Option<TokenClaims>, TokenError> {
        match self.get_token()? {
            Some(token) => Ok(Some(TokenClaims::decode(&token)?)),
            None => Ok(None),
        }
    }

    /// `true` when no token is stored or its `exp` is in the past.
    pub fn is_token_expired(&self) -> Result<bool, TokenError> {
        self.is_token_expired_at(Utc::now().timestamp())
    }

    pub fn is_token_expired_at(&self, now: i64) -> Result<bool, TokenError> {
        match self.get_payload()? {
            Some(claims) => claims.is_expired_at(now),
            None => Ok(true),
        }
    }

    /// Time left before the stored token expires.
    ///
    /// `None` when no token is stored or it has already expired.
    pub fn expires_in(&self) -> Result<Option<Duration>, TokenError> {
        let Some(claims) = self.get_payload()? else {
            return Ok(None);
        };
        // Untrusted `exp`; an out-of-range difference reads as expired
        let Some(remaining) = claims.expires_at()?.checked_sub(Utc::now().timestamp()) else {
            return Ok(None);
        };
        Ok(u64::try_from(remaining)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs))
    }

    /// Delete the record; the caller should navigate home.
    pub fn clear_token(&self) -> Result<RouteTarget, StorageError> {
        self.storage.remove(&self.key)?;
        debug!(name: "token.cleared", "Token record cleared");
        Ok(RouteTarget::Home)
    }

    /// Delete an expired record; the caller should navigate to the auth entry.
    pub fn clear_token_expired(&self) -> Result<RouteTarget, StorageError> {
        self.storage.remove(&self.key)?;
        debug!(name: "token.expired_cleared", "Expired token record cleared");
        Ok(RouteTarget::AuthEntry)
    }

    fn record(&self) -> Result<Option<TokenRecord>, StorageError> {
        let Some(raw) = self.storage.get(&self.key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(name: "token.record_unreadable", error = %e, "Ignoring unreadable token record");
                Ok(None)
            }
        }
    }
}
