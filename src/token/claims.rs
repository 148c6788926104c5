use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TokenError;
use crate::role::Role;

/// Claims carried in the middle segment of a JWT.
///
/// Decoding does **not** verify the signature. The result is advisory and
/// only drives client-side routing; the auth API re-checks every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Expiry, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Every other claim, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenClaims {
    /// Decode the claims segment of `header.claims.signature`.
    pub fn decode(token: &str) -> Result<Self, TokenError> {
        let mut segments = token.split('.');
        let (Some(_header), Some(claims), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::Malformed);
        };

        // Tolerate padded and standard-alphabet encoders.
        let normalized: String = claims
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect();

        let bytes = URL_SAFE_NO_PAD.decode(normalized.as_bytes())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Expiry timestamp, or [`TokenError::MissingExpiry`].
    pub fn expires_at(&self) -> Result<i64, TokenError> {
        self.exp.ok_or(TokenError::MissingExpiry)
    }

    /// `true` once `exp` lies strictly before `now` (epoch seconds).
    pub fn is_expired_at(&self, now: i64) -> Result<bool, TokenError> {
        Ok(self.expires_at()? < now)
    }

    /// Role found under `claim`. Array-valued claims yield their first entry.
    #[must_use]
    pub fn role(&self, claim: &str) -> Option<Role> {
        match self.extra.get(claim)? {
            Value::String(s) if !s.trim().is_empty() => Some(Role::from(s.as_str())),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .find(|s| !s.trim().is_empty())
                .map(Role::from),
            _ => None,
        }
    }
}
