//! Error types for the session core.

use thiserror::Error;

/// Failure of the backing key-value store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not a JSON object of strings.
    #[error("storage is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Failure to read claims out of the stored token.
#[derive(Error, Debug)]
pub enum TokenError {
    /// The token is not `header.claims.signature`.
    #[error("token is not a three-segment JWT")]
    Malformed,

    /// The claims segment is not valid base64url.
    #[error("claims segment is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The claims segment is not a JSON object.
    #[error("claims segment is not JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The claims carry no `exp`.
    #[error("token carries no expiry claim")]
    MissingExpiry,

    /// The token record could not be read.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failure talking to the auth API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport-level failure (connect, timeout, body decode).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint URL could not be built from the configured base.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The API answered 401: token invalid or expired.
    #[error("unauthorized")]
    Unauthorized,

    /// Any other non-success status.
    #[error("API error ({status}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Body returned by the API.
        message: String,
    },
}

/// Failure of a profile operation on the session service.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cached profile could not be serialized: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for session operations.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;
