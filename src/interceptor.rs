//! Bearer token request augmentation.
//!
//! [`BearerAuth`] adds `Authorization: Bearer <token>` to an outgoing
//! request when a token is available and passes it on otherwise. It takes
//! the request by value and hands back the augmented one, so callers never
//! see a request change underneath them. Nothing here awaits.

use std::task::{Context, Poll};

use http::HeaderValue;
use http::header::AUTHORIZATION;
use tower::{Layer, Service};
use tracing::warn;

use crate::token::TokenStore;

#[derive(Debug, Clone)]
enum TokenSource {
    /// Read the stored token on every request.
    Store(TokenStore),
    /// One known token.
    Fixed(String),
}

/// Attaches the bearer token to requests.
#[derive(Debug, Clone)]
pub struct BearerAuth {
    source: TokenSource,
}

impl BearerAuth {
    /// Use whatever token the store holds at request time.
    pub fn from_store(tokens: TokenStore) -> Self {
        Self {
            source: TokenSource::Store(tokens),
        }
    }

    /// Always use `token`.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Fixed(token.into()),
        }
    }

    /// `Bearer <token>` header value, `None` when there is no usable token.
    pub fn header_value(&self) -> Option<HeaderValue> {
        let token = match &self.source {
            TokenSource::Fixed(token) => token.clone(),
            TokenSource::Store(tokens) => match tokens.get_token() {
                Ok(Some(token)) => token,
                Ok(None) => return None,
                Err(e) => {
                    warn!(name: "interceptor.token_unavailable", error = %e, "Sending request without bearer token");
                    return None;
                }
            },
        };

        if token.is_empty() {
            return None;
        }

        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                Some(value)
            }
            Err(e) => {
                warn!(name: "interceptor.token_invalid", error = %e, "Token is not a valid header value");
                None
            }
        }
    }

    /// Augment a `reqwest` request.
    pub fn apply(&self, mut request: reqwest::Request) -> reqwest::Request {
        if let Some(value) = self.header_value() {
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        request
    }

    /// Augment an `http` request.
    pub fn apply_http<B>(&self, mut request: http::Request<B>) -> http::Request<B> {
        if let Some(value) = self.header_value() {
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        request
    }

    /// Tower layer running [`apply_http`](Self::apply_http) on every request.
    pub fn layer(&self) -> BearerAuthLayer {
        BearerAuthLayer { auth: self.clone() }
    }
}

/// Tower layer for bearer token augmentation.
#[derive(Debug, Clone)]
pub struct BearerAuthLayer {
    auth: BearerAuth,
}

impl BearerAuthLayer {
    pub fn new(auth: BearerAuth) -> Self {
        Self { auth }
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            auth: self.auth.clone(),
        }
    }
}

/// The wrapped service.
#[derive(Debug, Clone)]
pub struct BearerAuthService<S> {
    inner: S,
    auth: BearerAuth,
}

impl<S, B> Service<http::Request<B>> for BearerAuthService<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        self.inner.call(self.auth.apply_http(req))
    }
}
