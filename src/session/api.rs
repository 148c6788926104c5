//! The remote auth API.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use super::profile::UserProfile;
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::interceptor::BearerAuth;

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of a login answer. Only `token` matters to the session core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: String,
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateResetTokenRequest {
    pub email: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Success/failure shaped answer of the password endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(default = "succeeded")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl ActionResponse {
    pub fn ok(message: Option<String>) -> Self {
        Self {
            success: true,
            message,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

fn succeeded() -> bool {
    true
}

/// Endpoints of the auth server used by the session core.
#[async_trait]
pub trait AuthApi: Send + Sync + std::fmt::Debug {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError>;

    /// Profile of the bearer of `token`. A 401 maps to [`ApiError::Unauthorized`].
    async fn current_profile(&self, token: &str) -> Result<UserProfile, ApiError>;

    async fn forgot_password(
        &self,
        request: &ForgotPasswordRequest,
    ) -> Result<ActionResponse, ApiError>;

    async fn reset_password(
        &self,
        request: &ResetPasswordRequest,
    ) -> Result<ActionResponse, ApiError>;

    async fn validate_reset_token(
        &self,
        request: &ValidateResetTokenRequest,
    ) -> Result<ActionResponse, ApiError>;

    async fn change_password(
        &self,
        token: &str,
        request: &ChangePasswordRequest,
    ) -> Result<ActionResponse, ApiError>;
}

/// [`AuthApi`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    base_url: Url,
    paths: ApiConfig,
    http: reqwest::Client,
}

impl HttpAuthApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Self::with_client(config, http)
    }

    /// Create the API with a custom reqwest client.
    pub fn with_client(config: &ApiConfig, http: reqwest::Client) -> Result<Self, ApiError> {
        Ok(Self {
            base_url: Url::parse(&config.base_url)?,
            paths: config.clone(),
            http,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn post<B, T>(&self, path: &str, body: &B, auth: Option<BearerAuth>) -> Result<T, ApiError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(self.url(path)?).json(body).build()?;
        if let Some(auth) = auth {
            request = auth.apply(request);
        }
        let response = self.http.execute(request).await?;
        Self::handle_response(response).await
    }

    async fn post_action<B>(
        &self,
        path: &str,
        body: &B,
        auth: Option<BearerAuth>,
    ) -> Result<ActionResponse, ApiError>
    where
        B: Serialize + Sync,
    {
        let mut request = self.http.post(self.url(path)?).json(body).build()?;
        if let Some(auth) = auth {
            request = auth.apply(request);
        }
        let response = self.http.execute(request).await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: text,
            });
        }
        // Endpoints answer with JSON, plain text or nothing at all.
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| {
            ActionResponse::ok(Some(text).filter(|t| !t.trim().is_empty()))
        }))
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else if status == reqwest::StatusCode::UNAUTHORIZED {
            Err(ApiError::Unauthorized)
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            Err(ApiError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        self.post(&self.paths.login_path, request, None).await
    }

    async fn current_profile(&self, token: &str) -> Result<UserProfile, ApiError> {
        let request = self.http.get(self.url(&self.paths.profile_path)?).build()?;
        let request = BearerAuth::fixed(token).apply(request);
        let response = self.http.execute(request).await?;
        Self::handle_response(response).await
    }

    async fn forgot_password(
        &self,
        request: &ForgotPasswordRequest,
    ) -> Result<ActionResponse, ApiError> {
        self.post_action(&self.paths.forgot_password_path, request, None)
            .await
    }

    async fn reset_password(
        &self,
        request: &ResetPasswordRequest,
    ) -> Result<ActionResponse, ApiError> {
        self.post_action(&self.paths.reset_password_path, request, None)
            .await
    }

    async fn validate_reset_token(
        &self,
        request: &ValidateResetTokenRequest,
    ) -> Result<ActionResponse, ApiError> {
        self.post_action(&self.paths.validate_reset_token_path, request, None)
            .await
    }

    async fn change_password(
        &self,
        token: &str,
        request: &ChangePasswordRequest,
    ) -> Result<ActionResponse, ApiError> {
        self.post_action(
            &self.paths.change_password_path,
            request,
            Some(BearerAuth::fixed(token)),
        )
        .await
    }
}
