use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;

use super::{AuthEvent, AuthTokens, IdentityProvider, ProviderError, SignOutScope};
use crate::{config::ClientConfig, storage::TokenStore, types::UserId};

/// Access tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 30;
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// GoTrue-style REST client for the hosted auth service.
///
/// Tokens live in memory; with a [`TokenStore`] attached they are also
/// written through, and `current_session` picks them up again after a
/// restart.
pub struct HostedIdentityClient {
    http: Client,
    base_url: String,
    api_key: String,
    tokens: RwLock<Option<AuthTokens>>,
    token_store: Option<Arc<dyn TokenStore>>,
    events: broadcast::Sender<AuthEvent>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: UserId,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl TokenResponse {
    fn into_tokens(self) -> AuthTokens {
        let now = Utc::now();
        let expires_at = self
            .expires_at
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .or_else(|| self.expires_in.map(|secs| now + Duration::seconds(secs)))
            .unwrap_or(now + Duration::hours(1));
        AuthTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user_id: self.user.id,
            email: self.user.email,
        }
    }
}

impl HostedIdentityClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            tokens: RwLock::new(None),
            token_store: None,
            events,
        }
    }

    pub fn with_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.backend_url.clone(), config.api_key.clone())
    }

    /// Access token of the current provider session, if any.
    pub fn access_token(&self) -> Option<String> {
        self.cached_tokens().map(|t| t.access_token)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.base_url, path)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("apikey", &self.api_key)
    }

    fn authorized(&self, builder: RequestBuilder, access_token: &str) -> RequestBuilder {
        self.request(builder).bearer_auth(access_token)
    }

    fn store(&self, tokens: AuthTokens, event: AuthEvent) -> AuthTokens {
        *self.tokens.write() = Some(tokens.clone());
        if let Some(store) = &self.token_store {
            if let Err(err) = store.save(&tokens) {
                tracing::warn!(error = %err, "failed to persist provider tokens");
            }
        }
        let _ = self.events.send(event);
        tokens
    }

    fn clear(&self) {
        self.tokens.write().take();
        if let Some(store) = &self.token_store {
            if let Err(err) = store.clear() {
                tracing::warn!(error = %err, "failed to remove persisted provider tokens");
            }
        }
    }

    /// In-memory tokens, falling back to the ones a previous run left behind.
    fn cached_tokens(&self) -> Option<AuthTokens> {
        if let Some(tokens) = self.tokens.read().clone() {
            return Some(tokens);
        }
        let store = self.token_store.as_ref()?;
        match store.load() {
            Ok(Some(tokens)) => {
                tracing::debug!(user_id = %tokens.user_id, "rehydrated persisted provider tokens");
                *self.tokens.write() = Some(tokens.clone());
                Some(tokens)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable provider tokens");
                self.clear();
                None
            }
        }
    }

    async fn send(builder: RequestBuilder) -> Result<Response, ProviderError> {
        builder
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    async fn error_from(response: Response) -> ProviderError {
        let status = response.status();
        let body: ErrorBody = response.json().await.unwrap_or_default();
        map_error(status, body)
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<AuthTokens, ProviderError> {
        let builder = self
            .http
            .post(self.endpoint("/token"))
            .query(&[("grant_type", grant_type)])
            .json(&body);
        let response = Self::send(self.request(builder)).await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(token_response.into_tokens())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, ProviderError> {
        let tokens = self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;
        let user_id = tokens.user_id;
        Ok(self.store(tokens, AuthEvent::TokenRefreshed(user_id)))
    }
}

fn map_error(status: StatusCode, body: ErrorBody) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimited;
    }
    let code = body
        .error_code
        .or(body.error)
        .unwrap_or_default()
        .to_ascii_lowercase();
    let message = body
        .msg
        .or(body.error_description)
        .or(body.message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        });
    let lower = message.to_ascii_lowercase();

    if code.starts_with("over_") && code.ends_with("rate_limit") {
        ProviderError::RateLimited
    } else if code == "email_not_confirmed" || lower.contains("email not confirmed") {
        ProviderError::EmailNotConfirmed
    } else if code == "otp_expired" || lower.contains("token has expired or is invalid") {
        ProviderError::InvalidOtp
    } else if code == "invalid_credentials" || lower.contains("invalid login credentials") {
        ProviderError::InvalidCredentials
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ProviderError::Unauthorized
    } else {
        ProviderError::Http {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl IdentityProvider for HostedIdentityClient {
    #[tracing::instrument(name = "identity.sign_in_with_password", skip_all)]
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthTokens, ProviderError> {
        let tokens = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;
        let user_id = tokens.user_id;
        tracing::debug!(%user_id, "password grant succeeded");
        Ok(self.store(tokens, AuthEvent::SignedIn(user_id)))
    }

    #[tracing::instrument(name = "identity.send_otp", skip_all)]
    async fn send_otp(&self, email: &str) -> Result<(), ProviderError> {
        let builder = self
            .http
            .post(self.endpoint("/otp"))
            .json(&json!({ "email": email, "create_user": false }));
        let response = Self::send(self.request(builder)).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    #[tracing::instrument(name = "identity.verify_otp", skip_all)]
    async fn verify_otp(&self, email: &str, code: &str) -> Result<AuthTokens, ProviderError> {
        let builder = self
            .http
            .post(self.endpoint("/verify"))
            .json(&json!({ "type": "email", "email": email, "token": code }));
        let response = Self::send(self.request(builder)).await?;
        if !response.status().is_success() {
            return Err(match Self::error_from(response).await {
                ProviderError::Unauthorized => ProviderError::InvalidOtp,
                other => other,
            });
        }
        let tokens = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?
            .into_tokens();
        let user_id = tokens.user_id;
        Ok(self.store(tokens, AuthEvent::SignedIn(user_id)))
    }

    #[tracing::instrument(name = "identity.current_session", skip_all)]
    async fn current_session(&self) -> Result<Option<AuthTokens>, ProviderError> {
        let Some(mut tokens) = self.cached_tokens() else {
            return Ok(None);
        };

        if tokens.is_expired(Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS)) {
            tokens = match self.refresh(&tokens.refresh_token).await {
                Ok(fresh) => fresh,
                Err(ProviderError::Transport(msg)) => return Err(ProviderError::Transport(msg)),
                Err(err) => {
                    tracing::debug!(error = %err, "refresh token rejected");
                    self.clear();
                    return Ok(None);
                }
            };
        }

        let builder = self.http.get(self.endpoint("/user"));
        let response = Self::send(self.authorized(builder, &tokens.access_token)).await?;
        match response.status() {
            status if status.is_success() => Ok(Some(tokens)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                self.clear();
                Ok(None)
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    #[tracing::instrument(name = "identity.sign_out", skip(self))]
    async fn sign_out(&self, scope: SignOutScope) -> Result<(), ProviderError> {
        let token = self.access_token();
        self.clear();
        let _ = self.events.send(AuthEvent::SignedOut);

        let Some(token) = token else {
            return Ok(());
        };
        let builder = self
            .http
            .post(self.endpoint("/logout"))
            .query(&[("scope", scope.as_str())]);
        let response = Self::send(self.authorized(builder, &token)).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            // Session already gone on the provider side.
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::error_from(response).await),
        }
    }

    #[tracing::instrument(name = "identity.update_password", skip_all)]
    async fn update_password(&self, new_password: &str) -> Result<(), ProviderError> {
        let token = self.access_token().ok_or(ProviderError::Unauthorized)?;
        let builder = self
            .http
            .put(self.endpoint("/user"))
            .json(&json!({ "password": new_password }));
        let response = Self::send(self.authorized(builder, &token)).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
