//! Identity provider contract.
//!
//! The coordinator only needs a handful of operations from the hosted auth
//! service: exchange credentials or a one-time code for tokens, re-read the
//! current session, sign out, change the password, and announce session
//! changes that happen outside of those calls. `HostedIdentityClient` is the
//! HTTP implementation; tests use the generated `MockIdentityProvider` or the
//! fakes in `test_support`.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::UserId;

pub use http::HostedIdentityClient;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Tokens issued by the identity provider for one authenticated account.
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user_id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

impl AuthTokens {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokens")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutScope {
    /// Only the session held by this client.
    Local,
    /// Every session of the account, on every device.
    Global,
}

impl SignOutScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignOutScope::Local => "local",
            SignOutScope::Global => "global",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Session changes announced by the provider.
pub enum AuthEvent {
    SignedIn(UserId),
    TokenRefreshed(UserId),
    SignedOut,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("invalid login credentials")]
    InvalidCredentials,
    #[error("email address not confirmed")]
    EmailNotConfirmed,
    #[error("too many requests")]
    RateLimited,
    #[error("one-time code is invalid or expired")]
    InvalidOtp,
    #[error("session is missing or expired")]
    Unauthorized,
    #[error("identity provider returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("identity provider unreachable: {0}")]
    Transport(String),
    #[error("failed to decode identity provider response: {0}")]
    Decode(String),
}

/// Contract required from the hosted identity service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange email + password for tokens.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthTokens, ProviderError>;

    /// Deliver a one-time code to an existing account. Never creates accounts.
    async fn send_otp(&self, email: &str) -> Result<(), ProviderError>;

    /// Exchange a one-time code for tokens.
    async fn verify_otp(&self, email: &str, code: &str) -> Result<AuthTokens, ProviderError>;

    /// Re-read the provider session, refreshing the access token when needed.
    /// `Ok(None)` means there is no usable remote session.
    async fn current_session(&self) -> Result<Option<AuthTokens>, ProviderError>;

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), ProviderError>;

    async fn update_password(&self, new_password: &str) -> Result<(), ProviderError>;

    /// Subscribe to session changes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
