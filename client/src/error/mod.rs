use thiserror::Error;

use crate::{
    directory::DirectoryError, identity::ProviderError, models::UserRole, storage::StorageError,
    types::OrganizationId,
};

/// Coarse classification used by callers to decide how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Backend missing, unreachable or misbehaving.
    Configuration,
    /// The caller supplied something unusable.
    Input,
    /// The identity provider refused the credentials.
    Authentication,
    /// Authenticated, but not allowed in.
    Authorization,
    /// Backing data is missing or unreadable.
    Data,
    /// Superseded by a newer attempt or a logout.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),
    #[error("organization {0} does not exist")]
    InvalidOrganization(OrganizationId),
    #[error("invalid login credentials")]
    InvalidCredentials,
    #[error("email address not confirmed")]
    EmailNotConfirmed,
    #[error("too many attempts")]
    RateLimited,
    #[error("no account for this email in the organization")]
    AccountNotFound,
    #[error("one-time code is invalid or expired")]
    InvalidOtp,
    #[error("user profile not found after {attempts} attempts")]
    ProfileNotFound { attempts: u32 },
    #[error("user belongs to a different organization")]
    OrganizationMismatch,
    #[error("role {0} cannot sign in to the admin console")]
    InsufficientRole(UserRole),
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("authentication attempt was cancelled")]
    Cancelled,
    #[error(transparent)]
    Provider(ProviderError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Configuration(_) => ErrorKind::Configuration,
            AuthError::Provider(ProviderError::Transport(_))
            | AuthError::Directory(DirectoryError::Transport(_)) => ErrorKind::Configuration,
            AuthError::Validation(_) | AuthError::InvalidOrganization(_) | AuthError::InvalidOtp => {
                ErrorKind::Input
            }
            AuthError::InvalidCredentials
            | AuthError::EmailNotConfirmed
            | AuthError::RateLimited
            | AuthError::AccountNotFound
            | AuthError::NotAuthenticated
            | AuthError::Provider(_) => ErrorKind::Authentication,
            AuthError::OrganizationMismatch | AuthError::InsufficientRole(_) => {
                ErrorKind::Authorization
            }
            AuthError::ProfileNotFound { .. } | AuthError::Directory(_) | AuthError::Storage(_) => {
                ErrorKind::Data
            }
            AuthError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Configuration(_) => "CONFIGURATION_ERROR",
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::InvalidOrganization(_) => "INVALID_ORGANIZATION",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::EmailNotConfirmed => "EMAIL_NOT_CONFIRMED",
            AuthError::RateLimited => "RATE_LIMITED",
            AuthError::AccountNotFound => "ACCOUNT_NOT_FOUND",
            AuthError::InvalidOtp => "INVALID_OTP",
            AuthError::ProfileNotFound { .. } => "PROFILE_NOT_FOUND",
            AuthError::OrganizationMismatch => "ORGANIZATION_MISMATCH",
            AuthError::InsufficientRole(_) => "INSUFFICIENT_ROLE",
            AuthError::NotAuthenticated => "NOT_AUTHENTICATED",
            AuthError::Cancelled => "CANCELLED",
            AuthError::Provider(_) => "PROVIDER_ERROR",
            AuthError::Directory(_) => "DATASTORE_ERROR",
            AuthError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Message shown to the person at the keyboard.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Configuration(_) => {
                "The service is not configured correctly. Please contact your administrator."
                    .into()
            }
            AuthError::Validation(errors) => errors.join("\n"),
            AuthError::InvalidOrganization(_) => {
                "Invalid organization. Please check your login link.".into()
            }
            AuthError::InvalidCredentials => "Invalid email or password.".into(),
            AuthError::EmailNotConfirmed => {
                "Please confirm your email address before signing in.".into()
            }
            AuthError::RateLimited => "Too many attempts. Please wait a moment and try again.".into(),
            AuthError::AccountNotFound => {
                "No account found with this email address in this organization.".into()
            }
            AuthError::InvalidOtp => "The code is invalid or has expired. Request a new one.".into(),
            AuthError::ProfileNotFound { .. } => {
                "Your user profile could not be loaded. Please try again or contact support."
                    .into()
            }
            AuthError::OrganizationMismatch => {
                "Access denied. Your account does not belong to this organization.".into()
            }
            AuthError::InsufficientRole(_) => {
                "Access denied. Administrator privileges are required.".into()
            }
            AuthError::NotAuthenticated => "Your session has ended. Please sign in again.".into(),
            AuthError::Cancelled => "The sign-in attempt was cancelled.".into(),
            AuthError::Provider(ProviderError::Transport(_))
            | AuthError::Directory(DirectoryError::Transport(_)) => {
                "The service is currently unavailable. Please try again later.".into()
            }
            AuthError::Provider(_) | AuthError::Directory(_) | AuthError::Storage(_) => {
                "Something went wrong. Please try again.".into()
            }
        }
    }
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidCredentials => AuthError::InvalidCredentials,
            ProviderError::EmailNotConfirmed => AuthError::EmailNotConfirmed,
            ProviderError::RateLimited => AuthError::RateLimited,
            ProviderError::InvalidOtp => AuthError::InvalidOtp,
            ProviderError::Unauthorized => AuthError::NotAuthenticated,
            other => AuthError::Provider(other),
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    let detail = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string());
                    format!("{}: {}", field, detail)
                })
            })
            .collect();
        messages.sort();
        AuthError::Validation(messages)
    }
}
