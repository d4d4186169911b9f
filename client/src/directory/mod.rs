//! Read access to the hosted datastore's `organizations` and `users` tables.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Organization, UserProfile};
use crate::types::{OrganizationId, UserId};

pub use http::HostedDirectory;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("datastore returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("datastore unreachable: {0}")]
    Transport(String),
    #[error("failed to decode datastore response: {0}")]
    Decode(String),
}

/// Directory queries used by the session coordinator.
///
/// Every lookup returns `Ok(None)` when the row is not visible; errors are
/// reserved for transport and server failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<Organization>, DirectoryError>;

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<UserProfile>, DirectoryError>;

    /// Email lookup restricted to one organization.
    async fn find_user_by_email(
        &self,
        email: &str,
        organization_id: OrganizationId,
    ) -> Result<Option<UserProfile>, DirectoryError>;

    async fn clear_password_change_flag(&self, id: UserId) -> Result<(), DirectoryError>;
}
