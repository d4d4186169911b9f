//! Client-side authentication and session management for the feedback360
//! platform, backed by a hosted identity service and data API.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod identity;
pub mod models;
pub mod permissions;
pub mod retry;
pub mod storage;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::ClientConfig;
pub use coordinator::{AuthState, AuthStatus, CoordinatorDeps, LoginOutcome, SessionCoordinator};
pub use error::{AuthError, ErrorKind};
