use serde::Serialize;

use crate::models::{Organization, Session, SessionEnd, UserProfile};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    /// Signed in with a temporary password that must be replaced first.
    PasswordResetRequired,
}

/// Observable authentication state.
///
/// `user`, `organization` and `session` are either all present (for an
/// authenticated status) or all absent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthState {
    pub status: AuthStatus,
    pub user: Option<UserProfile>,
    pub organization: Option<Organization>,
    pub session: Option<Session>,
    pub loading: bool,
    /// User-facing message of the last failed attempt.
    pub error: Option<String>,
    pub last_ended: Option<SessionEnd>,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.status,
            AuthStatus::Authenticated | AuthStatus::PasswordResetRequired
        )
    }

    /// Signed-out state that remembers why the previous session ended.
    pub(crate) fn ended(reason: Option<SessionEnd>) -> Self {
        Self {
            last_ended: reason,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Authenticated(UserProfile),
    /// The session is live but the account still holds a temporary password.
    PasswordResetRequired(UserProfile),
}

impl LoginOutcome {
    pub fn user(&self) -> &UserProfile {
        match self {
            LoginOutcome::Authenticated(user) | LoginOutcome::PasswordResetRequired(user) => user,
        }
    }

    pub fn status(&self) -> AuthStatus {
        match self {
            LoginOutcome::Authenticated(_) => AuthStatus::Authenticated,
            LoginOutcome::PasswordResetRequired(_) => AuthStatus::PasswordResetRequired,
        }
    }
}
