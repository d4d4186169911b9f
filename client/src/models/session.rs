//! Models for tracking the local authenticated session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SessionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Expiry policy applied to every local session.
pub struct SessionPolicy {
    /// Maximum time between two tracked user actions.
    pub idle_timeout: Duration,
    /// Absolute lifetime measured from session creation.
    pub max_age: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::minutes(30),
            max_age: Duration::hours(12),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionValidity {
    Valid,
    IdleExpired,
    MaxAgeExceeded,
}

impl SessionValidity {
    pub fn is_valid(self) -> bool {
        matches!(self, SessionValidity::Valid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Local session record created after a successful authentication.
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Re-attaches a persisted session id to a freshly resolved user.
    ///
    /// Only the last activity survives a reload, so the creation time is
    /// taken from it as well.
    pub fn resume(persisted: &PersistedSession, user_id: UserId) -> Self {
        Self {
            id: persisted.session_id,
            user_id,
            created_at: persisted.last_activity,
            last_activity_at: persisted.last_activity,
        }
    }

    pub fn validity(&self, policy: &SessionPolicy, now: DateTime<Utc>) -> SessionValidity {
        if now - self.created_at > policy.max_age {
            return SessionValidity::MaxAgeExceeded;
        }
        if now - self.last_activity_at > policy.idle_timeout {
            return SessionValidity::IdleExpired;
        }
        SessionValidity::Valid
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            session_id: self.id,
            last_activity: self.last_activity_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// The only session data written to storage across reloads.
pub struct PersistedSession {
    pub session_id: SessionId,
    pub last_activity: DateTime<Utc>,
}

impl PersistedSession {
    pub fn is_idle_expired(&self, policy: &SessionPolicy, now: DateTime<Utc>) -> bool {
        now - self.last_activity > policy.idle_timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Why the last authenticated session ended.
pub enum SessionEnd {
    IdleExpired,
    LoggedOut,
    ForceExpired,
}
