//! In-memory fakes for coordinator tests that need timing control or call
//! bookkeeping beyond what the generated mocks offer.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::{
    directory::{Directory, DirectoryError},
    identity::{AuthEvent, AuthTokens, IdentityProvider, ProviderError, SignOutScope},
    models::{Organization, UserProfile, UserRole},
    types::{OrganizationId, UserId},
};

pub fn profile(email: &str, role: UserRole, organization_id: OrganizationId) -> UserProfile {
    let created = Utc.with_ymd_and_hms(2025, 1, 2, 10, 0, 0).unwrap();
    UserProfile {
        id: UserId::new(),
        email: email.to_string(),
        first_name: "Test".into(),
        last_name: "User".into(),
        role,
        organization_id,
        department_id: None,
        created_at: created,
        updated_at: created,
        requires_password_change: false,
    }
}

pub fn organization(name: &str, admin_permissions: &[&str]) -> Organization {
    Organization {
        id: OrganizationId::new(),
        name: name.to_string(),
        admin_permissions: admin_permissions.iter().map(|p| p.to_string()).collect(),
    }
}

struct Account {
    user_id: UserId,
    password: String,
    delay: Duration,
}

pub struct FakeIdentity {
    accounts: Mutex<HashMap<String, Account>>,
    otp_codes: Mutex<HashMap<String, String>>,
    tokens: Mutex<Option<AuthTokens>>,
    events: broadcast::Sender<AuthEvent>,
    pub sign_out_fails: AtomicBool,
    pub sign_in_calls: AtomicU32,
    pub otp_sends: AtomicU32,
    pub password_updates: AtomicU32,
    pub sign_outs: Mutex<Vec<SignOutScope>>,
}

impl Default for FakeIdentity {
    fn default() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            accounts: Mutex::new(HashMap::new()),
            otp_codes: Mutex::new(HashMap::new()),
            tokens: Mutex::new(None),
            events,
            sign_out_fails: AtomicBool::new(false),
            sign_in_calls: AtomicU32::new(0),
            otp_sends: AtomicU32::new(0),
            password_updates: AtomicU32::new(0),
            sign_outs: Mutex::new(Vec::new()),
        }
    }
}

impl FakeIdentity {
    pub fn with_account(self, profile: &UserProfile, password: &str) -> Self {
        self.with_slow_account(profile, password, Duration::ZERO)
    }

    /// Sign-in for this account takes `delay` before answering.
    pub fn with_slow_account(self, profile: &UserProfile, password: &str, delay: Duration) -> Self {
        self.accounts.lock().insert(
            profile.email.clone(),
            Account {
                user_id: profile.id,
                password: password.to_string(),
                delay,
            },
        );
        self
    }

    pub fn with_otp(self, email: &str, code: &str) -> Self {
        self.otp_codes
            .lock()
            .insert(email.to_string(), code.to_string());
        self
    }

    /// Drops the provider-side session and announces it, as an administrator
    /// revoking the account would.
    pub fn revoke_remote_session(&self) {
        self.tokens.lock().take();
        let _ = self.events.send(AuthEvent::SignedOut);
    }

    pub fn has_remote_session(&self) -> bool {
        self.tokens.lock().is_some()
    }

    fn issue(&self, user_id: UserId, email: &str) -> AuthTokens {
        let tokens = AuthTokens {
            access_token: format!("access-{}", user_id),
            refresh_token: format!("refresh-{}", user_id),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            user_id,
            email: Some(email.to_string()),
        };
        *self.tokens.lock() = Some(tokens.clone());
        let _ = self.events.send(AuthEvent::SignedIn(user_id));
        tokens
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthTokens, ProviderError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        let found = self
            .accounts
            .lock()
            .get(email)
            .map(|a| (a.user_id, a.password.clone(), a.delay));
        let Some((user_id, expected, delay)) = found else {
            return Err(ProviderError::InvalidCredentials);
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if expected != password {
            return Err(ProviderError::InvalidCredentials);
        }
        Ok(self.issue(user_id, email))
    }

    async fn send_otp(&self, _email: &str) -> Result<(), ProviderError> {
        self.otp_sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<AuthTokens, ProviderError> {
        let expected = self.otp_codes.lock().get(email).cloned();
        let user_id = self.accounts.lock().get(email).map(|a| a.user_id);
        match (expected, user_id) {
            (Some(expected), Some(user_id)) if expected == code => Ok(self.issue(user_id, email)),
            _ => Err(ProviderError::InvalidOtp),
        }
    }

    async fn current_session(&self) -> Result<Option<AuthTokens>, ProviderError> {
        Ok(self.tokens.lock().clone())
    }

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), ProviderError> {
        self.sign_outs.lock().push(scope);
        self.tokens.lock().take();
        if self.sign_out_fails.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("connection reset".into()));
        }
        Ok(())
    }

    async fn update_password(&self, _new_password: &str) -> Result<(), ProviderError> {
        if self.tokens.lock().is_none() {
            return Err(ProviderError::Unauthorized);
        }
        self.password_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    organizations: Mutex<Vec<Organization>>,
    users: Mutex<Vec<UserProfile>>,
    /// Number of upcoming `find_user_by_id` calls that see no row yet.
    pub profile_lag: AtomicU32,
    pub profile_fetches: AtomicU32,
    pub fail_lookups: AtomicBool,
}

impl FakeDirectory {
    pub fn with_organization(self, organization: &Organization) -> Self {
        self.organizations.lock().push(organization.clone());
        self
    }

    pub fn with_user(self, profile: &UserProfile) -> Self {
        self.users.lock().push(profile.clone());
        self
    }

    pub fn with_profile_lag(self, calls: u32) -> Self {
        self.profile_lag.store(calls, Ordering::SeqCst);
        self
    }

    pub fn user(&self, id: UserId) -> Option<UserProfile> {
        self.users.lock().iter().find(|u| u.id == id).cloned()
    }

    fn check_available(&self) -> Result<(), DirectoryError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            Err(DirectoryError::Transport("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn find_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<Organization>, DirectoryError> {
        self.check_available()?;
        Ok(self.organizations.lock().iter().find(|o| o.id == id).cloned())
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<UserProfile>, DirectoryError> {
        self.check_available()?;
        self.profile_fetches.fetch_add(1, Ordering::SeqCst);
        let lagging = self
            .profile_lag
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lagging {
            return Ok(None);
        }
        Ok(self.user(id))
    }

    async fn find_user_by_email(
        &self,
        email: &str,
        organization_id: OrganizationId,
    ) -> Result<Option<UserProfile>, DirectoryError> {
        self.check_available()?;
        Ok(self
            .users
            .lock()
            .iter()
            .find(|u| u.email == email && u.organization_id == organization_id)
            .cloned())
    }

    async fn clear_password_change_flag(&self, id: UserId) -> Result<(), DirectoryError> {
        self.check_available()?;
        if let Some(user) = self.users.lock().iter_mut().find(|u| u.id == id) {
            user.requires_password_change = false;
        }
        Ok(())
    }
}
