//! Session coordinator: the single owner of authentication state.
//!
//! Every sign-in attempt gets a generation number and a cancellation token.
//! Starting a new attempt, or logging out, cancels the previous token and
//! bumps the generation, so a superseded attempt can never write state.
//! The state mutex is never held across an `.await`.

mod state;


pub use state::{AuthState, AuthStatus, LoginOutcome};

use std::{
    future::Future,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::{
    clock::Clock,
    directory::Directory,
    error::AuthError,
    identity::{AuthEvent, AuthTokens, IdentityProvider, SignOutScope},
    models::{
        OtpRequest, OtpVerification, Organization, PasswordChange, PasswordCredentials,
        PersistedSession, Session, SessionEnd, SessionPolicy, SessionValidity, UserProfile,
    },
    permissions,
    retry::{RetryError, RetryPolicy},
    storage::SessionStorage,
    types::{OrganizationId, UserId},
};

/// Collaborators and policies the coordinator is built from.
#[derive(Clone)]
pub struct CoordinatorDeps {
    pub identity: Arc<dyn IdentityProvider>,
    pub directory: Arc<dyn Directory>,
    pub storage: Arc<dyn SessionStorage>,
    pub clock: Arc<dyn Clock>,
    pub session_policy: SessionPolicy,
    pub retry_policy: RetryPolicy,
}

#[derive(Debug, Clone)]
struct Attempt {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Inner {
    state: AuthState,
    in_flight: Option<Attempt>,
    /// Bumped whenever the session is replaced or torn down.
    generation: u64,
    pending_restore: Option<PersistedSession>,
    /// The provider session outlived a local expiry or a replaced session and
    /// must not be adopted again by a refresh.
    remote_stale: bool,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|attempt| attempt.generation == generation)
    }

    fn cancel_in_flight(&mut self) {
        if let Some(attempt) = self.in_flight.take() {
            attempt.token.cancel();
            tracing::debug!(generation = attempt.generation, "cancelled authentication attempt");
        }
    }
}

/// User and tenant resolved by a successful authentication.
struct Resolved {
    profile: UserProfile,
    organization: Option<Organization>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Audience {
    Members,
    Administrators,
}

pub struct SessionCoordinator {
    identity: Arc<dyn IdentityProvider>,
    directory: Arc<dyn Directory>,
    storage: Arc<dyn SessionStorage>,
    clock: Arc<dyn Clock>,
    session_policy: SessionPolicy,
    retry_policy: RetryPolicy,
    inner: Mutex<Inner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCoordinator {
    /// Builds a coordinator without subscribing to provider events.
    pub fn new(deps: CoordinatorDeps) -> Self {
        Self {
            identity: deps.identity,
            directory: deps.directory,
            storage: deps.storage,
            clock: deps.clock,
            session_policy: deps.session_policy,
            retry_policy: deps.retry_policy,
            inner: Mutex::new(Inner::default()),
            listener: Mutex::new(None),
        }
    }

    /// Builds a coordinator and starts listening to provider session events.
    ///
    /// The listener only holds a weak reference; it stops once the last
    /// `Arc` is dropped or `shutdown` is called.
    pub fn start(deps: CoordinatorDeps) -> Arc<Self> {
        let coordinator = Arc::new(Self::new(deps));
        let events = coordinator.identity.subscribe();
        let handle = tokio::spawn(listen(Arc::downgrade(&coordinator), events));
        *coordinator.listener.lock() = Some(handle);
        coordinator
    }

    /// Email + password sign-in scoped to `organization_id`.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        organization_id: OrganizationId,
    ) -> Result<LoginOutcome, AuthError> {
        let credentials = PasswordCredentials::new(email, password);
        credentials.validate()?;

        let attempt = self.begin_attempt();
        let result = async {
            let organization = self.require_organization(&attempt, organization_id).await?;
            let tokens = cancellable(
                &attempt.token,
                self.identity
                    .sign_in_with_password(&credentials.email, &credentials.password),
            )
            .await?;
            self.resolve(&attempt, tokens, Some(organization), Audience::Members)
                .await
        }
        .await;
        self.finish_attempt(&attempt, result)
    }

    /// Sign-in for the administrative console.
    ///
    /// The tenant comes from the user's own profile and only `root` and
    /// `super_admin` accounts are admitted.
    #[tracing::instrument(skip(self, password))]
    pub async fn login_as_admin(
        &self,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome, AuthError> {
        let credentials = PasswordCredentials::new(email, password);
        credentials.validate()?;

        let attempt = self.begin_attempt();
        let result = async {
            let tokens = cancellable(
                &attempt.token,
                self.identity
                    .sign_in_with_password(&credentials.email, &credentials.password),
            )
            .await?;
            self.resolve(&attempt, tokens, None, Audience::Administrators)
                .await
        }
        .await;
        self.finish_attempt(&attempt, result)
    }

    /// First phase of passwordless sign-in.
    ///
    /// The provider is only asked to send a code once the email is known to
    /// belong to the organization, so no account is ever created here.
    #[tracing::instrument(skip(self))]
    pub async fn send_one_time_code(
        &self,
        email: &str,
        organization_id: OrganizationId,
    ) -> Result<(), AuthError> {
        let request = OtpRequest::new(email, organization_id);
        request.validate()?;

        let organization = self
            .directory
            .find_organization(request.organization_id)
            .await?
            .ok_or(AuthError::InvalidOrganization(request.organization_id))?;
        let member = self
            .directory
            .find_user_by_email(&request.email, organization.id)
            .await?;
        if member.is_none() {
            tracing::info!(organization_id = %organization.id, "one-time code requested for unknown account");
            return Err(AuthError::AccountNotFound);
        }

        self.identity.send_otp(&request.email).await?;
        tracing::info!(organization_id = %organization.id, "one-time code sent");
        Ok(())
    }

    /// Second phase of passwordless sign-in.
    #[tracing::instrument(skip(self, code))]
    pub async fn verify_one_time_code(
        &self,
        email: &str,
        code: &str,
        organization_id: OrganizationId,
    ) -> Result<LoginOutcome, AuthError> {
        let verification = OtpVerification::new(email, code, organization_id);
        verification.validate()?;

        let attempt = self.begin_attempt();
        let result = async {
            let organization = self
                .require_organization(&attempt, verification.organization_id)
                .await?;
            let tokens = cancellable(
                &attempt.token,
                self.identity
                    .verify_otp(&verification.email, &verification.code),
            )
            .await?;
            self.resolve(&attempt, tokens, Some(organization), Audience::Members)
                .await
        }
        .await;
        self.finish_attempt(&attempt, result)
    }

    /// Replaces a temporary password and leaves `PasswordResetRequired`.
    #[tracing::instrument(skip(self, new_password))]
    pub async fn complete_password_change(&self, new_password: &str) -> Result<(), AuthError> {
        let change = PasswordChange {
            new_password: new_password.to_string(),
        };
        change.validate()?;

        let (user_id, generation) = {
            let mut inner = self.inner.lock();
            if !self.check_session(&mut inner) {
                return Err(AuthError::NotAuthenticated);
            }
            if inner.state.status != AuthStatus::PasswordResetRequired {
                return Err(AuthError::Validation(vec![
                    "new_password: No password change is pending".into(),
                ]));
            }
            let user_id = inner
                .state
                .user
                .as_ref()
                .map(|user| user.id)
                .ok_or(AuthError::NotAuthenticated)?;
            (user_id, inner.generation)
        };

        self.identity.update_password(&change.new_password).await?;
        self.directory.clear_password_change_flag(user_id).await?;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return Err(AuthError::NotAuthenticated);
        }
        if let Some(user) = inner.state.user.as_mut() {
            user.requires_password_change = false;
        }
        inner.state.status = AuthStatus::Authenticated;
        tracing::info!(%user_id, "temporary password replaced");
        Ok(())
    }

    /// Ends the local session, then asks the provider to end its own.
    ///
    /// Local state is always cleared, even when the provider call fails.
    #[tracing::instrument(skip(self))]
    pub async fn logout(&self) {
        self.clear_local(SessionEnd::LoggedOut);
        if let Err(err) = self.identity.sign_out(SignOutScope::Local).await {
            tracing::warn!(error = %err, "remote sign-out failed");
        }
    }

    /// Revokes every session of the current user, then logs out locally.
    #[tracing::instrument(skip(self))]
    pub async fn logout_all_sessions(&self) -> Result<(), AuthError> {
        let remote = self.identity.sign_out(SignOutScope::Global).await;
        self.logout().await;
        remote.map_err(|err| {
            tracing::warn!(error = %err, "global sign-out failed");
            AuthError::from(err)
        })
    }

    /// Reconciles local state with the provider session.
    ///
    /// Runs on provider events and at startup. Skipped while an attempt is
    /// in flight; failures are logged and never surfaced.
    pub async fn refresh_session(&self) {
        if let Err(err) = self.try_refresh_session().await {
            tracing::warn!(error = %err, "session refresh failed");
        }
    }

    /// Synchronous validity check: idle timeout, maximum age, and that the
    /// storage still tracks this session. A stale session is cleared.
    pub fn validate_session(&self) -> bool {
        let mut inner = self.inner.lock();
        self.check_session(&mut inner)
    }

    /// Records user activity on a valid session.
    pub fn update_activity(&self) {
        let mut inner = self.inner.lock();
        if !self.check_session(&mut inner) {
            return;
        }
        let now = self.clock.now();
        if let Some(session) = inner.state.session.as_mut() {
            session.touch(now);
            self.save_snapshot(&session.to_persisted());
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        let mut inner = self.inner.lock();
        if !self.check_session(&mut inner) {
            return false;
        }
        permissions::has_permission(
            inner.state.user.as_ref(),
            inner.state.organization.as_ref(),
            permission,
        )
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        let mut inner = self.inner.lock();
        self.check_session(&mut inner);
        inner.state.user.clone()
    }

    /// Snapshot of the state after validity has been enforced.
    pub fn state(&self) -> AuthState {
        let mut inner = self.inner.lock();
        self.check_session(&mut inner);
        inner.state.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        let mut inner = self.inner.lock();
        self.check_session(&mut inner) && inner.state.is_authenticated()
    }

    /// Rehydrates a session persisted by a previous run.
    ///
    /// A record past the idle timeout is discarded. Otherwise its id and
    /// last activity are reused if the provider still has a live session.
    pub async fn restore_persisted(&self) {
        let persisted = match self.storage.load() {
            Ok(persisted) => persisted,
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable session record");
                self.clear_storage();
                None
            }
        };
        let Some(persisted) = persisted else {
            return;
        };

        if persisted.is_idle_expired(&self.session_policy, self.clock.now()) {
            tracing::info!(session_id = %persisted.session_id, "persisted session expired while away");
            self.clear_storage();
            let mut inner = self.inner.lock();
            inner.state.last_ended = Some(SessionEnd::IdleExpired);
            inner.remote_stale = true;
            return;
        }

        self.inner.lock().pending_restore = Some(persisted);
        self.refresh_session().await;

        let orphaned = self.inner.lock().pending_restore.take();
        if let Some(orphaned) = orphaned {
            tracing::info!(session_id = %orphaned.session_id, "no remote session to restore");
            self.clear_storage();
        }
    }

    /// Writes the current session snapshot to storage.
    pub fn persist(&self) -> Result<(), AuthError> {
        let mut inner = self.inner.lock();
        if !self.check_session(&mut inner) {
            return Ok(());
        }
        if let Some(session) = inner.state.session.as_ref() {
            self.storage.save(&session.to_persisted())?;
        }
        Ok(())
    }

    /// Persists the session, cancels pending work and stops the event
    /// listener.
    pub fn shutdown(&self) {
        if let Err(err) = self.persist() {
            tracing::warn!(error = %err, "failed to persist session on shutdown");
        }
        self.inner.lock().cancel_in_flight();
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }

    async fn handle_event(&self, event: AuthEvent) {
        // Events are hints; the provider's current session is authoritative.
        tracing::debug!(?event, "provider session event");
        self.refresh_session().await;
    }

    async fn try_refresh_session(&self) -> Result<(), AuthError> {
        let generation = {
            let inner = self.inner.lock();
            if inner.in_flight.is_some() {
                tracing::debug!("authentication in flight; skipping refresh");
                return Ok(());
            }
            inner.generation
        };

        let Some(tokens) = self.identity.current_session().await? else {
            let mut inner = self.inner.lock();
            inner.remote_stale = false;
            if inner.generation == generation
                && inner.in_flight.is_none()
                && inner.state.is_authenticated()
            {
                tracing::info!("provider session ended; expiring local session");
                self.end_session(&mut inner, SessionEnd::ForceExpired);
            }
            return Ok(());
        };

        let stale = std::mem::take(&mut self.inner.lock().remote_stale);
        if stale {
            tracing::info!("signing out provider session left behind by an expired local session");
            self.discard_remote_session().await;
            return Ok(());
        }

        let profile = self
            .directory
            .find_user_by_id(tokens.user_id)
            .await?
            .ok_or(AuthError::ProfileNotFound { attempts: 1 })?;
        let organization = self
            .directory
            .find_organization(profile.organization_id)
            .await?;

        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.in_flight.is_some() {
            tracing::debug!("session changed during refresh; discarding result");
            return Ok(());
        }

        let current = inner.state.user.as_ref().map(|user| (user.id, user.organization_id));
        match current {
            Some((user_id, organization_id)) if user_id == profile.id => {
                if profile.organization_id != organization_id {
                    tracing::warn!(%user_id, "user moved to another organization; expiring session");
                    self.end_session(&mut inner, SessionEnd::ForceExpired);
                    inner.remote_stale = true;
                    return Ok(());
                }
                if !self.check_session(&mut inner) {
                    return Ok(());
                }
                inner.state.status = status_for(&profile);
                inner.state.user = Some(profile);
                if organization.is_some() {
                    inner.state.organization = organization;
                }
            }
            _ => {
                if organization.is_none() && !profile.is_administrative() {
                    return Err(AuthError::InvalidOrganization(profile.organization_id));
                }
                let now = self.clock.now();
                let session = match inner.pending_restore.take() {
                    Some(persisted) if !persisted.is_idle_expired(&self.session_policy, now) => {
                        Session::resume(&persisted, profile.id)
                    }
                    _ => Session::new(profile.id, now),
                };
                if current.is_some() {
                    tracing::info!(user_id = %profile.id, "provider switched user; replacing session");
                }
                inner.generation += 1;
                self.establish(&mut inner, Resolved { profile, organization }, session);
            }
        }
        Ok(())
    }

    fn begin_attempt(&self) -> Attempt {
        let mut inner = self.inner.lock();
        inner.cancel_in_flight();
        inner.generation += 1;
        let attempt = Attempt {
            generation: inner.generation,
            token: CancellationToken::new(),
        };
        inner.in_flight = Some(attempt.clone());
        inner.pending_restore = None;

        let had_session = inner.state.session.is_some();
        // The replaced provider session stays stale until another one is
        // established; a failed attempt must not hand it back to a refresh.
        inner.remote_stale |= had_session;
        let last_ended = inner.state.last_ended;
        inner.state = AuthState {
            status: AuthStatus::Authenticating,
            loading: true,
            last_ended,
            ..AuthState::default()
        };
        if had_session {
            self.clear_storage();
        }
        attempt
    }

    fn finish_attempt(
        &self,
        attempt: &Attempt,
        result: Result<Resolved, AuthError>,
    ) -> Result<LoginOutcome, AuthError> {
        let mut inner = self.inner.lock();
        if !inner.is_current(attempt.generation) {
            tracing::debug!(generation = attempt.generation, "discarding superseded attempt");
            return Err(AuthError::Cancelled);
        }
        inner.in_flight = None;

        match result {
            Ok(resolved) => {
                let session = Session::new(resolved.profile.id, self.clock.now());
                let outcome = self.establish(&mut inner, resolved, session);
                Ok(outcome)
            }
            Err(err) => {
                tracing::info!(code = err.code(), error = %err, "authentication failed");
                let last_ended = inner.state.last_ended;
                inner.state = AuthState {
                    error: Some(err.user_message()),
                    ..AuthState::ended(last_ended)
                };
                Err(err)
            }
        }
    }

    fn establish(&self, inner: &mut Inner, resolved: Resolved, session: Session) -> LoginOutcome {
        inner.remote_stale = false;
        self.save_snapshot(&session.to_persisted());
        let Resolved {
            profile,
            organization,
        } = resolved;
        let outcome = if profile.requires_password_change {
            LoginOutcome::PasswordResetRequired(profile.clone())
        } else {
            LoginOutcome::Authenticated(profile.clone())
        };
        tracing::info!(
            user_id = %profile.id,
            organization_id = %profile.organization_id,
            session_id = %session.id,
            role = %profile.role,
            "session established"
        );
        inner.state = AuthState {
            status: outcome.status(),
            user: Some(profile),
            organization,
            session: Some(session),
            loading: false,
            error: None,
            last_ended: inner.state.last_ended,
        };
        outcome
    }

    /// Profile lookup, organization check and role gate shared by every
    /// sign-in flow. Any rejection signs the provider session out again.
    async fn resolve(
        &self,
        attempt: &Attempt,
        tokens: AuthTokens,
        organization: Option<Organization>,
        audience: Audience,
    ) -> Result<Resolved, AuthError> {
        let result = self
            .check_account(attempt, tokens.user_id, organization, audience)
            .await;
        if let Err(err) = &result {
            let current = self.inner.lock().is_current(attempt.generation);
            if current && !matches!(err, AuthError::Cancelled) {
                self.discard_remote_session().await;
            }
        }
        result
    }

    async fn check_account(
        &self,
        attempt: &Attempt,
        user_id: UserId,
        organization: Option<Organization>,
        audience: Audience,
    ) -> Result<Resolved, AuthError> {
        let profile = self.fetch_profile(attempt, user_id).await?;

        let organization = match organization {
            Some(organization) => {
                if profile.organization_id != organization.id {
                    tracing::warn!(
                        user_id = %profile.id,
                        requested = %organization.id,
                        actual = %profile.organization_id,
                        "user does not belong to the requested organization"
                    );
                    return Err(AuthError::OrganizationMismatch);
                }
                Some(organization)
            }
            None => {
                cancellable(
                    &attempt.token,
                    self.directory.find_organization(profile.organization_id),
                )
                .await?
            }
        };

        if audience == Audience::Administrators && !profile.role.is_administrative() {
            tracing::warn!(user_id = %profile.id, role = %profile.role, "admin console sign-in refused");
            return Err(AuthError::InsufficientRole(profile.role));
        }

        Ok(Resolved {
            profile,
            organization,
        })
    }

    /// The profile row may lag behind account creation, so it is retried.
    async fn fetch_profile(
        &self,
        attempt: &Attempt,
        user_id: UserId,
    ) -> Result<UserProfile, AuthError> {
        let directory = self.directory.clone();
        let result = self
            .retry_policy
            .run(&attempt.token, |n| {
                let directory = directory.clone();
                async move {
                    tracing::debug!(attempt = n, %user_id, "fetching user profile");
                    directory.find_user_by_id(user_id).await
                }
            })
            .await;

        match result {
            Ok(profile) => Ok(profile),
            Err(RetryError::Cancelled) => Err(AuthError::Cancelled),
            Err(RetryError::Exhausted {
                last_error: Some(err),
                ..
            }) => Err(AuthError::Directory(err)),
            Err(RetryError::Exhausted {
                attempts,
                last_error: None,
            }) => Err(AuthError::ProfileNotFound { attempts }),
        }
    }

    async fn require_organization(
        &self,
        attempt: &Attempt,
        id: OrganizationId,
    ) -> Result<Organization, AuthError> {
        cancellable(&attempt.token, self.directory.find_organization(id))
            .await?
            .ok_or(AuthError::InvalidOrganization(id))
    }

    async fn discard_remote_session(&self) {
        if let Err(err) = self.identity.sign_out(SignOutScope::Local).await {
            tracing::warn!(error = %err, "failed to sign out rejected session");
        }
    }

    /// Returns whether the current session is still usable, ending it when
    /// it is not.
    fn check_session(&self, inner: &mut Inner) -> bool {
        let Some(session) = inner.state.session.as_ref() else {
            return false;
        };

        let validity = session.validity(&self.session_policy, self.clock.now());
        let tracked = match self.storage.load() {
            Ok(Some(stored)) => stored.session_id == session.id,
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(error = %err, "session storage unreadable; trusting memory");
                true
            }
        };
        if validity.is_valid() && tracked {
            return true;
        }

        let session_id = session.id;
        let reason = match validity {
            SessionValidity::IdleExpired | SessionValidity::MaxAgeExceeded => {
                SessionEnd::IdleExpired
            }
            SessionValidity::Valid => SessionEnd::ForceExpired,
        };
        tracing::info!(%session_id, ?validity, tracked, "session no longer valid");
        self.end_session(inner, reason);
        inner.remote_stale = true;
        false
    }

    fn end_session(&self, inner: &mut Inner, reason: SessionEnd) {
        inner.cancel_in_flight();
        inner.generation += 1;
        inner.pending_restore = None;
        inner.state = AuthState::ended(Some(reason));
        self.clear_storage();
    }

    fn clear_local(&self, reason: SessionEnd) {
        let mut inner = self.inner.lock();
        let had_session = inner.state.session.is_some() || inner.in_flight.is_some();
        let last_ended = if had_session {
            Some(reason)
        } else {
            inner.state.last_ended
        };
        self.end_session(&mut inner, reason);
        inner.state.last_ended = last_ended;
    }

    fn save_snapshot(&self, snapshot: &PersistedSession) {
        if let Err(err) = self.storage.save(snapshot) {
            tracing::warn!(error = %err, session_id = %snapshot.session_id, "failed to persist session");
        }
    }

    fn clear_storage(&self) {
        if let Err(err) = self.storage.clear() {
            tracing::warn!(error = %err, "failed to clear session storage");
        }
    }
}

fn status_for(profile: &UserProfile) -> AuthStatus {
    if profile.requires_password_change {
        AuthStatus::PasswordResetRequired
    } else {
        AuthStatus::Authenticated
    }
}

/// Races `operation` against the attempt's cancellation token.
async fn cancellable<T, E, F>(token: &CancellationToken, operation: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, E>>,
    AuthError: From<E>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(AuthError::Cancelled),
        result = operation => result.map_err(AuthError::from),
    }
}

async fn listen(coordinator: Weak<SessionCoordinator>, mut events: broadcast::Receiver<AuthEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "missed provider events; resynchronising");
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                coordinator.refresh_session().await;
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        coordinator.handle_event(event).await;
    }
    tracing::debug!("provider event listener stopped");
}
