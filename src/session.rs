//! Session state machine: the authoritative in-memory authorization state.
//!
//! SYSTEM CONTEXT
//! ==============
//! UI code reads predicates and the current [`SessionState`] from here and
//! drives transitions (login, register, logout, profile refresh). The
//! routing layer subscribes to [`SessionEvent`]s; the state machine never
//! navigates itself, it only emits [`NavigationIntent`]s.
//!
//! DESIGN
//! ======
//! Phases: `Anonymous -> Authenticating -> Authenticated | Anonymous` and
//! `Authenticated -> LoggingOut -> Anonymous`.
//!
//! Two guards keep logout cycles from overlapping:
//! - `latch` is held for the duration of an explicit logout or a forced
//!   logout and is released by a drop guard whatever the outcome. A second
//!   cycle requested while it is held is a no-op.
//! - `epoch` advances on every transition into `Authenticated` or
//!   `Anonymous`. A 401 only invalidates the session when the epoch sampled
//!   at send time is still current, so N concurrent rejections of one session
//!   run one cycle and emit one navigation intent.
//!
//! The state mutex is never held across an `.await`.

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::client::{
    InvalidationHook, LOGIN_FAILED, REGISTER_FAILED, SessionClient, SessionGrant, UPDATE_FAILED,
};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::guard::login_location;
use crate::model::{Authorization, Outcome, SessionSnapshot, UserProfile};
use crate::net::{ApiRequest, ApiResponse, HttpTransport, Transport, TransportError};
use crate::storage::KeyValueStorage;
use crate::store::CredentialStore;

const EVENT_CAPACITY: usize = 32;

// =============================================================================
// STATE
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    Anonymous,
    Authenticating,
    Authenticated,
    LoggingOut,
}

/// Snapshot plus the transient flags only the runtime cares about.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    pub snapshot: SessionSnapshot,
    /// A network operation is pending.
    pub loading: bool,
    /// Failure message of the last operation.
    pub error: Option<String>,
    pub phase: SessionPhase,
}

impl SessionState {
    fn settle_phase(&mut self) {
        self.phase = if self.snapshot.is_authenticated() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Anonymous
        };
    }
}

impl Authorization for SessionState {
    fn is_logged_in(&self) -> bool {
        self.snapshot.is_logged_in()
    }

    fn has_role(&self, code: &str) -> bool {
        self.snapshot.has_role(code)
    }

    fn has_permission(&self, code: &str) -> bool {
        self.snapshot.has_permission(code)
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Request for the routing layer to show the login entry point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavigationIntent {
    pub route: String,
    /// Where the user was, for post-login continuation.
    pub redirect: Option<String>,
}

impl NavigationIntent {
    /// Concrete location, e.g. `/auth/login?redirect=%2Freports`.
    #[must_use]
    pub fn location(&self) -> String {
        login_location(&self.route, self.redirect.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated,
    LoggedOut,
    /// The server rejected the session and local state was wiped.
    Invalidated,
    Navigate(NavigationIntent),
}

/// Take every queued navigation intent from `events` without waiting.
///
/// A lagged receiver skips the overwritten events and keeps reading what is
/// still queued.
pub fn pending_navigations(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<NavigationIntent> {
    let mut intents = Vec::new();
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Navigate(intent)) => intents.push(intent),
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "session events lagged");
            }
            Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
                return intents;
            }
        }
    }
}

// =============================================================================
// GUARDS
// =============================================================================

struct LatchGuard<'a> {
    latch: &'a AtomicBool,
}

impl<'a> LatchGuard<'a> {
    fn try_acquire(latch: &'a AtomicBool) -> Option<Self> {
        latch
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then_some(Self { latch })
    }
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.store(false, Ordering::Release);
    }
}

/// Clears `loading` when the operation scope ends, however it ends.
struct LoadingGuard<'a> {
    inner: &'a SessionInner,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.inner.update(|s| s.loading = false);
    }
}

// =============================================================================
// SESSION
// =============================================================================

struct SessionInner {
    client: SessionClient,
    state: Mutex<SessionState>,
    latch: AtomicBool,
    epoch: AtomicU64,
    location: Mutex<Option<String>>,
    login_route: String,
    events: broadcast::Sender<SessionEvent>,
}

/// Cloneable handle to one session. All clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Build a session over `transport` and `storage`. Invalidation
    /// redirects point at `login_route`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, storage: Arc<dyn KeyValueStorage>, login_route: &str) -> Self {
        let client = SessionClient::new(transport, CredentialStore::new(storage));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(SessionInner {
            client,
            state: Mutex::new(SessionState::default()),
            latch: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            location: Mutex::new(None),
            login_route: login_route.to_owned(),
            events,
        });
        let hook: Weak<SessionInner> = Arc::downgrade(&inner);
        inner.client.install_hook(hook);
        Self { inner }
    }

    /// Build a session talking HTTP to the configured API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &SessionConfig, storage: Arc<dyn KeyValueStorage>) -> Result<Self, TransportError> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::new(Arc::new(transport), storage, &config.login_route))
    }

    // =========================================================================
    // OBSERVATION
    // =========================================================================

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock_state().clone()
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.inner.lock_state().phase
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.lock_state().loading
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.inner.lock_state().error.clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.inner.lock_state().snapshot.user.clone()
    }

    #[must_use]
    pub fn user_name(&self) -> String {
        self.inner
            .lock_state()
            .snapshot
            .user
            .as_ref()
            .map(|u| u.display_name().to_owned())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn user_email(&self) -> String {
        self.inner
            .lock_state()
            .snapshot
            .user
            .as_ref()
            .map(|u| u.display_email().to_owned())
            .unwrap_or_default()
    }

    pub fn clear_error(&self) {
        self.inner.update(|s| s.error = None);
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Tell the session where the user currently is. Used as the
    /// post-login redirect when the session is invalidated.
    pub fn record_location(&self, path: &str) {
        *self
            .inner
            .location
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(path.to_owned());
    }

    #[must_use]
    pub fn client(&self) -> &SessionClient {
        &self.inner.client
    }

    #[must_use]
    pub fn store(&self) -> &CredentialStore {
        self.inner.client.store()
    }

    /// Send an application request through the session's interceptor.
    ///
    /// # Errors
    ///
    /// See [`SessionClient::execute`].
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        self.inner.client.execute(request).await
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// Rehydrate from the credential store.
    ///
    /// A flagged snapshot with an identified user is adopted. An unflagged
    /// store is wiped. A flagged but malformed or unreadable store triggers
    /// a forced logout.
    pub fn initialize_auth(&self) -> SessionPhase {
        let inner = &*self.inner;
        let store = inner.client.store();

        let flagged = match store.is_flagged() {
            Ok(flagged) => flagged,
            Err(e) => {
                tracing::warn!(error = %e, "credential store unreadable at startup");
                inner.force_logout(None);
                return SessionPhase::Anonymous;
            }
        };
        if !flagged {
            inner.client.clear_local();
            inner.reset();
            return SessionPhase::Anonymous;
        }

        match store.load() {
            Ok(snapshot) if snapshot.is_authenticated() && snapshot.user_id().is_some() => {
                tracing::info!(user = ?snapshot.user_id(), "session rehydrated");
                inner.update(|s| {
                    s.snapshot = snapshot;
                    s.loading = false;
                    s.error = None;
                    s.phase = SessionPhase::Authenticated;
                });
                inner.advance_epoch();
                inner.emit(SessionEvent::Authenticated);
                SessionPhase::Authenticated
            }
            Ok(_) => {
                tracing::warn!("stored session flagged without an identified user");
                inner.force_logout(None);
                SessionPhase::Anonymous
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored session corrupt");
                inner.force_logout(None);
                SessionPhase::Anonymous
            }
        }
    }

    /// Sign in. Failures are reported in the outcome and in `error`.
    pub async fn login(&self, email: &str, password: &str) -> Outcome<UserProfile> {
        let inner = &*self.inner;
        inner.begin(Some(SessionPhase::Authenticating));
        let _loading = LoadingGuard { inner };

        let result = inner.client.login(email, password).await;
        match result {
            Ok(Outcome::Success { payload, message }) => {
                let user = payload.user.clone();
                inner.adopt(payload, true);
                tracing::info!(user = ?user.id, "signed in");
                Outcome::Success { payload: user, message }
            }
            Ok(Outcome::Failure { message }) => inner.fail(message),
            Err(e) => inner.fail(e.user_message(LOGIN_FAILED)),
        }
    }

    /// Create an account and sign in as it. Roles and permissions stay
    /// empty until the next profile refresh.
    pub async fn register(&self, profile: &Value) -> Outcome<UserProfile> {
        let inner = &*self.inner;
        inner.begin(Some(SessionPhase::Authenticating));
        let _loading = LoadingGuard { inner };

        match inner.client.register(profile).await {
            Ok(Outcome::Success { payload, message }) => {
                let grant = SessionGrant { user: payload.clone(), roles: Vec::new(), permissions: Vec::new() };
                inner.adopt(grant, true);
                tracing::info!(user = ?payload.id, "registered");
                Outcome::Success { payload, message }
            }
            Ok(Outcome::Failure { message }) => inner.fail(message),
            Err(e) => inner.fail(e.user_message(REGISTER_FAILED)),
        }
    }

    /// Update the signed-in user's profile. Roles and permissions are kept.
    pub async fn update_profile(&self, profile: &Value) -> Outcome<UserProfile> {
        let inner = &*self.inner;
        inner.begin(None);
        let _loading = LoadingGuard { inner };

        match inner.client.update_profile(profile).await {
            Ok(Outcome::Success { payload, message }) => {
                inner.update(|s| s.snapshot.user = Some(payload.clone()));
                Outcome::Success { payload, message }
            }
            Ok(Outcome::Failure { message }) => inner.fail(message),
            // The interceptor already reset the session.
            Err(SessionError::Unauthorized) => Outcome::Failure {
                message: SessionError::Unauthorized.user_message(UPDATE_FAILED),
            },
            Err(e) => inner.fail(e.user_message(UPDATE_FAILED)),
        }
    }

    /// Refresh user, roles and permissions from the server.
    ///
    /// Resolves to `None` when the server rejected the session; the
    /// interceptor has already run the invalidation cycle in that case.
    ///
    /// # Errors
    ///
    /// Returns transport and non-401 server failures.
    pub async fn get_profile(&self) -> Result<Option<UserProfile>, SessionError> {
        match self.inner.client.get_profile().await {
            Ok(grant) => {
                let user = grant.user.clone();
                self.inner.adopt(grant, false);
                Ok(Some(user))
            }
            Err(SessionError::Unauthorized) => Ok(None),
            Err(e) => {
                tracing::warn!(error = %e, "profile refresh failed");
                Err(e)
            }
        }
    }

    /// Alias of [`Session::get_profile`].
    ///
    /// # Errors
    ///
    /// See [`Session::get_profile`].
    pub async fn fetch_user(&self) -> Result<Option<UserProfile>, SessionError> {
        self.get_profile().await
    }

    /// Sign out. A call made while another logout or invalidation cycle is
    /// running returns immediately. Local state is cleared even when the
    /// server cannot be reached.
    pub async fn logout(&self) {
        let inner = &*self.inner;
        let Some(_latch) = LatchGuard::try_acquire(&inner.latch) else {
            tracing::debug!("logout already in progress");
            return;
        };
        inner.update(|s| {
            s.loading = true;
            s.phase = SessionPhase::LoggingOut;
        });

        inner.client.logout().await;

        inner.reset();
        tracing::info!("signed out");
        inner.emit(SessionEvent::LoggedOut);
    }

    /// Wipe runtime state and the credential store, then ask the routing
    /// layer to show the login entry point.
    pub fn force_logout(&self) {
        self.inner.force_logout(None);
    }
}

impl Authorization for Session {
    fn is_logged_in(&self) -> bool {
        self.inner.lock_state().is_logged_in()
    }

    fn has_role(&self, code: &str) -> bool {
        self.inner.lock_state().has_role(code)
    }

    fn has_permission(&self, code: &str) -> bool {
        self.inner.lock_state().has_permission(code)
    }
}

// =============================================================================
// INNER TRANSITIONS
// =============================================================================

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.lock_state())
    }

    fn advance_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("no session event subscribers");
        }
    }

    fn begin(&self, phase: Option<SessionPhase>) {
        self.update(|s| {
            s.loading = true;
            s.error = None;
            if let Some(phase) = phase {
                s.phase = phase;
            }
        });
    }

    fn fail<T>(&self, message: String) -> Outcome<T> {
        self.update(|s| {
            s.error = Some(message.clone());
            s.settle_phase();
        });
        Outcome::Failure { message }
    }

    /// Enter `Authenticated` with the granted snapshot.
    ///
    /// `new_credentials` is set for login and register: requests sent under
    /// the previous credentials become stale even if a session was already
    /// active. A profile refresh keeps the current epoch.
    fn adopt(&self, grant: SessionGrant, new_credentials: bool) {
        let was_authenticated = self.update(|s| {
            let was = s.snapshot.is_authenticated();
            s.snapshot = SessionSnapshot::signed_in(grant.user, grant.roles, grant.permissions);
            s.phase = SessionPhase::Authenticated;
            was
        });
        if new_credentials || !was_authenticated {
            self.advance_epoch();
            self.emit(SessionEvent::Authenticated);
        }
    }

    /// Enter `Anonymous` with empty state.
    fn reset(&self) {
        self.update(|s| *s = SessionState::default());
        self.advance_epoch();
    }

    fn login_intent(&self) -> Option<NavigationIntent> {
        let location = self
            .location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let on_login_route = location
            .as_deref()
            .is_some_and(|loc| loc.split_once('?').map_or(loc, |(path, _)| path) == self.login_route);
        if on_login_route {
            return None;
        }
        Some(NavigationIntent { route: self.login_route.clone(), redirect: location })
    }

    /// Run one invalidation cycle. `observed_epoch` is the epoch a rejected
    /// request was sent under; `None` forces the cycle. Returns whether the
    /// cycle ran.
    fn force_logout(&self, observed_epoch: Option<u64>) -> bool {
        let Some(_latch) = LatchGuard::try_acquire(&self.latch) else {
            tracing::debug!("invalidation skipped: logout cycle already running");
            return false;
        };
        if let Some(epoch) = observed_epoch {
            if epoch != self.epoch.load(Ordering::Acquire) {
                tracing::debug!(epoch, "stale 401 ignored");
                return false;
            }
        }

        tracing::warn!("forced logout: session invalidated");
        self.client.clear_local();
        self.reset();
        self.emit(SessionEvent::Invalidated);
        if let Some(intent) = self.login_intent() {
            self.emit(SessionEvent::Navigate(intent));
        }
        true
    }
}

impl InvalidationHook for SessionInner {
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn invalidate(&self, epoch: u64) {
        self.force_logout(Some(epoch));
    }
}
