//! Session client: auth API calls plus the single 401 interception point.
//!
//! SYSTEM CONTEXT
//! ==============
//! The state machine delegates every network operation here. The client
//! normalizes responses into [`Outcome`] / [`SessionError`], persists
//! successful results through the [`CredentialStore`], and routes every
//! request through [`SessionClient::execute`], where a 401 on a
//! session-bearing request is reported to the installed
//! [`InvalidationHook`] exactly once per request.
//!
//! ERROR HANDLING
//! ==============
//! Credential and validation rejections (4xx) on login, register and profile
//! update come back as `Outcome::Failure`. 5xx and network failures are
//! returned as errors. Store writes are best-effort: failures are logged and
//! the operation still succeeds.

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;

use std::sync::{Arc, OnceLock, Weak};

use serde_json::{Value, json};

use crate::error::SessionError;
use crate::model::{Outcome, SessionSnapshot, UserId, UserProfile, codes_from_value};
use crate::net::{ApiRequest, ApiResponse, Transport};
use crate::store::{CredentialStore, PERMISSIONS_KEY, ROLES_KEY};

pub const LOGIN_PATH: &str = "/login";
pub const REGISTER_PATH: &str = "/users/register";
pub const LOGOUT_PATH: &str = "/users/logout";
pub const PROFILE_PATH: &str = "/users/profile/get";

pub(crate) const LOGIN_FAILED: &str = "Login failed";
pub(crate) const REGISTER_FAILED: &str = "Registration failed";
pub(crate) const UPDATE_FAILED: &str = "Profile update failed";
const PROFILE_FAILED: &str = "Could not load profile";

fn update_profile_path(user_id: &UserId) -> String {
    format!("/users/update-profile/{user_id}")
}

// =============================================================================
// INVALIDATION HOOK
// =============================================================================

/// Receiver of server-driven session invalidation.
///
/// `epoch` is sampled before each session-bearing request is sent; the same
/// value is handed back to `invalidate` when that request comes back 401, so
/// the receiver can ignore rejections of a session it already replaced.
pub trait InvalidationHook: Send + Sync {
    fn epoch(&self) -> u64;
    fn invalidate(&self, epoch: u64);
}

// =============================================================================
// GRANT
// =============================================================================

/// User plus role and permission codes returned by login and profile fetch.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionGrant {
    pub user: UserProfile,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl SessionGrant {
    #[must_use]
    pub fn to_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::signed_in(self.user.clone(), self.roles.clone(), self.permissions.clone())
    }
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct SessionClient {
    transport: Arc<dyn Transport>,
    store: CredentialStore,
    hook: OnceLock<Weak<dyn InvalidationHook>>,
}

impl SessionClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, store: CredentialStore) -> Self {
        Self { transport, store, hook: OnceLock::new() }
    }

    /// Install the invalidation receiver. Only the first install wins;
    /// returns `false` if a hook was already present.
    pub fn install_hook(&self, hook: Weak<dyn InvalidationHook>) -> bool {
        self.hook.set(hook).is_ok()
    }

    #[must_use]
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Send `request`, applying the 401 interceptor.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Unauthorized`] for a 401 on a session-bearing request
    ///   (the hook has been notified)
    /// - [`SessionError::Server`] for any other non-2xx status
    /// - [`SessionError::Transport`] when no response arrived
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        let epoch = if request.carries_session {
            self.hook().map(|hook| hook.epoch())
        } else {
            None
        };

        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| SessionError::Transport(e.0))?;

        if response.status == 401 && request.carries_session {
            tracing::debug!(path = %request.path, "request rejected with 401");
            if let (Some(hook), Some(epoch)) = (self.hook(), epoch) {
                hook.invalidate(epoch);
            }
            return Err(SessionError::Unauthorized);
        }
        if !response.is_success() {
            return Err(SessionError::Server {
                status: response.status,
                message: response.message().unwrap_or_default().to_owned(),
            });
        }
        Ok(response)
    }

    fn hook(&self) -> Option<Arc<dyn InvalidationHook>> {
        self.hook.get().and_then(Weak::upgrade)
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// `POST /login`. Persists the full snapshot on success.
    ///
    /// # Errors
    ///
    /// Returns an error for 5xx, network failures and malformed success bodies.
    pub async fn login(&self, email: &str, password: &str) -> Result<Outcome<SessionGrant>, SessionError> {
        let body = json!({ "email": email, "password": password });
        let request = ApiRequest::post(LOGIN_PATH, Some(body)).without_session();
        let response = match self.execute(request).await {
            Ok(response) => response,
            Err(e) if e.is_client_rejection() => return Ok(rejected(&e, LOGIN_FAILED)),
            Err(e) => return Err(e),
        };
        if !envelope_succeeded(&response.body) {
            return Ok(Outcome::Failure { message: response.message().unwrap_or(LOGIN_FAILED).to_owned() });
        }

        let grant = grant_from_body(&response.body)?;
        self.persist("login", |store| store.save(&grant.to_snapshot()));
        Ok(Outcome::Success { payload: grant, message: response.message().map(str::to_owned) })
    }

    /// `POST /users/register`. Persists user and flag only; roles and
    /// permissions left by an earlier session are removed and arrive later
    /// with the profile.
    ///
    /// # Errors
    ///
    /// Returns an error for 5xx, network failures and malformed success bodies.
    pub async fn register(&self, profile: &Value) -> Result<Outcome<UserProfile>, SessionError> {
        let request = ApiRequest::post(REGISTER_PATH, Some(profile.clone())).without_session();
        let response = match self.execute(request).await {
            Ok(response) => response,
            Err(e) if e.is_client_rejection() => return Ok(rejected(&e, REGISTER_FAILED)),
            Err(e) => return Err(e),
        };
        if !envelope_succeeded(&response.body) {
            return Ok(Outcome::Failure { message: response.message().unwrap_or(REGISTER_FAILED).to_owned() });
        }

        let user = decode_user(&response.body)?;
        self.persist("register", |store| {
            store.save_user(&user)?;
            store.clear_codes()?;
            store.set_authenticated(true)
        });
        Ok(Outcome::Success { payload: user, message: response.message().map(str::to_owned) })
    }

    /// `GET /users/profile/get`. Re-derives codes and re-persists the full
    /// snapshot on success.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Unauthorized`] when the session was rejected; the
    ///   interceptor has already reacted
    /// - [`SessionError::Server`] with a readable message for other failures
    pub async fn get_profile(&self) -> Result<SessionGrant, SessionError> {
        let response = self
            .execute(ApiRequest::get(PROFILE_PATH))
            .await
            .map_err(|e| match e {
                SessionError::Server { status, message } if message.is_empty() => {
                    SessionError::Server { status, message: PROFILE_FAILED.to_owned() }
                }
                other => other,
            })?;
        if !envelope_succeeded(&response.body) {
            return Err(SessionError::Server {
                status: response.status,
                message: response.message().unwrap_or(PROFILE_FAILED).to_owned(),
            });
        }

        let grant = grant_from_body(&response.body)?;
        self.persist("profile", |store| store.save(&grant.to_snapshot()));
        Ok(grant)
    }

    /// `POST /users/update-profile/{id}` for the stored user. Persists the
    /// returned user only.
    ///
    /// # Errors
    ///
    /// - [`SessionError::MissingUser`] when no user id is stored
    /// - transport/server errors as for [`SessionClient::execute`]
    pub async fn update_profile(&self, profile: &Value) -> Result<Outcome<UserProfile>, SessionError> {
        let user_id = self.current_user_id().ok_or(SessionError::MissingUser)?;
        let request = ApiRequest::post(update_profile_path(&user_id), Some(profile.clone()));
        let response = match self.execute(request).await {
            Ok(response) => response,
            Err(e) if e.is_client_rejection() => return Ok(rejected(&e, UPDATE_FAILED)),
            Err(e) => return Err(e),
        };
        if !envelope_succeeded(&response.body) {
            return Ok(Outcome::Failure { message: response.message().unwrap_or(UPDATE_FAILED).to_owned() });
        }

        let user = decode_user(&response.body)?;
        self.persist("update_profile", |store| store.save_user(&user));
        Ok(Outcome::Success { payload: user, message: response.message().map(str::to_owned) })
    }

    /// `POST /users/logout`, then clear local credentials regardless of the
    /// server's answer.
    pub async fn logout(&self) {
        if let Err(e) = self.execute(ApiRequest::post(LOGOUT_PATH, None)).await {
            tracing::warn!(error = %e, "server logout failed; clearing local session anyway");
        }
        self.clear_local();
    }

    /// Wipe the persisted snapshot.
    pub fn clear_local(&self) {
        self.persist("clear", CredentialStore::clear);
    }

    fn current_user_id(&self) -> Option<UserId> {
        match self.store.load() {
            Ok(snapshot) => snapshot.user_id().cloned(),
            Err(e) => {
                tracing::warn!(error = %e, "stored user unreadable");
                None
            }
        }
    }

    fn persist<F>(&self, op: &'static str, f: F)
    where
        F: FnOnce(&CredentialStore) -> Result<(), crate::storage::StorageError>,
    {
        if let Err(e) = f(&self.store) {
            tracing::warn!(op, error = %e, "credential store write failed");
        }
    }
}

// =============================================================================
// RESPONSE NORMALIZATION
// =============================================================================

fn rejected<T>(err: &SessionError, fallback: &str) -> Outcome<T> {
    Outcome::Failure { message: err.user_message(fallback) }
}

fn envelope_succeeded(body: &Value) -> bool {
    body.get("status").and_then(Value::as_str) == Some("success")
}

/// The user object of a response: `profile` for login, `data` elsewhere.
fn user_value(body: &Value) -> Option<&Value> {
    ["profile", "data"]
        .into_iter()
        .filter_map(|key| body.get(key))
        .find(|value| value.is_object())
}

fn decode_user(body: &Value) -> Result<UserProfile, SessionError> {
    let raw = user_value(body).ok_or_else(|| SessionError::Decode("response carries no user profile".to_owned()))?;
    serde_json::from_value(raw.clone()).map_err(|e| SessionError::Decode(format!("invalid user profile: {e}")))
}

/// Codes listed at the top level of the body, or nested in the user object.
fn codes_from_body(body: &Value, key: &str) -> Vec<String> {
    body.get(key)
        .filter(|value| value.is_array())
        .or_else(|| user_value(body).and_then(|user| user.get(key)))
        .map(codes_from_value)
        .unwrap_or_default()
}

fn grant_from_body(body: &Value) -> Result<SessionGrant, SessionError> {
    let mut user = decode_user(body)?;
    // Nested role objects are represented by the code sets.
    user.extra.remove(ROLES_KEY);
    user.extra.remove(PERMISSIONS_KEY);
    Ok(SessionGrant {
        user,
        roles: codes_from_body(body, ROLES_KEY),
        permissions: codes_from_body(body, PERMISSIONS_KEY),
    })
}
