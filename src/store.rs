//! Credential store: the durable projection of the session snapshot.
//!
//! SYSTEM CONTEXT
//! ==============
//! Both the session client (after successful API calls) and the state
//! machine (on logout and rehydration) persist through this type; nothing
//! else touches the storage keys. Persistence is local and best-effort with
//! no expiry metadata: a stale session is only discovered when the server
//! rejects a request.
//!
//! Keys are shared with the browser build and must stay bit-exact:
//! `user`, `roles`, `permissions` hold JSON; `isAuthenticated` holds the
//! literal `"true"` or is absent.

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;

use std::sync::Arc;

use serde_json::Value;

use crate::model::{SessionSnapshot, UserProfile, codes_from_value};
use crate::storage::{KeyValueStorage, MemoryStorage, StorageError};

pub const USER_KEY: &str = "user";
pub const ROLES_KEY: &str = "roles";
pub const PERMISSIONS_KEY: &str = "permissions";
pub const AUTHENTICATED_KEY: &str = "isAuthenticated";

const AUTHENTICATED_VALUE: &str = "true";
const ALL_KEYS: [&str; 4] = [USER_KEY, ROLES_KEY, PERMISSIONS_KEY, AUTHENTICATED_KEY];

/// Typed access to the four persisted session keys.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

impl CredentialStore {
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Store backed by a fresh [`MemoryStorage`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Persist every field of `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns the first backend failure; earlier keys may already be written.
    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        match &snapshot.user {
            Some(user) => self.save_user(user)?,
            None => self.storage.remove_item(USER_KEY)?,
        }
        self.storage
            .set_item(ROLES_KEY, &serde_json::to_string(&snapshot.roles)?)?;
        self.storage
            .set_item(PERMISSIONS_KEY, &serde_json::to_string(&snapshot.permissions)?)?;
        self.set_authenticated(snapshot.authenticated)
    }

    /// Persist the user profile only; roles and permissions are untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the backend write fails.
    pub fn save_user(&self, user: &UserProfile) -> Result<(), StorageError> {
        self.storage.set_item(USER_KEY, &serde_json::to_string(user)?)
    }

    /// Remove the role and permission keys, leaving user and flag alone.
    ///
    /// # Errors
    ///
    /// Returns the first backend failure.
    pub fn clear_codes(&self) -> Result<(), StorageError> {
        self.storage.remove_item(ROLES_KEY)?;
        self.storage.remove_item(PERMISSIONS_KEY)
    }

    /// Set or remove the authenticated flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub fn set_authenticated(&self, authenticated: bool) -> Result<(), StorageError> {
        if authenticated {
            self.storage.set_item(AUTHENTICATED_KEY, AUTHENTICATED_VALUE)
        } else {
            self.storage.remove_item(AUTHENTICATED_KEY)
        }
    }

    /// Remove all four keys.
    ///
    /// Every key is attempted even if an earlier removal fails.
    ///
    /// # Errors
    ///
    /// Returns the first removal failure.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut first_err = None;
        for key in ALL_KEYS {
            if let Err(e) = self.storage.remove_item(key) {
                tracing::warn!(key, error = %e, "failed to clear credential key");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Raw flag check: `isAuthenticated` holds exactly `"true"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    pub fn is_flagged(&self) -> Result<bool, StorageError> {
        Ok(self.storage.get_item(AUTHENTICATED_KEY)?.as_deref() == Some(AUTHENTICATED_VALUE))
    }

    /// Decode the stored snapshot. Missing keys read as empty.
    ///
    /// The returned snapshot only carries `authenticated = true` when a user
    /// is present as well.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupt`] when a key holds undecodable JSON.
    pub fn load(&self) -> Result<SessionSnapshot, StorageError> {
        let user = match self.storage.get_item(USER_KEY)? {
            Some(raw) => serde_json::from_str::<Option<UserProfile>>(&raw)
                .map_err(|e| StorageError::Corrupt { key: USER_KEY, reason: e.to_string() })?,
            None => None,
        };
        let roles = self.load_codes(ROLES_KEY)?;
        let permissions = self.load_codes(PERMISSIONS_KEY)?;
        let authenticated = self.is_flagged()? && user.is_some();

        Ok(SessionSnapshot {
            user,
            roles: roles.into_iter().collect(),
            permissions: permissions.into_iter().collect(),
            authenticated,
        })
    }

    fn load_codes(&self, key: &'static str) -> Result<Vec<String>, StorageError> {
        let Some(raw) = self.storage.get_item(key)? else {
            return Ok(Vec::new());
        };
        let value: Value =
            serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt { key, reason: e.to_string() })?;
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(_) => Ok(codes_from_value(&value)),
            other => Err(StorageError::Corrupt { key, reason: format!("expected array, found {other}") }),
        }
    }
}
