//! Session data model shared by the store, client and state machine.
//!
//! DESIGN
//! ======
//! `SessionSnapshot` is the durable projection of who is signed in. Runtime
//! flags (`loading`, `error`) live on the state machine only. The
//! "authenticated implies user" invariant is enforced by
//! [`SessionSnapshot::is_authenticated`], which every read path goes through.

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// USER PROFILE
// =============================================================================

/// Server-assigned user identifier. APIs hand out either numbers or strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Int(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// A user profile as returned by the API.
///
/// Only `id`, `name` and `email` are interpreted; every other field is kept
/// in `extra` so re-persisting a profile never drops server data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// Display name, or an empty string when the profile has none.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// Email address, or an empty string when the profile has none.
    #[must_use]
    pub fn display_email(&self) -> &str {
        self.email.as_deref().unwrap_or_default()
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Who is signed in and with which roles and permissions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub user: Option<UserProfile>,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
    pub authenticated: bool,
}

impl SessionSnapshot {
    /// Snapshot for a freshly authenticated user.
    #[must_use]
    pub fn signed_in<R, P>(user: UserProfile, roles: R, permissions: P) -> Self
    where
        R: IntoIterator<Item = String>,
        P: IntoIterator<Item = String>,
    {
        Self {
            user: Some(user),
            roles: roles.into_iter().collect(),
            permissions: permissions.into_iter().collect(),
            authenticated: true,
        }
    }

    /// True only when the flag is set *and* a user is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated && self.user.is_some()
    }

    /// Identifier of the current user, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.user.as_ref().and_then(|u| u.id.as_ref())
    }
}

// =============================================================================
// AUTHORIZATION QUERIES
// =============================================================================

/// Flat role / permission membership checks.
///
/// Implemented by anything that can answer "who is signed in": the snapshot
/// itself, the runtime state, and the live session handle.
pub trait Authorization {
    /// Whether a user is signed in.
    fn is_logged_in(&self) -> bool;

    /// Whether the session holds role `code`.
    fn has_role(&self, code: &str) -> bool;

    /// Whether the session holds permission `code`.
    fn has_permission(&self, code: &str) -> bool;

    /// At least one of `codes` is held. Empty input is `false`.
    fn has_any_role<S: AsRef<str>>(&self, codes: &[S]) -> bool {
        codes.iter().any(|code| self.has_role(code.as_ref()))
    }

    /// Every one of `codes` is held. Empty input is vacuously `true`.
    fn has_all_roles<S: AsRef<str>>(&self, codes: &[S]) -> bool {
        codes.iter().all(|code| self.has_role(code.as_ref()))
    }

    /// At least one of `codes` is held. Empty input is `false`.
    fn has_any_permission<S: AsRef<str>>(&self, codes: &[S]) -> bool {
        codes.iter().any(|code| self.has_permission(code.as_ref()))
    }
}

impl Authorization for SessionSnapshot {
    fn is_logged_in(&self) -> bool {
        self.is_authenticated()
    }

    fn has_role(&self, code: &str) -> bool {
        self.roles.contains(code)
    }

    fn has_permission(&self, code: &str) -> bool {
        self.permissions.contains(code)
    }
}

// =============================================================================
// OPERATION OUTCOME
// =============================================================================

/// Result of an operation whose failure is an expected, user-facing case.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Success { payload: T, message: Option<String> },
    Failure { message: String },
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Server message for successes, failure text for failures.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success { message, .. } => message.as_deref(),
            Self::Failure { message } => Some(message),
        }
    }

    #[must_use]
    pub fn payload(self) -> Option<T> {
        match self {
            Self::Success { payload, .. } => Some(payload),
            Self::Failure { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Success { payload, message } => Outcome::Success { payload: f(payload), message },
            Self::Failure { message } => Outcome::Failure { message },
        }
    }
}

// =============================================================================
// CODE NORMALIZATION
// =============================================================================

/// Normalize a role/permission array into codes.
///
/// Entries may be plain strings or objects carrying a `code` field; anything
/// else is skipped. A non-array value yields no codes.
#[must_use]
pub fn codes_from_value(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(code) => Some(code.clone()),
            Value::Object(obj) => obj.get("code").and_then(Value::as_str).map(str::to_owned),
            _ => None,
        })
        .collect()
}
