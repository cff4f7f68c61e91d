//! Error types for session operations.
//!
//! ERROR HANDLING
//! ==============
//! Expected authentication failures (bad credentials, validation) never reach
//! this type; they are reported as [`crate::model::Outcome::Failure`]. What
//! lands here is the invalidation signal and transport or server failures.
//! Credential-store writes are best-effort and only logged.

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

/// Errors produced by the session client and state machine.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The server rejected the session (HTTP 401). The interceptor has
    /// already run the invalidation cycle when this is returned.
    #[error("session is no longer valid")]
    Unauthorized,

    /// The request never produced an HTTP response.
    #[error("request failed: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// An operation needs a known user id but the store has none.
    #[error("no current user")]
    MissingUser,

    /// A success response did not carry the expected payload.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl SessionError {
    /// Human-readable text suitable for inline display next to a form.
    ///
    /// Server-provided messages are passed through; everything else falls
    /// back to `fallback`.
    #[must_use]
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Server { message, .. } if !message.is_empty() => message.clone(),
            Self::Unauthorized => "Your session has expired".to_owned(),
            Self::MissingUser => "No user is signed in".to_owned(),
            _ => fallback.to_owned(),
        }
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for 4xx responses other than 401: validation and credential
    /// rejections that the caller should see as a failed outcome.
    #[must_use]
    pub fn is_client_rejection(&self) -> bool {
        matches!(self, Self::Server { status: 400..=499, .. })
    }
}
