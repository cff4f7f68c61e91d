//! Client-side session and authorization layer.
//!
//! ARCHITECTURE
//! ============
//! Leaves first:
//! - [`store`]: durable key-value projection of the session snapshot
//! - [`client`]: auth API calls, response normalization, 401 interception
//! - [`session`]: in-memory state machine, predicates, navigation intents
//! - [`gate`] and [`guard`]: role visibility for elements, route guards
//!
//! Data flows one way into the session (from client responses, or from the
//! store at startup) and one way out to gates, guards and event subscribers.

pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod guard;
pub mod model;
pub mod net;
pub mod session;
pub mod storage;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use client::{InvalidationHook, SessionClient, SessionGrant};
pub use config::SessionConfig;
pub use error::SessionError;
pub use gate::{GatedElement, RoleBinding, RoleRequirement, Visibility};
pub use guard::{GuardDecision, NavigationTarget, RouteGuard};
pub use model::{Authorization, Outcome, SessionSnapshot, UserId, UserProfile};
pub use session::{NavigationIntent, Session, SessionEvent, SessionPhase, SessionState};
pub use store::CredentialStore;
