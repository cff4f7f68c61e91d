//! Route guards consulted before navigation.
//!
//! SYSTEM CONTEXT
//! ==============
//! The router calls [`RouteGuard::check`] with the navigation target and
//! follows the returned decision. Guards only read the session; they never
//! trigger network access.

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;

use crate::model::Authorization;
use crate::session::Session;

pub const HOME_ROUTE: &str = "/";
pub const UNAUTHORIZED_ROUTE: &str = "/unauthorized";

/// Where the user is trying to go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavigationTarget {
    /// Route name, if the router uses named routes.
    pub name: Option<String>,
    /// Path including query string, kept for post-login continuation.
    pub full_path: String,
}

impl NavigationTarget {
    #[must_use]
    pub fn path(full_path: impl Into<String>) -> Self {
        Self { name: None, full_path: full_path.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteGuard {
    /// Signed-in users only.
    Auth,
    /// Signed-out users only (login, registration pages).
    Guest,
    /// Signed in with at least one of the roles.
    AnyRole(Vec<String>),
    /// Signed in with at least one of the permissions.
    AnyPermission(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    /// Sign in first, then continue to `redirect`.
    RedirectToLogin { redirect: String },
    RedirectToHome,
    Unauthorized,
}

impl RouteGuard {
    /// Decide whether navigation to `to` may proceed.
    #[must_use]
    pub fn check(&self, auth: &impl Authorization, to: &NavigationTarget) -> GuardDecision {
        let logged_in = auth.is_logged_in();
        match self {
            Self::Guest if logged_in => GuardDecision::RedirectToHome,
            Self::Guest => GuardDecision::Proceed,
            _ if !logged_in => GuardDecision::RedirectToLogin { redirect: to.full_path.clone() },
            Self::Auth => GuardDecision::Proceed,
            Self::AnyRole(codes) if !auth.has_any_role(codes.as_slice()) => GuardDecision::Unauthorized,
            Self::AnyPermission(codes) if !auth.has_any_permission(codes.as_slice()) => GuardDecision::Unauthorized,
            Self::AnyRole(_) | Self::AnyPermission(_) => GuardDecision::Proceed,
        }
    }
}

impl GuardDecision {
    /// Path to navigate to instead, or `None` to proceed.
    #[must_use]
    pub fn location(&self, login_route: &str) -> Option<String> {
        match self {
            Self::Proceed => None,
            Self::RedirectToLogin { redirect } => Some(login_location(login_route, Some(redirect))),
            Self::RedirectToHome => Some(HOME_ROUTE.to_owned()),
            Self::Unauthorized => Some(UNAUTHORIZED_ROUTE.to_owned()),
        }
    }
}

/// Check `guard` against the live session; on success record `to` as the
/// user's location so a later invalidation can send them back there.
#[must_use]
pub fn guard_navigation(session: &Session, guard: &RouteGuard, to: &NavigationTarget) -> GuardDecision {
    let decision = guard.check(session, to);
    if decision == GuardDecision::Proceed {
        session.record_location(&to.full_path);
    }
    decision
}

/// Login route with an optional percent-encoded `redirect` query parameter.
#[must_use]
pub fn login_location(login_route: &str, redirect: Option<&str>) -> String {
    match redirect {
        Some(target) if !target.is_empty() => {
            format!("{login_route}?redirect={}", urlencoding::encode(target))
        }
        _ => login_route.to_owned(),
    }
}
