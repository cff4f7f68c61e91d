//! Access gate: role-based visibility of UI elements.
//!
//! SYSTEM CONTEXT
//! ==============
//! The rendering layer attaches a [`RoleBinding`] to an element and asks for
//! its [`Visibility`] on mount and on every update. Nothing is cached: each
//! evaluation reads the current session state.
//!
//! Policy:
//! 1. no requirement (or an empty single code) -> visible
//! 2. requirement, not signed in -> hidden
//! 3. default -> visible iff any required role is held
//! 4. `all` modifier -> visible iff every required role is held (an empty
//!    list is vacuously satisfied)

#[cfg(test)]
#[path = "gate_test.rs"]
mod tests;

use crate::model::Authorization;

/// Required roles: one code or a list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoleRequirement {
    One(String),
    Many(Vec<String>),
}

impl RoleRequirement {
    #[must_use]
    pub fn codes(&self) -> &[String] {
        match self {
            Self::One(code) => std::slice::from_ref(code),
            Self::Many(codes) => codes,
        }
    }
}

impl From<&str> for RoleRequirement {
    fn from(code: &str) -> Self {
        Self::One(code.to_owned())
    }
}

impl From<String> for RoleRequirement {
    fn from(code: String) -> Self {
        Self::One(code)
    }
}

impl From<Vec<String>> for RoleRequirement {
    fn from(codes: Vec<String>) -> Self {
        Self::Many(codes)
    }
}

impl From<&[&str]> for RoleRequirement {
    fn from(codes: &[&str]) -> Self {
        Self::Many(codes.iter().map(|c| (*c).to_owned()).collect())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BindingModifiers {
    /// Require every role instead of any.
    pub all: bool,
}

/// Declarative role requirement attached to an element.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleBinding {
    pub value: Option<RoleRequirement>,
    pub modifiers: BindingModifiers,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

impl Visibility {
    #[must_use]
    pub fn is_visible(self) -> bool {
        self == Self::Visible
    }

    /// CSS `display` value for the element.
    #[must_use]
    pub fn display(self) -> &'static str {
        match self {
            Self::Visible => "",
            Self::Hidden => "none",
        }
    }
}

impl RoleBinding {
    /// Visible to anyone.
    #[must_use]
    pub fn open() -> Self {
        Self::default()
    }

    /// Visible with at least one of `required`.
    #[must_use]
    pub fn any(required: impl Into<RoleRequirement>) -> Self {
        Self { value: Some(required.into()), modifiers: BindingModifiers::default() }
    }

    /// Visible only with every one of `required`.
    #[must_use]
    pub fn all(required: impl Into<RoleRequirement>) -> Self {
        Self { value: Some(required.into()), modifiers: BindingModifiers { all: true } }
    }

    #[must_use]
    pub fn evaluate(&self, auth: &impl Authorization) -> Visibility {
        let required = match &self.value {
            None => return Visibility::Visible,
            Some(RoleRequirement::One(code)) if code.is_empty() => return Visibility::Visible,
            Some(required) => required,
        };
        if !auth.is_logged_in() {
            return Visibility::Hidden;
        }
        let codes = required.codes();
        let granted = if self.modifiers.all {
            auth.has_all_roles(codes)
        } else {
            auth.has_any_role(codes)
        };
        if granted { Visibility::Visible } else { Visibility::Hidden }
    }
}

/// An element under a role binding, tracking its last applied visibility.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatedElement {
    binding: RoleBinding,
    visibility: Visibility,
}

impl GatedElement {
    /// Evaluate `binding` when the element is mounted.
    #[must_use]
    pub fn mounted(binding: RoleBinding, auth: &impl Authorization) -> Self {
        let visibility = binding.evaluate(auth);
        Self { binding, visibility }
    }

    /// Re-evaluate after the binding or the session changed.
    pub fn updated(&mut self, binding: RoleBinding, auth: &impl Authorization) -> Visibility {
        self.visibility = binding.evaluate(auth);
        self.binding = binding;
        self.visibility
    }

    /// Re-evaluate the current binding against fresh session state.
    pub fn refresh(&mut self, auth: &impl Authorization) -> Visibility {
        self.visibility = self.binding.evaluate(auth);
        self.visibility
    }

    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }
}
