//! Caller identity
//!
//! Authentication happens upstream; this layer only receives the outcome:
//! an opaque user id (or none) and whether the caller holds admin privilege.

/// The identity an operation runs on behalf of
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    user_id: Option<String>,
    admin: bool,
}

impl Caller {
    /// Unauthenticated caller
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Authenticated end user
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: Some(id.into()),
            admin: false,
        }
    }

    /// Authenticated operator with admin privilege
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            user_id: Some(id.into()),
            admin: true,
        }
    }

    /// The caller's opaque id, if authenticated
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Whether the caller may read credential columns
    pub fn is_admin(&self) -> bool {
        self.admin
    }
}
