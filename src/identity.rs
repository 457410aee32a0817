//! Ambient "current user" used for audit stamping.

/// Source of the current user's name.
///
/// Implement this over whatever carries identity in the host application
/// (request extensions, a task-local, a session). `None` means anonymous, in
/// which case audit fields are left untouched.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<String>;
}

/// No user: audit fields are never stamped.
#[derive(Clone, Copy, Debug, Default)]
pub struct Anonymous;

impl IdentityProvider for Anonymous {
    fn current_user(&self) -> Option<String> {
        None
    }
}

/// A fixed user name, for batch jobs and tests.
#[derive(Clone, Debug)]
pub struct StaticIdentity(String);

impl StaticIdentity {
    pub fn new(user: impl Into<String>) -> Self {
        StaticIdentity(user.into())
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_providers() {
        assert_eq!(Anonymous.current_user(), None);
        assert_eq!(
            StaticIdentity::new("alice").current_user().as_deref(),
            Some("alice")
        );
    }
}
