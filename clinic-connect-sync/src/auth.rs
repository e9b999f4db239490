//! Authentication context
//!
//! Supplies the current user id to every store call and to the read-state
//! logic. Clones share the authenticated flag, so logging out through any
//! clone stops every poll loop that holds one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Current user and login state
#[derive(Debug, Clone)]
pub struct AuthContext {
    user_id: String,
    token: Option<String>,
    authenticated: Arc<AtomicBool>,
}

impl AuthContext {
    /// Create an authenticated context for `user_id`
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: None,
            authenticated: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Attach a bearer token forwarded to the store
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Log out. Visible to all clones.
    pub fn logout(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
    }

    /// Log back in after a logout
    pub fn login(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logout_is_shared_between_clones() {
        let auth = AuthContext::new("doctor-1").with_token("secret");
        let clone = auth.clone();
        assert!(clone.is_authenticated());
        assert_eq!(clone.token(), Some("secret"));

        auth.logout();
        assert!(!clone.is_authenticated());

        clone.login();
        assert!(auth.is_authenticated());
    }
}
