//! Username-only login.
//!
//! There are no passwords: logging in with an unknown username registers it.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use chat_core::User;

use crate::store::{ChatStore, StoreError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Username cannot be empty")]
    EmptyUsername,

    #[error("Authentication failed: {0}")]
    Storage(#[from] StoreError),
}

pub type AuthResult<T> = Result<T, AuthError>;

pub struct AuthService {
    store: Arc<dyn ChatStore>,
}

impl AuthService {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Looks up an existing user.
    pub async fn authenticate(&self, username: &str) -> AuthResult<Option<User>> {
        let username = require_username(username)?;
        Ok(self.store.find_user_by_username(username).await?)
    }

    /// Creates a user. Fails with `Storage(Conflict)` if the name is taken.
    pub async fn register(&self, username: &str) -> AuthResult<User> {
        let username = require_username(username)?;
        let user = self.store.create_user(username).await?;
        info!(user_id = %user.id, username = %user.username, "Registered user");
        Ok(user)
    }

    /// Returns the user for `username`, registering it on first use.
    pub async fn login(&self, username: &str) -> AuthResult<User> {
        if let Some(user) = self.authenticate(username).await? {
            debug!(user_id = %user.id, "Existing user logged in");
            return Ok(user);
        }

        match self.register(username).await {
            Ok(user) => Ok(user),
            // Lost a registration race to a concurrent login
            Err(AuthError::Storage(StoreError::Conflict(reason))) => {
                warn!(reason = %reason, "Registration raced, re-reading user");
                self.authenticate(username)
                    .await?
                    .ok_or(AuthError::Storage(StoreError::Conflict(reason)))
            }
            Err(e) => Err(e),
        }
    }
}

/// Rejects blank names. The name is otherwise used exactly as given.
fn require_username(username: &str) -> AuthResult<&str> {
    if username.trim().is_empty() {
        return Err(AuthError::EmptyUsername);
    }
    Ok(username)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> AuthService {
        AuthService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_login_registers_then_reuses() {
        let auth = service();
        let first = auth.login("alice").await.unwrap();
        let second = auth.login("alice").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_username_kept_verbatim() {
        let auth = service();
        let padded = auth.login("bob ").await.unwrap();
        assert_eq!(padded.username, "bob ");

        let plain = auth.login("bob").await.unwrap();
        assert_ne!(plain.id, padded.id);
        assert_eq!(auth.login("bob ").await.unwrap().id, padded.id);
    }

    #[tokio::test]
    async fn test_blank_username_rejected() {
        let auth = service();
        assert!(matches!(auth.login("   ").await, Err(AuthError::EmptyUsername)));
        assert!(matches!(auth.register("").await, Err(AuthError::EmptyUsername)));
    }

    #[tokio::test]
    async fn test_register_duplicate_conflicts() {
        let auth = service();
        auth.register("carol").await.unwrap();
        assert!(matches!(
            auth.register("carol").await,
            Err(AuthError::Storage(StoreError::Conflict(_)))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_unknown_is_none() {
        let auth = service();
        assert!(auth.authenticate("nobody").await.unwrap().is_none());
    }
}
