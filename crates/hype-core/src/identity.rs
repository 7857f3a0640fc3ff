//! Identity service boundary.
//!
//! The relay never sees passwords. A login flow outside this crate issues an
//! opaque access token per user; the handshake presents it back and the
//! [`Identity`] implementation turns it into a [`User`].

use crate::store::{Store, StoreError};
use crate::user::{validate_display_name, Credentials, User};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown user or wrong token.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The display name is not acceptable.
    #[error("Invalid display name: {0}")]
    InvalidName(&'static str),

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Error code reported to clients.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            AuthError::Store(e) => e.code(),
            _ => 1003,
        }
    }
}

/// Authenticates users and resolves display names.
#[async_trait]
pub trait Identity: Send + Sync {
    /// Turn handshake credentials into an authenticated user.
    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthError>;

    /// Resolve a display name to a user, if it exists.
    async fn resolve(&self, display_name: &str) -> Result<Option<User>, StoreError>;
}

/// [`Identity`] backed by the user table of a [`Store`].
pub struct StoreIdentity {
    store: Arc<dyn Store>,
    auto_register: bool,
}

impl StoreIdentity {
    /// Create an identity service over `store`.
    ///
    /// With `auto_register`, an unknown name is registered on first connect
    /// with the presented token.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, auto_register: bool) -> Self {
        Self {
            store,
            auto_register,
        }
    }
}

#[async_trait]
impl Identity for StoreIdentity {
    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthError> {
        validate_display_name(&credentials.username).map_err(AuthError::InvalidName)?;
        if credentials.token.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        if let Some(user) = self
            .store
            .verify_token(&credentials.username, &credentials.token)
            .await?
        {
            return Ok(user);
        }

        if !self.auto_register {
            debug!(user = %credentials.username, "Rejected credentials");
            return Err(AuthError::InvalidCredentials);
        }

        match self
            .store
            .insert_user(&credentials.username, &credentials.token)
            .await
        {
            Ok(user) => {
                info!(user = %user.name, id = %user.id, "Registered new user");
                Ok(user)
            }
            // Name exists with another token, or a concurrent registration won.
            Err(StoreError::Conflict(_)) => self
                .store
                .verify_token(&credentials.username, &credentials.token)
                .await?
                .ok_or(AuthError::InvalidCredentials),
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve(&self, display_name: &str) -> Result<Option<User>, StoreError> {
        self.store.user_by_name(display_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_authenticate_existing_user() {
        let store = Arc::new(MemoryStore::new());
        let alice = store.insert_user("alice", "secret").await.unwrap();
        let identity = StoreIdentity::new(store, false);

        let user = identity
            .authenticate(&Credentials::new("alice", "secret"))
            .await
            .unwrap();
        assert_eq!(user, alice);

        assert!(matches!(
            identity
                .authenticate(&Credentials::new("alice", "wrong"))
                .await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            identity.authenticate(&Credentials::new("bob", "x")).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_auto_register() {
        let store = Arc::new(MemoryStore::new());
        let identity = StoreIdentity::new(store.clone(), true);

        let bob = identity
            .authenticate(&Credentials::new("bob", "token"))
            .await
            .unwrap();
        assert_eq!(identity.resolve("bob").await.unwrap(), Some(bob.clone()));

        // Same name, different token: not a takeover.
        assert!(matches!(
            identity
                .authenticate(&Credentials::new("bob", "other"))
                .await,
            Err(AuthError::InvalidCredentials)
        ));
        assert_eq!(
            identity
                .authenticate(&Credentials::new("bob", "token"))
                .await
                .unwrap(),
            bob
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let identity = StoreIdentity::new(Arc::new(MemoryStore::new()), true);

        assert!(matches!(
            identity.authenticate(&Credentials::new("", "t")).await,
            Err(AuthError::InvalidName(_))
        ));
        assert!(matches!(
            identity.authenticate(&Credentials::new("carol", "")).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert_eq!(identity.resolve("nobody").await.unwrap(), None);
    }
}
