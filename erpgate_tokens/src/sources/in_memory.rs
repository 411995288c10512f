//! An in-memory credential store

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::CredentialStore;
use crate::{error::StoreError, RefreshToken, RefreshTokenRef};

/// An in-memory credential store
///
/// Nothing survives a restart. Clones share the same slot, which lets a
/// handle kept outside of a token manager observe what the manager persisted.
#[derive(Clone, Default, Debug)]
pub struct InMemoryCredentialStore {
    token: Arc<Mutex<Option<RefreshToken>>>,
}

impl InMemoryCredentialStore {
    /// Constructs a new, empty in-memory credential store
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs an in-memory credential store seeded with a refresh token
    pub fn with_refresh_token(refresh_token: RefreshToken) -> Self {
        Self {
            token: Arc::new(Mutex::new(Some(refresh_token))),
        }
    }

    /// The refresh token currently held
    pub async fn refresh_token(&self) -> Option<RefreshToken> {
        self.token.lock().await.clone()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&mut self) -> Result<Option<RefreshToken>, StoreError> {
        Ok(self
            .token
            .lock()
            .await
            .clone()
            .filter(|t| !t.as_str().trim().is_empty()))
    }

    async fn persist(&mut self, refresh_token: &RefreshTokenRef) -> Result<(), StoreError> {
        *self.token.lock().await = Some(refresh_token.to_owned());
        Ok(())
    }
}
