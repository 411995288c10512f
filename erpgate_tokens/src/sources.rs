//! Sources of grants and durable storage for refresh tokens

use async_trait::async_trait;

use crate::{
    error::{StoreError, TokenError},
    AuthorizationCodeRef, RedirectUriRef, RefreshToken, RefreshTokenRef, TokenGrant,
};

pub mod file;
pub mod in_memory;
pub mod oauth2;

pub use file::FileCredentialStore;
pub use in_memory::InMemoryCredentialStore;
pub use oauth2::OAuth2Gateway;

/// An asynchronous source for grants
///
/// Implementations perform a single exchange per call and never retry on
/// their own.
#[async_trait]
pub trait GrantSource: Send + Sync {
    /// Exchanges an authorization code obtained from the interactive consent step
    async fn exchange_authorization_code(
        &self,
        code: &AuthorizationCodeRef,
        redirect_uri: &RedirectUriRef,
    ) -> Result<TokenGrant, TokenError>;

    /// Exchanges a refresh token for a new grant
    ///
    /// The returned grant always carries a refresh token: the rotated one if the
    /// authority issued one, otherwise `refresh_token` itself.
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenGrant, TokenError>;
}

/// Durable storage for the single refresh token
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads the persisted refresh token
    ///
    /// Returns `None` if nothing has been persisted yet or the stored value is blank.
    async fn load(&mut self) -> Result<Option<RefreshToken>, StoreError>;

    /// Replaces the persisted refresh token
    async fn persist(&mut self, refresh_token: &RefreshTokenRef) -> Result<(), StoreError>;
}
