//! The contract between outbound ERP calls and whatever provides their tokens

use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::TokenError, AccessToken};

/// Supplies a currently valid bearer token before each outbound ERP request
///
/// Call sites depend on this trait rather than on the token manager, so they
/// never see or mutate cached grant state.
#[async_trait]
pub trait AccessTokenSupplier: Send + Sync {
    /// Gets an access token that is valid for long enough to complete a request
    async fn access_token(&self) -> Result<AccessToken, TokenError>;
}

#[async_trait]
impl<T: AccessTokenSupplier + ?Sized> AccessTokenSupplier for Arc<T> {
    async fn access_token(&self) -> Result<AccessToken, TokenError> {
        (**self).access_token().await
    }
}

/// A supplier that always hands out the same token
///
/// Useful for tests and for local development against a sandbox ERP.
#[derive(Clone, Debug)]
pub struct ConstTokenSupplier {
    token: AccessToken,
}

impl ConstTokenSupplier {
    /// Constructs a supplier for a fixed access token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token.into()),
        }
    }
}

#[async_trait]
impl AccessTokenSupplier for ConstTokenSupplier {
    async fn access_token(&self) -> Result<AccessToken, TokenError> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shared_supplier_delegates() {
        let supplier: Arc<dyn AccessTokenSupplier> = Arc::new(ConstTokenSupplier::new("fixed"));

        assert_eq!(supplier.access_token().await.unwrap().as_str(), "fixed");
        assert_eq!(Arc::clone(&supplier).access_token().await.unwrap().as_str(), "fixed");
    }
}
