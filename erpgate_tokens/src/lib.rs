//! Access token lifecycle management for an OAuth2-protected ERP API
//!
//! Every outbound call to the ERP must carry a bearer token. This crate
//! obtains that token, caches it, renews it shortly before it expires, and
//! keeps the one long-lived credential, the refresh token, on durable
//! storage so that the integration survives restarts.
//!
//! The authority behind the ERP treats a refresh token as spent once it has
//! been used. Two renewals racing with the same refresh token can therefore
//! lock the whole integration out. The [`TokenManager`] guarantees that,
//! however many tasks ask for a token at once, at most one of them talks to
//! the authority; the others wait for and share its result.
//!
//! # General Flow
//!
//! On first setup an operator completes the interactive consent step and the
//! resulting authorization code is exchanged once. From then on the manager
//! renews on demand using the refresh token, which it persists after every
//! grant.
//!
//! ```
//! use erpgate_tokens::{
//!     AuthorizationCode, ClientId, ClientSecret, RedirectUri, TokenManager, TokenManagerConfig,
//! };
//!
//! # async fn setup() -> Result<(), erpgate_tokens::TokenError> {
//! let config = TokenManagerConfig::new(
//!     "https://erp.example.com/oauth/token",
//!     ClientId::from_static("middleware"),
//!     ClientSecret::from_static("secret"),
//! )
//! .with_base_dir("/var/lib/erpgate");
//!
//! let manager = TokenManager::new(config).await?;
//!
//! // Only needed once in the lifetime of the credential.
//! manager
//!     .exchange_authorization_code(
//!         &AuthorizationCode::from_static("code-from-consent-redirect"),
//!         &RedirectUri::from_static("https://middleware.example.com/callback"),
//!     )
//!     .await?;
//!
//! // Before every outbound ERP request:
//! let token = manager.access_token().await?;
//! tracing::debug!(token = format_args!("{:#?}", token), "obtained access token");
//! # Ok(())
//! # }
//! ```
//!
//! Call sites should depend on [`AccessTokenSupplier`] rather than on the
//! manager itself.
//!
//! # Lifetimes
//!
//! When a grant arrives, 60 seconds are subtracted from the lifetime the
//! authority declared, giving the grant's expiry. A grant is handed out until
//! 2 minutes before that expiry; after that the next caller renews it. Both
//! values can be changed through [`TokenLifetimeConfig`].
//!
//! # Limitations
//!
//! Only one process may use a given refresh token location. Two processes
//! sharing it will each renew independently and invalidate each other's
//! refresh tokens at the authority.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod config;
pub mod error;
mod manager;
pub mod sources;
pub mod supplier;
mod tokens;

pub use braids::*;
pub use config::TokenManagerConfig;
pub use error::TokenError;
pub use manager::{until_cancelled, CredentialHealth, TokenManager, TokenState};
pub use supplier::AccessTokenSupplier;
pub use tokens::{
    TokenGrant, TokenLifetimeConfig, TokenStatus, DEFAULT_ISSUANCE_MARGIN, DEFAULT_RENEWAL_BUFFER,
};
