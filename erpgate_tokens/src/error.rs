//! Errors raised while managing access tokens

use std::{io, path::PathBuf, sync::Arc};

use thiserror::Error;

/// An error while obtaining an access token
///
/// Errors are cheaply cloneable so that a single failed refresh can be
/// reported to every caller that was waiting on it.
#[derive(Clone, Debug, Error)]
pub enum TokenError {
    /// The manager's configuration is incomplete or malformed
    #[error("invalid token manager configuration: {0}")]
    ConfigurationInvalid(#[from] ConfigError),

    /// The authority rejected an authorization code exchange
    #[error("authorization code exchange rejected by authority with status {status}: {body}")]
    TokenExchangeFailed {
        /// The HTTP status returned by the authority
        status: u16,
        /// The raw response body
        body: String,
    },

    /// The authority rejected a refresh token grant
    #[error("refresh token grant rejected by authority with status {status}: {body}")]
    TokenRefreshFailed {
        /// The HTTP status returned by the authority
        status: u16,
        /// The raw response body
        body: String,
    },

    /// A value supplied for an exchange was blank
    #[error("`{0}` must not be blank")]
    InvalidInput(&'static str),

    /// There is neither a cached grant nor a refresh token to renew one with
    #[error("no access token available; an authorization code exchange is required")]
    NoAccessTokenAvailable,

    /// The authority could not be reached or the exchange timed out
    #[error("unable to communicate with the token authority")]
    Connectivity(#[source] Arc<reqwest::Error>),

    /// The authority answered with a body that is not a usable grant
    #[error("unable to parse token response from authority")]
    InvalidResponse(#[source] Arc<serde_json::Error>),

    /// The caller stopped waiting for the operation
    #[error("token request was cancelled")]
    Cancelled,

    /// The task performing the exchange terminated abnormally
    #[error("token exchange task terminated abnormally")]
    ExchangeTaskFailed,
}

impl TokenError {
    /// Whether the authority was unreachable, as opposed to having rejected the credential
    pub fn is_connectivity(&self) -> bool {
        matches!(self, TokenError::Connectivity(_))
    }

    /// The HTTP status returned by the authority when it rejected a grant
    pub fn status(&self) -> Option<u16> {
        match self {
            TokenError::TokenExchangeFailed { status, .. }
            | TokenError::TokenRefreshFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A problem with the token manager configuration
#[derive(Clone, Debug, Error)]
pub enum ConfigError {
    /// A required value was blank
    #[error("`{0}` must not be blank")]
    Blank(&'static str),

    /// The token endpoint is not a valid URL
    #[error("token URL `{url}` is invalid: {reason}")]
    InvalidTokenUrl {
        /// The offending URL
        url: String,
        /// Why the URL was rejected
        reason: String,
    },

    /// The HTTP client could not be constructed
    #[error("unable to build HTTP client: {0}")]
    HttpClient(String),
}

/// An error while reading or writing the persisted refresh token
#[derive(Debug, Error)]
#[error("unable to access credential store at {}", .path.display())]
pub struct StoreError {
    path: PathBuf,
    #[source]
    source: io::Error,
}

impl StoreError {
    pub(crate) fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }

    /// The location of the credential store
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}
