//! Token manager configuration

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use erpgate_clock::DurationSecs;

use crate::{
    error::ConfigError,
    sources::file::{resolve_path, DEFAULT_REFRESH_TOKEN_PATH},
    tokens::{DEFAULT_ISSUANCE_MARGIN, DEFAULT_RENEWAL_BUFFER},
    ClientId, ClientSecret, TokenLifetimeConfig,
};

/// Default timeout for a single exchange with the token endpoint
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`TokenManager`][crate::TokenManager]
///
/// The token URL, client ID, client secret, and refresh token location are
/// all required. [`validate()`][Self::validate] rejects the configuration if
/// any of them is blank.
#[derive(Clone, Debug)]
pub struct TokenManagerConfig {
    token_url: String,
    client_id: ClientId,
    client_secret: ClientSecret,
    base_dir: PathBuf,
    refresh_token_path: PathBuf,
    http_timeout: Duration,
    issuance_margin: DurationSecs,
    renewal_buffer: DurationSecs,
}

impl TokenManagerConfig {
    /// Constructs a configuration with the default refresh token location and timings
    ///
    /// The refresh token is kept in `.refresh-token` relative to the current
    /// working directory unless changed with [`with_base_dir()`][Self::with_base_dir]
    /// or [`with_refresh_token_path()`][Self::with_refresh_token_path].
    pub fn new(
        token_url: impl Into<String>,
        client_id: ClientId,
        client_secret: ClientSecret,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id,
            client_secret,
            base_dir: PathBuf::from("."),
            refresh_token_path: PathBuf::from(DEFAULT_REFRESH_TOKEN_PATH),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            issuance_margin: DEFAULT_ISSUANCE_MARGIN,
            renewal_buffer: DEFAULT_RENEWAL_BUFFER,
        }
    }

    /// Sets the directory that a relative refresh token path is resolved against
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Sets the refresh token location, either absolute or relative to the base directory
    #[must_use]
    pub fn with_refresh_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.refresh_token_path = path.into();
        self
    }

    /// Sets the timeout for a single exchange with the token endpoint
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the issuance margin and renewal buffer
    #[must_use]
    pub fn with_lifetime(mut self, issuance_margin: DurationSecs, renewal_buffer: DurationSecs) -> Self {
        self.issuance_margin = issuance_margin;
        self.renewal_buffer = renewal_buffer;
        self
    }

    /// The client ID
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The client secret
    pub fn client_secret(&self) -> &ClientSecret {
        &self.client_secret
    }

    /// The timeout for a single exchange with the token endpoint
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// The refresh token location after resolving it against the base directory
    pub fn resolved_refresh_token_path(&self) -> PathBuf {
        resolve_path(&self.base_dir, &self.refresh_token_path)
    }

    /// The lifetime policy described by this configuration
    pub fn lifetime_config(&self) -> TokenLifetimeConfig {
        TokenLifetimeConfig::new(self.issuance_margin, self.renewal_buffer)
    }

    /// Checks that every required value is present and parses the token URL
    pub fn validate(&self) -> Result<reqwest::Url, ConfigError> {
        if self.token_url.trim().is_empty() {
            return Err(ConfigError::Blank("token_url"));
        }
        if self.client_id.as_str().trim().is_empty() {
            return Err(ConfigError::Blank("client_id"));
        }
        if self.client_secret.as_str().trim().is_empty() {
            return Err(ConfigError::Blank("client_secret"));
        }
        if is_blank(&self.refresh_token_path) {
            return Err(ConfigError::Blank("refresh_token_path"));
        }

        reqwest::Url::parse(self.token_url.trim()).map_err(|err| ConfigError::InvalidTokenUrl {
            url: self.token_url.clone(),
            reason: err.to_string(),
        })
    }
}

fn is_blank(path: &Path) -> bool {
    path.to_str().map_or(false, |p| p.trim().is_empty())
}
