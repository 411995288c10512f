use erpgate_clock::{Clock, DurationSecs, System, UnixTime};

use crate::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef, TokenType, TokenTypeRef};

/// Time subtracted from the authority's declared lifetime when a grant is received
pub const DEFAULT_ISSUANCE_MARGIN: DurationSecs = DurationSecs(60);

/// Time before a grant's expiry at which callers stop being handed its access token
pub const DEFAULT_RENEWAL_BUFFER: DurationSecs = DurationSecs(120);

/// A grant as returned by the authority with computed lifetime information
///
/// Grants are immutable snapshots. The token manager replaces the cached
/// grant wholesale whenever a new one is obtained.
#[derive(Clone, Debug)]
pub struct TokenGrant {
    access_token: AccessToken,
    refresh_token: Option<RefreshToken>,
    token_type: TokenType,
    lifetime: DurationSecs,
    issued: UnixTime,
    stale: UnixTime,
    expires_at: UnixTime,
}

/// A grant's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The access token can be handed out
    Fresh,
    /// The access token is within the renewal buffer and must be renewed before use
    Stale,
    /// The access token is past its margin-adjusted expiry
    Expired,
}

impl TokenStatus {
    /// Whether a grant in this status requires renewal before its access token is used
    #[inline]
    pub fn needs_renewal(self) -> bool {
        !matches!(self, TokenStatus::Fresh)
    }
}

impl TokenGrant {
    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the refresh token carried by this grant, if any
    ///
    /// For grants produced by a refresh, this is the rotated refresh token, or the
    /// one used for the refresh when the authority did not rotate it.
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// Gets the token type
    #[inline]
    pub fn token_type(&self) -> &TokenTypeRef {
        &self.token_type
    }

    /// Gets the lifetime declared by the authority
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// Gets the time that the grant was received
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time from which the access token will no longer be handed out
    #[inline]
    pub fn stale(&self) -> UnixTime {
        self.stale
    }

    /// Gets the margin-adjusted expiry of the access token
    #[inline]
    pub fn expires_at(&self) -> UnixTime {
        self.expires_at
    }

    /// Gets the grant's lifetime status based on the current time
    /// as reported by the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }

    /// Gets the grant's lifetime status as of the provided time
    #[inline]
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.stale {
            TokenStatus::Fresh
        } else if time < self.expires_at {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// Gets a duration for how much longer the grant would be fresh as of the
    /// provided time
    #[inline]
    pub fn until_stale_at(&self, time: UnixTime) -> DurationSecs {
        self.stale - time
    }

    /// Gets a duration for how much longer the grant would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expires_at - time
    }

    pub(crate) fn with_refresh_token(self, refresh_token: RefreshToken) -> Self {
        Self {
            refresh_token: Some(refresh_token),
            ..self
        }
    }
}

/// Policy for stamping grants with their margin-adjusted expiry
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    issuance_margin: DurationSecs,
    renewal_buffer: DurationSecs,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Subtracts 60 seconds from the declared lifetime on receipt, stops handing
    /// out the access token 2 minutes before that adjusted expiry, and uses the
    /// system clock.
    fn default() -> Self {
        Self {
            issuance_margin: DEFAULT_ISSUANCE_MARGIN,
            renewal_buffer: DEFAULT_RENEWAL_BUFFER,
            clock: System,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration
    ///
    /// `issuance_margin` is subtracted from the authority's `expires_in` when a
    /// grant is received. `renewal_buffer` is how long before that adjusted
    /// expiry the grant stops being handed out.
    pub fn new(issuance_margin: DurationSecs, renewal_buffer: DurationSecs) -> Self {
        Self {
            issuance_margin,
            renewal_buffer,
            clock: System,
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            issuance_margin: self.issuance_margin,
            renewal_buffer: self.renewal_buffer,
            clock,
        }
    }

    /// The margin subtracted from the declared lifetime
    #[inline]
    pub fn issuance_margin(&self) -> DurationSecs {
        self.issuance_margin
    }

    /// The buffer before expiry at which grants are renewed
    #[inline]
    pub fn renewal_buffer(&self) -> DurationSecs {
        self.renewal_buffer
    }

    /// The clock used to stamp grants
    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Stamps a grant received now with its margin-adjusted expiry
    pub fn create_grant(
        &self,
        access_token: AccessToken,
        refresh_token: Option<RefreshToken>,
        token_type: TokenType,
        lifetime: DurationSecs,
    ) -> TokenGrant {
        let issued = self.clock.now();
        let expires_at = issued + (lifetime - self.issuance_margin);
        TokenGrant {
            access_token,
            refresh_token,
            token_type,
            lifetime,
            issued,
            stale: expires_at - self.renewal_buffer,
            expires_at,
        }
    }
}
