use std::{
    error, fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use arc_swap::{ArcSwapOption, Guard};
use async_trait::async_trait;
use erpgate_clock::{Clock, System};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::{
    config::TokenManagerConfig,
    error::{ConfigError, StoreError, TokenError},
    sources::{
        oauth2::{dto::ClientCredentials, require_non_blank},
        CredentialStore, FileCredentialStore, GrantSource, OAuth2Gateway,
    },
    supplier::AccessTokenSupplier,
    tokens::TokenStatus,
    AccessToken, AuthorizationCode, AuthorizationCodeRef, RedirectUri, RedirectUriRef,
    RefreshToken, RefreshTokenRef, TokenGrant,
};

/// Where the manager's cached grant stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    /// No grant and no known refresh token
    Empty,
    /// A grant whose access token can be handed out
    Fresh,
    /// A grant or refresh token is held, but the next caller must renew it
    StaleNeedsRefresh,
    /// An exchange with the authority is currently running
    RefreshInFlight,
}

/// Operational counters describing credential handling
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialHealth {
    /// Grants obtained from the authority since start-up
    pub grants_obtained: u64,
    /// Failed writes of the refresh token to the credential store
    pub persistence_failures: u64,
    /// The most recent credential store failure, if any
    pub last_store_error: Option<String>,
}

/// Obtains, caches, renews, and persists the access token for the ERP API
///
/// One manager owns one credential. Clones are cheap and share the same
/// cached grant and the same single-flight region, so a manager can be handed
/// to every call site that needs a token.
///
/// The decision to renew is only ever made while holding the manager's
/// exclusive region. Waiters queue fairly on that region; when the holder
/// finishes, they observe the new grant rather than renewing it again. The
/// exchange itself runs on a spawned task that owns the region, so a caller
/// that gives up waiting does not abort a renewal other callers depend on.
pub struct TokenManager<G = OAuth2Gateway, C = System> {
    inner: Arc<Inner<G, C>>,
}

impl<G, C> Clone for TokenManager<G, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<G, C> {
    gateway: G,
    clock: C,
    current: ArcSwapOption<TokenGrant>,
    region: Arc<Mutex<Region>>,
    epoch: AtomicU64,
    in_flight: AtomicBool,
    has_refresh_token: AtomicBool,
    grants_obtained: AtomicU64,
    persistence_failures: AtomicU64,
    last_store_error: ArcSwapOption<String>,
}

/// State only touched while holding the exclusive region
struct Region {
    refresh_token: Option<RefreshToken>,
    store: Box<dyn CredentialStore>,
    last_attempt: Option<Attempt>,
}

/// The outcome of the most recent renewal
struct Attempt {
    epoch: u64,
    failure: Option<TokenError>,
}

enum Work {
    Refresh,
    RefreshWith(RefreshToken),
    Exchange {
        code: AuthorizationCode,
        redirect_uri: RedirectUri,
    },
}

impl TokenManager {
    /// Constructs a manager talking to the configured token endpoint and
    /// keeping the refresh token in the configured file
    ///
    /// Fails with [`TokenError::ConfigurationInvalid`] if a required value is
    /// blank. A missing or unreadable refresh token file is not an error; the
    /// manager starts empty instead.
    pub async fn new(config: TokenManagerConfig) -> Result<Self, TokenError> {
        let token_url = config.validate()?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("erpgate_tokens/", env!("CARGO_PKG_VERSION")))
            .timeout(config.http_timeout())
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;

        let gateway = OAuth2Gateway::new(
            client,
            token_url,
            ClientCredentials {
                client_id: config.client_id().clone(),
                client_secret: config.client_secret().clone(),
            },
            config.lifetime_config(),
        );

        let store = FileCredentialStore::new(config.resolved_refresh_token_path());

        tracing::debug!(
            token_url = %gateway.token_url(),
            refresh_token_path = %store.path().display(),
            "constructing token manager"
        );

        Ok(Self::from_parts(gateway, store, System).await)
    }
}

impl<G, C> TokenManager<G, C>
where
    G: GrantSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Constructs a manager from its collaborators, seeding it from the credential store
    ///
    /// `clock` must agree with the clock the grant source uses to stamp grants.
    pub async fn from_parts(gateway: G, store: impl CredentialStore + 'static, clock: C) -> Self {
        let mut store: Box<dyn CredentialStore> = Box::new(store);

        let (refresh_token, store_error) = match load_refresh_token(&mut *store).await {
            Ok(token) => (token, None),
            Err(error) => (None, Some(Arc::new(error.to_string()))),
        };

        let inner = Inner {
            gateway,
            clock,
            current: ArcSwapOption::empty(),
            epoch: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            has_refresh_token: AtomicBool::new(refresh_token.is_some()),
            grants_obtained: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            last_store_error: ArcSwapOption::new(store_error),
            region: Arc::new(Mutex::new(Region {
                refresh_token,
                store,
                last_attempt: None,
            })),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Gets a currently valid access token
    ///
    /// Renews the grant first if it is within the renewal buffer of its expiry. Fails with
    /// [`TokenError::NoAccessTokenAvailable`] without contacting the authority
    /// if there is neither a grant nor a refresh token.
    pub async fn access_token(&self) -> Result<AccessToken, TokenError> {
        let observed_epoch = self.inner.epoch.load(Ordering::Acquire);

        if let Some(token) = self.inner.fresh_access_token() {
            tracing::trace!("using cached access token");
            return Ok(token);
        }

        let region = Arc::clone(&self.inner.region).lock_owned().await;

        // Another caller may have renewed while this one was queued.
        if let Some(token) = self.inner.fresh_access_token() {
            tracing::trace!("access token renewed while waiting");
            return Ok(token);
        }

        // A renewal completed while this caller was queued: share its outcome
        // instead of deciding to renew a second time.
        if let Some(attempt) = region.last_attempt.as_ref().filter(|a| a.epoch > observed_epoch) {
            match &attempt.failure {
                Some(failure) => {
                    tracing::debug!("sharing failure of renewal attempted while waiting");
                    return Err(failure.clone());
                }
                None => {
                    if let Some(token) = self.inner.unexpired_access_token() {
                        return Ok(token);
                    }
                }
            }
        }

        let grant = self.run_exclusive(region, Work::Refresh).await?;
        Ok(grant.access_token().to_owned())
    }

    /// Like [`access_token()`][Self::access_token], but gives up with
    /// [`TokenError::Cancelled`] once `cancel` fires
    ///
    /// A renewal already started on behalf of this caller keeps running and
    /// its result is still cached for everyone else.
    pub async fn access_token_until_cancelled(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, TokenError> {
        until_cancelled(cancel, self.access_token()).await
    }

    /// Exchanges an authorization code from the interactive consent step
    ///
    /// On success the new grant replaces the cached one and its refresh
    /// token is persisted.
    pub async fn exchange_authorization_code(
        &self,
        code: &AuthorizationCodeRef,
        redirect_uri: &RedirectUriRef,
    ) -> Result<Arc<TokenGrant>, TokenError> {
        require_non_blank("code", code.as_str())?;
        require_non_blank("redirect_uri", redirect_uri.as_str())?;

        let region = Arc::clone(&self.inner.region).lock_owned().await;
        self.run_exclusive(
            region,
            Work::Exchange {
                code: code.to_owned(),
                redirect_uri: redirect_uri.to_owned(),
            },
        )
        .await
    }

    /// Renews the grant with an explicit refresh token
    ///
    /// Fails with [`TokenError::InvalidInput`] without contacting the
    /// authority if `refresh_token` is blank.
    pub async fn refresh_with(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<Arc<TokenGrant>, TokenError> {
        require_non_blank("refresh_token", refresh_token.as_str())?;

        let region = Arc::clone(&self.inner.region).lock_owned().await;
        self.run_exclusive(region, Work::RefreshWith(refresh_token.to_owned()))
            .await
    }

    /// Renews the grant now, regardless of whether the cached one is still fresh
    pub async fn force_refresh(&self) -> Result<Arc<TokenGrant>, TokenError> {
        let region = Arc::clone(&self.inner.region).lock_owned().await;
        self.run_exclusive(region, Work::Refresh).await
    }

    /// Forgets the cached grant and the in-memory refresh token
    ///
    /// The credential store is left untouched, so the next caller falls back
    /// to the persisted refresh token. A new authorization code exchange
    /// replaces both.
    pub async fn invalidate(&self) {
        let mut region = self.inner.region.lock().await;
        self.inner.current.store(None);
        self.inner.set_refresh_token(&mut region, None);
        region.last_attempt = None;
        tracing::info!("invalidated cached grant");
    }

    /// The cached grant, if any, whether or not it is still fresh
    pub fn current_grant(&self) -> Option<Arc<TokenGrant>> {
        self.inner.current.load_full()
    }

    /// The manager's current state as of now
    ///
    /// A refresh token that only exists in the credential store, such as after
    /// [`invalidate()`][Self::invalidate], is not reflected here.
    pub fn state(&self) -> TokenState {
        if self.inner.in_flight.load(Ordering::Acquire) {
            return TokenState::RefreshInFlight;
        }

        match &*self.inner.current.load() {
            Some(grant) if !grant.token_status_with_clock(&self.inner.clock).needs_renewal() => {
                TokenState::Fresh
            }
            Some(_) => TokenState::StaleNeedsRefresh,
            None if self.inner.has_refresh_token.load(Ordering::Acquire) => {
                TokenState::StaleNeedsRefresh
            }
            None => TokenState::Empty,
        }
    }

    /// Counters for operators watching for credential drift
    pub fn health(&self) -> CredentialHealth {
        CredentialHealth {
            grants_obtained: self.inner.grants_obtained.load(Ordering::Relaxed),
            persistence_failures: self.inner.persistence_failures.load(Ordering::Relaxed),
            last_store_error: self
                .inner
                .last_store_error
                .load_full()
                .map(|e| (*e).clone()),
        }
    }

    async fn run_exclusive(
        &self,
        region: OwnedMutexGuard<Region>,
        work: Work,
    ) -> Result<Arc<TokenGrant>, TokenError> {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.perform(region, work).await });

        match task.await {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(
                    error = (&error as &dyn error::Error),
                    "token exchange task terminated abnormally"
                );
                Err(TokenError::ExchangeTaskFailed)
            }
        }
    }
}

impl<G, C> Inner<G, C>
where
    G: GrantSource,
    C: Clock,
{
    fn fresh_access_token(&self) -> Option<AccessToken> {
        let guard: Guard<Option<Arc<TokenGrant>>> = self.current.load();
        let grant = guard.as_ref()?;

        let now = self.clock.now();
        let status = grant.token_status_at(now);
        if status.needs_renewal() {
            tracing::debug!(
                ?status,
                now = now.0,
                stale = grant.stale().0,
                expires_at = grant.expires_at().0,
                "cached grant needs renewal"
            );
            None
        } else {
            Some(grant.access_token().to_owned())
        }
    }

    fn unexpired_access_token(&self) -> Option<AccessToken> {
        let guard: Guard<Option<Arc<TokenGrant>>> = self.current.load();
        guard
            .as_ref()
            .filter(|g| g.token_status_with_clock(&self.clock) != TokenStatus::Expired)
            .map(|g| g.access_token().to_owned())
    }

    async fn perform(
        &self,
        mut region: OwnedMutexGuard<Region>,
        work: Work,
    ) -> Result<Arc<TokenGrant>, TokenError> {
        match work {
            Work::Refresh => {
                let refresh_token = self.source_refresh_token(&mut region).await?;
                self.refresh_locked(&mut region, refresh_token).await
            }
            Work::RefreshWith(refresh_token) => {
                self.refresh_locked(&mut region, refresh_token).await
            }
            Work::Exchange { code, redirect_uri } => {
                self.in_flight.store(true, Ordering::Release);
                let result = self
                    .gateway
                    .exchange_authorization_code(&code, &redirect_uri)
                    .await;
                self.in_flight.store(false, Ordering::Release);

                match result {
                    Ok(grant) => {
                        if grant.refresh_token().is_none() {
                            tracing::warn!(
                                "authorization code grant carried no refresh token; the grant cannot be renewed"
                            );
                        }
                        region.last_attempt = None;
                        Ok(self.adopt(&mut region, grant).await)
                    }
                    Err(error) => {
                        tracing::warn!(
                            error = (&error as &dyn error::Error),
                            "authorization code exchange failed"
                        );
                        Err(error)
                    }
                }
            }
        }
    }

    /// Prefers the in-memory refresh token, falling back to the credential store
    async fn source_refresh_token(&self, region: &mut Region) -> Result<RefreshToken, TokenError> {
        if let Some(token) = region
            .refresh_token
            .as_ref()
            .filter(|t| !t.as_str().trim().is_empty())
        {
            return Ok(token.clone());
        }

        tracing::debug!("no refresh token in memory, reloading from credential store");
        let loaded = match load_refresh_token(&mut *region.store).await {
            Ok(token) => token,
            Err(error) => {
                self.last_store_error.store(Some(Arc::new(error.to_string())));
                None
            }
        };

        match loaded {
            Some(token) => {
                self.set_refresh_token(region, Some(token.clone()));
                Ok(token)
            }
            None => {
                tracing::debug!("no refresh token available, an authorization code exchange is required");
                Err(TokenError::NoAccessTokenAvailable)
            }
        }
    }

    async fn refresh_locked(
        &self,
        region: &mut Region,
        refresh_token: RefreshToken,
    ) -> Result<Arc<TokenGrant>, TokenError> {
        tracing::debug!("renewing grant with refresh token");

        self.in_flight.store(true, Ordering::Release);
        let result = self.gateway.refresh(&refresh_token).await;
        self.in_flight.store(false, Ordering::Release);

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;

        match result {
            Ok(grant) => {
                region.last_attempt = Some(Attempt {
                    epoch,
                    failure: None,
                });
                Ok(self.adopt(region, grant).await)
            }
            Err(error) => {
                if error.is_connectivity() {
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        "token authority unreachable, grant not renewed"
                    );
                } else {
                    tracing::error!(
                        error = (&error as &dyn error::Error),
                        "token authority refused to renew grant"
                    );
                }
                region.last_attempt = Some(Attempt {
                    epoch,
                    failure: Some(error.clone()),
                });
                Err(error)
            }
        }
    }

    /// Publishes a new grant and persists its refresh token
    async fn adopt(&self, region: &mut Region, grant: TokenGrant) -> Arc<TokenGrant> {
        let grant = Arc::new(grant);
        self.current.store(Some(Arc::clone(&grant)));
        self.grants_obtained.fetch_add(1, Ordering::Relaxed);

        if let Some(refresh_token) = grant
            .refresh_token()
            .filter(|t| !t.as_str().trim().is_empty())
        {
            if region.refresh_token.as_deref() != Some(refresh_token) {
                tracing::info!("adopting new refresh token");
            }
            self.set_refresh_token(region, Some(refresh_token.to_owned()));

            match region.store.persist(refresh_token).await {
                Ok(()) => {
                    tracing::trace!("persisted refresh token");
                }
                Err(error) => {
                    self.persistence_failures.fetch_add(1, Ordering::Relaxed);
                    self.last_store_error.store(Some(Arc::new(error.to_string())));
                    tracing::error!(
                        error = (&error as &dyn error::Error),
                        "unable to persist refresh token; it will be lost on restart"
                    );
                }
            }
        }

        grant
    }

    fn set_refresh_token(&self, region: &mut Region, refresh_token: Option<RefreshToken>) {
        self.has_refresh_token
            .store(refresh_token.is_some(), Ordering::Release);
        region.refresh_token = refresh_token;
    }
}

async fn load_refresh_token(
    store: &mut dyn CredentialStore,
) -> Result<Option<RefreshToken>, StoreError> {
    match store.load().await {
        Ok(Some(token)) => {
            tracing::info!("loaded refresh token from credential store");
            Ok(Some(token))
        }
        Ok(None) => {
            tracing::debug!("credential store holds no refresh token");
            Ok(None)
        }
        Err(error) => {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to read refresh token from credential store"
            );
            Err(error)
        }
    }
}

/// Awaits `fut` unless `cancel` fires first
///
/// Any exchange the manager has already started keeps running to completion.
pub async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, TokenError>
where
    F: Future<Output = Result<T, TokenError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TokenError::Cancelled),
        result = fut => result,
    }
}

#[async_trait]
impl<G, C> AccessTokenSupplier for TokenManager<G, C>
where
    G: GrantSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    async fn access_token(&self) -> Result<AccessToken, TokenError> {
        TokenManager::access_token(self).await
    }
}

impl<G: fmt::Debug, C: fmt::Debug> fmt::Debug for TokenManager<G, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("gateway", &self.inner.gateway)
            .field("clock", &self.inner.clock)
            .field("current", &self.inner.current.load().as_deref())
            .field("epoch", &self.inner.epoch.load(Ordering::Relaxed))
            .field("in_flight", &self.inner.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}
