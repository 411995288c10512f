//! Middleware to automatically authorize outgoing ERP requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AccessTokenMiddleware`] in the middleware stack to ask an
//! [`AccessTokenSupplier`] for a valid access token before each outbound
//! request. With a [`TokenManager`](erpgate_tokens::TokenManager) as the
//! supplier, the grant is renewed on demand and concurrent requests share a
//! single renewal.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place and the supplier is not consulted.
//!
//! If the supplier cannot provide a token, the request is not sent and the
//! failure is returned as a [`reqwest_middleware::Error::Middleware`]
//! wrapping an [`AuthorizationError`].
//!
//! ```
//! use erpgate_reqwest::AccessTokenMiddleware;
//! use erpgate_tokens::supplier::ConstTokenSupplier;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(ConstTokenSupplier::new("token")))
//!     .build();
//!
//! let req = client
//!     .get("https://erp.example.com/api/orders");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! The middleware can also be configured to add an authorization token
//! only conditionally. A single middleware stack is often shared between the
//! ERP and other backends, and the ERP's token must never leak to the others.
//!
//! These predicates can be composed together to evaluate more complex
//! requirements prior to attaching a token to a request.
//!
//! ```
//! use erpgate_reqwest::{AccessTokenMiddleware, BaseUrlMatch, ExactHostMatch, HttpsOnly};
//! use erpgate_tokens::supplier::ConstTokenSupplier;
//! use predicates::prelude::PredicateBooleanExt;
//!
//! let supplier = ConstTokenSupplier::new("token");
//!
//! AccessTokenMiddleware::new(supplier.clone())
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("erp.example.com")));
//!
//! AccessTokenMiddleware::new(supplier)
//!     .with_predicate(BaseUrlMatch::new("https://erp.example.com/api/".parse().unwrap()));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{fmt, sync::Arc};

use bytes::{BufMut, BytesMut};
use erpgate_tokens::{AccessToken, AccessTokenSupplier, TokenError};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response, Url};
use reqwest_middleware::{Middleware, Next, Result};

/// A failure to authorize an outbound request
#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    /// The supplier could not provide an access token
    #[error("unable to obtain an access token for the request")]
    Token(#[from] TokenError),

    /// The access token cannot be carried in a header
    #[error("access token contains bytes that are not valid in a header value")]
    InvalidHeaderValue(#[source] header::InvalidHeaderValue),
}

/// A middleware that injects an access token into outgoing requests
#[derive(Clone)]
pub struct AccessTokenMiddleware<P> {
    supplier: Arc<dyn AccessTokenSupplier>,
    predicate: P,
}

impl AccessTokenMiddleware<HttpsOnly> {
    /// Construct a new middleware from an access token supplier
    ///
    /// By default, this middleware will only send its token if the request
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new<S>(supplier: S) -> Self
    where
        S: AccessTokenSupplier + 'static,
    {
        Self::from_shared(Arc::new(supplier))
    }

    /// Construct a new middleware from a supplier that is shared with other call sites
    pub fn from_shared(supplier: Arc<dyn AccessTokenSupplier>) -> Self {
        Self {
            supplier,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<P> {
        AccessTokenMiddleware {
            supplier: self.supplier,
            predicate,
        }
    }
}

impl<P> AccessTokenMiddleware<P> {
    async fn authorization_value(&self) -> std::result::Result<header::HeaderValue, AuthorizationError> {
        let token = self.supplier.access_token().await?;
        tracing::trace!(token = format_args!("{:?}", token), "obtained access token");
        bearer_value(&token)
    }
}

fn bearer_value(token: &AccessToken) -> std::result::Result<header::HeaderValue, AuthorizationError> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());

    let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze())
        .map_err(AuthorizationError::InvalidHeaderValue)?;
    value.set_sensitive(true);
    Ok(value)
}

impl<P: fmt::Debug> fmt::Debug for AccessTokenMiddleware<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenMiddleware")
            .field("predicate", &self.predicate)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AccessTokenMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            match self.authorization_value().await {
                Ok(value) => {
                    req.headers_mut().insert(header::AUTHORIZATION, value);
                }
                Err(error) => {
                    tracing::warn!(
                        error = %error,
                        url = %req.url(),
                        "not sending request without authorization"
                    );
                    return Err(reqwest_middleware::Error::middleware(error));
                }
            }
        }

        next.run(req, extensions).await
    }
}

/// Only attach an access token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        (result != expected).then(|| {
            reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                "scheme",
                req.url().scheme().to_owned(),
            ))
        })
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach an access token if the request is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new<S>(host: S) -> Self
    where
        S: ToString,
    {
        Self {
            host: host.to_string(),
        }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(&self.host)
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        (result != expected).then(|| {
            reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                "host",
                req.url().host_str().unwrap_or("<no host>").to_owned(),
            ))
        })
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host == ")?;
        f.write_str(&self.host)
    }
}

/// Only attach an access token to requests below the ERP API's base URL
///
/// Scheme, host, and port must match exactly and the request path must start
/// with the base URL's path. A base path without a trailing slash is treated
/// as if it had one, so `/api` does not match `/apiv2`.
#[derive(Clone, Debug)]
pub struct BaseUrlMatch {
    base: Url,
}

impl BaseUrlMatch {
    /// Construct a new predicate from the API's base URL
    pub fn new(mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base }
    }
}

impl Predicate<Request> for BaseUrlMatch {
    fn eval(&self, req: &Request) -> bool {
        let url = req.url();
        let origin_matches = url.scheme() == self.base.scheme()
            && url.host_str() == self.base.host_str()
            && url.port_or_known_default() == self.base.port_or_known_default();
        if !origin_matches {
            return false;
        }

        let base_path = self.base.path();
        let path = url.path();
        path.starts_with(base_path) || path == base_path.trim_end_matches('/')
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        (result != expected).then(|| {
            let mut origin_and_path = req.url().clone();
            origin_and_path.set_query(None);
            origin_and_path.set_fragment(None);
            reflection::Case::new(Some(self), result)
                .add_product(reflection::Product::new("url", origin_and_path.to_string()))
        })
    }
}

impl reflection::PredicateReflection for BaseUrlMatch {}
impl fmt::Display for BaseUrlMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("url starts with ")?;
        f.write_str(self.base.as_str())
    }
}
