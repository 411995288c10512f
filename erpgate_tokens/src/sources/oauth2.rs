//! A grant source that uses the ERP's OAuth2 token endpoint as an authority

use std::sync::Arc;

use async_trait::async_trait;
use erpgate_clock::{Clock, DurationSecs, System};
use thiserror::Error;

use super::GrantSource;
use crate::{
    error::TokenError, AuthorizationCodeRef, ClientIdRef, RedirectUriRef, RefreshTokenRef,
    TokenGrant, TokenLifetimeConfig,
};

pub mod dto;

/// A form payload for one of the supported grant types
pub(crate) trait GrantRequest: serde::Serialize {
    /// The client ID of the client making the request
    fn client_id(&self) -> &ClientIdRef;
    /// The grant type or flow to be performed
    fn grant_type() -> &'static str;
}

/// Performs authorization code and refresh token exchanges against a token endpoint
///
/// The gateway holds no token state of its own. Every call results in exactly
/// one POST to the token endpoint, bounded by the timeout configured on the
/// underlying [`reqwest::Client`].
#[derive(Debug)]
pub struct OAuth2Gateway<C = System> {
    client: reqwest::Client,
    token_url: reqwest::Url,
    credentials: Arc<dto::ClientCredentials>,
    lifetime_config: TokenLifetimeConfig<C>,
}

impl<C> OAuth2Gateway<C> {
    /// Constructs a new gateway
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        credentials: dto::ClientCredentials,
        lifetime_config: TokenLifetimeConfig<C>,
    ) -> Self {
        Self {
            client,
            token_url,
            credentials: Arc::new(credentials),
            lifetime_config,
        }
    }

    /// The token endpoint used by this gateway
    pub fn token_url(&self) -> &reqwest::Url {
        &self.token_url
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> GrantSource for OAuth2Gateway<C> {
    async fn exchange_authorization_code(
        &self,
        code: &AuthorizationCodeRef,
        redirect_uri: &RedirectUriRef,
    ) -> Result<TokenGrant, TokenError> {
        require_non_blank("code", code.as_str())?;
        require_non_blank("redirect_uri", redirect_uri.as_str())?;

        let request = dto::AuthorizationCodeGrant {
            credentials: &self.credentials,
            code,
            redirect_uri,
        };

        request_grant(
            &self.client,
            self.token_url.clone(),
            &request,
            &self.lifetime_config,
        )
        .await
        .map_err(|err| err.into_token_error(GrantKind::AuthorizationCode))
    }

    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenGrant, TokenError> {
        require_non_blank("refresh_token", refresh_token.as_str())?;

        let request = dto::RefreshTokenGrant {
            credentials: &self.credentials,
            refresh_token,
        };

        let response = request_grant(
            &self.client,
            self.token_url.clone(),
            &request,
            &self.lifetime_config,
        )
        .await
        .map_err(|err| err.into_token_error(GrantKind::RefreshToken))?;

        if response.refresh_token().is_none() {
            tracing::debug!("authority did not rotate refresh token, retaining the one used");
            Ok(response.with_refresh_token(refresh_token.to_owned()))
        } else {
            Ok(response)
        }
    }
}

pub(crate) fn require_non_blank(name: &'static str, value: &str) -> Result<(), TokenError> {
    if value.trim().is_empty() {
        Err(TokenError::InvalidInput(name))
    } else {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
enum GrantKind {
    AuthorizationCode,
    RefreshToken,
}

/// An error while attempting to obtain a grant from the authority
#[derive(Debug, Error)]
enum GrantRequestError {
    #[error("authority rejected the grant with status {status}")]
    Rejected { status: u16, body: String },
    #[error("error deserializing token body from authority")]
    TokenBody(#[from] serde_json::Error),
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
}

impl GrantRequestError {
    fn into_token_error(self, kind: GrantKind) -> TokenError {
        match (self, kind) {
            (Self::Rejected { status, body }, GrantKind::AuthorizationCode) => {
                TokenError::TokenExchangeFailed { status, body }
            }
            (Self::Rejected { status, body }, GrantKind::RefreshToken) => {
                TokenError::TokenRefreshFailed { status, body }
            }
            (Self::TokenBody(err), _) => TokenError::InvalidResponse(Arc::new(err)),
            (Self::BodyRead(err), _) | (Self::RequestSend(err), _) => {
                TokenError::Connectivity(Arc::new(err))
            }
        }
    }
}

#[tracing::instrument(
    err,
    skip(client, token_url, request, lifetime_config),
    fields(
        token_url = %token_url,
        grant_type = R::grant_type(),
        client_id = %request.client_id(),
    ),
)]
async fn request_grant<R: GrantRequest, C: Clock>(
    client: &reqwest::Client,
    token_url: reqwest::Url,
    request: &R,
    lifetime_config: &TokenLifetimeConfig<C>,
) -> Result<TokenGrant, GrantRequestError> {
    tracing::trace!("requesting grant from authority");

    let resp = client
        .post(token_url)
        .form(request)
        .send()
        .await
        .map_err(GrantRequestError::RequestSend)?;

    let status = resp.status();

    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from issuing authority"
    );

    if !status.is_success() {
        let body = resp.text().await.map_err(GrantRequestError::BodyRead)?;
        return Err(GrantRequestError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let body = resp.bytes().await.map_err(GrantRequestError::BodyRead)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

    if resp.access_token.as_str().is_empty() {
        return Err(<serde_json::Error as serde::de::Error>::custom(
            "authority returned an empty access token",
        )
        .into());
    }

    if !resp.token_type.is_bearer() {
        tracing::warn!(
            token_type = %resp.token_type,
            "authority issued a token type other than bearer"
        );
    }

    let token_type = if resp.token_type.is_bearer() {
        crate::TokenType::bearer()
    } else {
        resp.token_type
    };

    let refresh_token = resp
        .refresh_token
        .filter(|rt| !rt.as_str().trim().is_empty());
    let has_refresh_token = refresh_token.is_some();

    let grant = lifetime_config.create_grant(
        resp.access_token,
        refresh_token,
        token_type,
        DurationSecs(resp.expires_in),
    );

    tracing::info!(
        has_refresh_token,
        lifetime = grant.lifetime().0,
        stale = grant.stale().0,
        expires_at = grant.expires_at().0,
        "received new grant"
    );

    Ok(grant)
}

#[cfg(test)]
mod tests {
    use erpgate_clock::{TestClock, UnixTime};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::{AuthorizationCode, ClientId, ClientSecret, RedirectUri, RefreshToken};

    const ISSUED_AT: u64 = 1_700_000_000;

    fn gateway(base_uri: &str) -> OAuth2Gateway<TestClock> {
        let token_url = reqwest::Url::parse(&format!("{base_uri}/oauth/token")).unwrap();
        OAuth2Gateway::new(
            reqwest::Client::new(),
            token_url,
            dto::ClientCredentials {
                client_id: ClientId::from_static("erp-client"),
                client_secret: ClientSecret::from_static("erp-secret"),
            },
            TokenLifetimeConfig::default().with_clock(TestClock::new(UnixTime(ISSUED_AT))),
        )
    }

    #[tokio::test]
    async fn authorization_code_exchange_posts_form_and_stamps_expiry() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("client_id=erp-client"))
            .and(body_string_contains("client_secret=erp-secret"))
            .and(body_string_contains("code=consent-code"))
            .and(body_string_contains(
                "redirect_uri=https%3A%2F%2Fmiddleware.example.com%2Fcallback",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-1",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "refresh-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = gateway(&server.uri())
            .exchange_authorization_code(
                &AuthorizationCode::from_static("consent-code"),
                &RedirectUri::from_static("https://middleware.example.com/callback"),
            )
            .await
            .unwrap();

        assert_eq!(grant.access_token().as_str(), "access-1");
        assert_eq!(grant.refresh_token().unwrap().as_str(), "refresh-1");
        assert_eq!(grant.token_type().as_str(), "Bearer");
        assert_eq!(grant.expires_at(), UnixTime(ISSUED_AT + 3_540));
    }

    #[tokio::test]
    async fn rejected_exchange_carries_status_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let err = gateway(&server.uri())
            .exchange_authorization_code(
                &AuthorizationCode::from_static("used-code"),
                &RedirectUri::from_static("https://middleware.example.com/callback"),
            )
            .await
            .unwrap_err();

        match err {
            TokenError::TokenExchangeFailed { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, r#"{"error":"invalid_grant"}"#);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_adopts_rotated_refresh_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-2",
                "token_type": "Bearer",
                "expires_in": 1800,
                "refresh_token": "refresh-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = gateway(&server.uri())
            .refresh(&RefreshToken::from_static("refresh-1"))
            .await
            .unwrap();

        assert_eq!(grant.access_token().as_str(), "access-2");
        assert_eq!(grant.refresh_token().unwrap().as_str(), "refresh-2");
        assert_eq!(grant.expires_at(), UnixTime(ISSUED_AT + 1_740));
    }

    #[tokio::test]
    async fn refresh_retains_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-2",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = gateway(&server.uri())
            .refresh(&RefreshToken::from_static("refresh-1"))
            .await
            .unwrap();

        assert_eq!(grant.refresh_token().unwrap().as_str(), "refresh-1");
    }

    #[tokio::test]
    async fn rejected_refresh_is_a_refresh_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("revoked"))
            .expect(1)
            .mount(&server)
            .await;

        let err = gateway(&server.uri())
            .refresh(&RefreshToken::from_static("refresh-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, TokenError::TokenRefreshFailed { status: 401, .. }));
        assert!(!err.is_connectivity());
    }

    #[tokio::test]
    async fn malformed_grant_is_an_invalid_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = gateway(&server.uri())
            .refresh(&RefreshToken::from_static("refresh-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, TokenError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_authority_is_a_connectivity_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = gateway(&format!("http://{addr}"))
            .refresh(&RefreshToken::from_static("refresh-1"))
            .await
            .unwrap_err();

        assert!(err.is_connectivity(), "unexpected error: {err:?}");
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn blank_inputs_are_rejected_without_a_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-2",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(0)
            .mount(&server)
            .await;

        let gateway = gateway(&server.uri());

        let err = gateway
            .refresh(&RefreshToken::from_static(""))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidInput("refresh_token")));

        let err = gateway
            .exchange_authorization_code(
                &AuthorizationCode::from_static(" "),
                &RedirectUri::from_static("https://middleware.example.com/callback"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidInput("code")));

        let err = gateway
            .exchange_authorization_code(
                &AuthorizationCode::from_static("consent-code"),
                &RedirectUri::from_static(""),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidInput("redirect_uri")));
    }
}
