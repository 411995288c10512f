//! DTOs for interacting with the ERP's OAuth2 token endpoint

use serde::{Deserialize, Serialize, Serializer};

use crate::{
    AccessToken, AuthorizationCodeRef, ClientId, ClientIdRef, ClientSecret, RedirectUriRef,
    RefreshToken, RefreshTokenRef, TokenType,
};

/// Client credentials
#[derive(Clone, Debug, Serialize)]
pub struct ClientCredentials {
    /// The client ID
    pub client_id: ClientId,

    /// The client secret
    pub client_secret: ClientSecret,
}

/// Form payload for the authorization code grant
#[derive(Debug)]
pub(crate) struct AuthorizationCodeGrant<'a> {
    pub credentials: &'a ClientCredentials,
    pub code: &'a AuthorizationCodeRef,
    pub redirect_uri: &'a RedirectUriRef,
}

impl Serialize for AuthorizationCodeGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("AuthorizationCodeGrant", 5)?;
        ser.serialize_field("grant_type", Self::GRANT_TYPE)?;
        ser.serialize_field("client_id", &self.credentials.client_id)?;
        ser.serialize_field("client_secret", &self.credentials.client_secret)?;
        ser.serialize_field("redirect_uri", self.redirect_uri)?;
        ser.serialize_field("code", self.code)?;
        ser.end()
    }
}

impl AuthorizationCodeGrant<'_> {
    const GRANT_TYPE: &'static str = "authorization_code";
}

impl super::GrantRequest for AuthorizationCodeGrant<'_> {
    fn client_id(&self) -> &ClientIdRef {
        &self.credentials.client_id
    }
    fn grant_type() -> &'static str {
        Self::GRANT_TYPE
    }
}

/// Form payload for the refresh token grant
#[derive(Debug)]
pub(crate) struct RefreshTokenGrant<'a> {
    pub credentials: &'a ClientCredentials,
    pub refresh_token: &'a RefreshTokenRef,
}

impl Serialize for RefreshTokenGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("RefreshTokenGrant", 4)?;
        ser.serialize_field("grant_type", Self::GRANT_TYPE)?;
        ser.serialize_field("client_id", &self.credentials.client_id)?;
        ser.serialize_field("client_secret", &self.credentials.client_secret)?;
        ser.serialize_field("refresh_token", self.refresh_token)?;
        ser.end()
    }
}

impl RefreshTokenGrant<'_> {
    const GRANT_TYPE: &'static str = "refresh_token";
}

impl super::GrantRequest for RefreshTokenGrant<'_> {
    fn client_id(&self) -> &ClientIdRef {
        &self.credentials.client_id
    }
    fn grant_type() -> &'static str {
        Self::GRANT_TYPE
    }
}

fn default_token_type() -> TokenType {
    TokenType::bearer()
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: AccessToken,
    #[serde(default = "default_token_type")]
    pub token_type: TokenType,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
}
