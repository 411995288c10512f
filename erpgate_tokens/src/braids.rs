use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A client ID registered with the ERP's authorization server
#[braid(serde)]
pub struct ClientId;

/// A client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

limited_reveal!(ClientSecretRef: "CLIENT SECRET", 5);

/// An OAuth2 authorization code obtained from the interactive consent step
#[braid(serde, debug = "owned", display = "owned")]
pub struct AuthorizationCode;

limited_reveal!(AuthorizationCodeRef: "AUTHORIZATION CODE", 5);

/// The redirect URI registered for the authorization code flow
#[braid(serde)]
pub struct RedirectUri;

/// An access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

/// The token type reported by the authority, used as the `Authorization` scheme
#[braid(serde)]
pub struct TokenType;

impl TokenType {
    /// The `Bearer` token type
    pub fn bearer() -> Self {
        Self::from_static("Bearer")
    }
}

impl TokenTypeRef {
    /// Whether this token type is `Bearer`, compared case-insensitively
    pub fn is_bearer(&self) -> bool {
        self.as_str().eq_ignore_ascii_case("bearer")
    }
}
