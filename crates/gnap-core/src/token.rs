//! Access tokens
//!
//! A token is a stateless bearer JWT signed by the authorization server. It is
//! never stored server-side and lives for [`ACCESS_TOKEN_LIFETIME_SECONDS`].

use jsonwebtoken::{Algorithm, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{
    ACCESS_TOKEN_LIFETIME_SECONDS, Result,
    errors::GnapError,
    identity::ServerIdentity,
    keys::RsaJwk,
    request::{Resources, TokenRequest},
};

/// Client the token was issued to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClient {
    /// Client display name
    pub name: String,
    /// Client URI
    pub uri: String,
    /// Key id of the client key that signed the request
    pub key_id: String,
}

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Granted resources
    pub resources: Resources,
    /// Token holder
    pub client: TokenClient,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expires at (Unix seconds)
    pub exp: i64,
    /// Name of the issuing server
    pub iss: String,
}

/// A minted access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Compact JWT
    pub value: String,
    /// Claims inside `value`
    pub claims: AccessTokenClaims,
}

impl AccessToken {
    /// Mint a token for an approved request
    ///
    /// # Errors
    /// Returns [`GnapError::KeyParse`] if the server has no private key and
    /// [`GnapError::Internal`] if `now` is too large or signing fails.
    pub fn mint(
        request: &TokenRequest,
        client_key_id: &str,
        server: &ServerIdentity,
        now: i64,
    ) -> Result<Self> {
        let exp = now
            .checked_add(ACCESS_TOKEN_LIFETIME_SECONDS)
            .ok_or_else(|| GnapError::Internal {
                reason: format!("Token expiry overflows for issue time {now}"),
            })?;
        let claims = AccessTokenClaims {
            resources: request.resources.clone(),
            client: TokenClient {
                name: request.client.name.clone(),
                uri: request.client.uri.clone(),
                key_id: client_key_id.to_string(),
            },
            iat: now,
            exp,
            iss: server.name.clone(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(server.keys.key_id.clone());

        let value = encode(&header, &claims, &server.keys.encoding_key()?).map_err(|e| {
            GnapError::Internal {
                reason: format!("Failed to sign access token: {e}"),
            }
        })?;

        Ok(Self { value, claims })
    }

    /// Check a token's signature and expiry against the server's public key
    ///
    /// # Errors
    /// Returns [`GnapError::Verification`] if the token is malformed,
    /// expired or not signed by `server_key`.
    pub fn verify(token: &str, server_key: &RsaJwk) -> Result<AccessTokenClaims> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iat", "iss"]);

        let data = decode::<AccessTokenClaims>(token, &server_key.decoding_key()?, &validation)
            .map_err(|e| GnapError::verification(format!("Invalid access token: {e}")))?;

        if data.header.kid.as_deref().is_some_and(|kid| kid != server_key.thumbprint()) {
            return Err(GnapError::verification(
                "Access token was issued under a different key",
            ));
        }
        Ok(data.claims)
    }

    /// Response body for this token
    #[must_use]
    pub fn to_response(&self) -> TokenResponse {
        TokenResponse {
            access_token: AccessTokenValue {
                value: self.value.clone(),
                key: false,
            },
        }
    }
}

/// Body returned by the token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The issued token
    pub access_token: AccessTokenValue,
}

/// Token value and binding flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenValue {
    /// Compact JWT
    pub value: String,
    /// Whether the token is bound to a key; bearer tokens only, so `false`
    pub key: bool,
}
