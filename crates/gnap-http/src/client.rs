//! Client side of the token endpoint

use std::time::Duration;

use gnap_core::{ClientIdentity, SecuredRequest, TokenRequest, TokenResponse, secure_request};
use reqwest::header::CONTENT_TYPE;

use crate::error::{TransportError, TransportResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts secured requests to an authorization server
#[derive(Debug, Clone)]
pub struct GrantHttpClient {
    inner: reqwest::Client,
}

impl GrantHttpClient {
    /// Client with redirects disabled and a 30 second timeout
    ///
    /// # Errors
    /// Returns [`TransportError::Http`] if the TLS backend cannot be set up.
    pub fn new() -> TransportResult<Self> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { inner })
    }

    /// Wrap an existing `reqwest` client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { inner: client }
    }

    /// Secure `request` for `client` and send it to the client's server
    ///
    /// # Errors
    /// Returns [`TransportError::Core`] if the request cannot be secured and
    /// the errors of [`Self::send`] otherwise.
    pub async fn request_token(
        &self,
        request: &TokenRequest,
        client: &ClientIdentity,
    ) -> TransportResult<TokenResponse> {
        let secured = secure_request(request, client)?;
        self.send(&client.as_uri, &secured).await
    }

    /// POST an already secured request and decode the token response
    ///
    /// # Errors
    /// Returns [`TransportError::Http`] on connection or decoding failures
    /// and [`TransportError::UnexpectedStatus`] on any status but 200.
    pub async fn send(
        &self,
        as_uri: &str,
        secured: &SecuredRequest,
    ) -> TransportResult<TokenResponse> {
        tracing::debug!(
            as_uri = %as_uri,
            content_type = %secured.content_type,
            "Sending token request"
        );

        let response = self
            .inner
            .post(as_uri)
            .header(CONTENT_TYPE, secured.content_type)
            .body(secured.body.clone())
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "Expected status code 200, got {}", status);
            return Err(TransportError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        Ok(response.json::<TokenResponse>().await?)
    }
}
