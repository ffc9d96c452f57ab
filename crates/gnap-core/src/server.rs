//! Server-side grant pipeline
//!
//! Each request runs `received → structurally-valid → binding-valid →
//! verified → policy-evaluated → granted` and stops at the first failing
//! stage. The server identity and the trusted client key are fixed at
//! construction and only read afterwards, so one [`GrantServer`] can serve
//! concurrent requests behind an `Arc`.

use std::sync::Arc;

use crate::{
    JSON_CONTENT_TYPE, TOKEN_ENDPOINT, TOKEN_METHOD,
    binding::BindingValidator,
    envelope::SignedEnvelope,
    errors::{GnapError, Rejection, ServerStage},
    identity::ServerIdentity,
    keys::KeyPair,
    policy::{Decision, PolicyDecision},
    request::TokenRequest,
    token::AccessToken,
    unix_now,
};

/// Authorization server request handler
#[derive(Debug)]
pub struct GrantServer {
    identity: ServerIdentity,
    client_key: KeyPair,
    policy: Arc<dyn PolicyDecision>,
    validator: BindingValidator,
    token_endpoint: String,
}

impl GrantServer {
    /// Server trusting exactly one client key
    ///
    /// Only the public half of `client_key` is kept.
    pub fn new(
        identity: ServerIdentity,
        client_key: KeyPair,
        policy: Arc<dyn PolicyDecision>,
    ) -> Self {
        Self {
            identity,
            client_key: client_key.public_only(),
            policy,
            validator: BindingValidator::default(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }

    /// Replace the binding validator
    #[must_use]
    pub fn with_validator(mut self, validator: BindingValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Bind requests to a different endpoint path
    #[must_use]
    pub fn with_token_endpoint(mut self, path: impl Into<String>) -> Self {
        self.token_endpoint = path.into();
        self
    }

    /// Server identity
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Key id of the trusted client
    pub fn client_key_id(&self) -> &str {
        &self.client_key.key_id
    }

    /// Path requests must be bound to
    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    /// Run the pipeline on a raw request at the current time
    ///
    /// # Errors
    /// Returns a [`Rejection`] naming the first failing stage.
    pub fn handle_incoming(
        &self,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<AccessToken, Rejection> {
        let now = unix_now().map_err(Rejection::at(ServerStage::Received))?;
        self.handle_incoming_at(body, content_type, now)
    }

    /// Run the pipeline with an explicit server clock
    ///
    /// # Errors
    /// Returns a [`Rejection`] naming the first failing stage.
    pub fn handle_incoming_at(
        &self,
        body: &[u8],
        content_type: Option<&str>,
        now: i64,
    ) -> Result<AccessToken, Rejection> {
        let result = self.run(body, content_type, now);
        match &result {
            Ok(token) => tracing::info!(
                client_key_id = %self.client_key.key_id,
                resource_type = %token.claims.resources.resource_type,
                exp = token.claims.exp,
                "Access token issued"
            ),
            Err(rejection) => tracing::warn!(
                stage = %rejection.stage,
                error = %rejection.error,
                "Request rejected"
            ),
        }
        result
    }

    fn run(
        &self,
        body: &[u8],
        content_type: Option<&str>,
        now: i64,
    ) -> Result<AccessToken, Rejection> {
        tracing::debug!(content_type = ?content_type, bytes = body.len(), "Request received");
        check_content_type(content_type).map_err(Rejection::at(ServerStage::Received))?;

        let envelope =
            SignedEnvelope::parse(body).map_err(Rejection::at(ServerStage::StructurallyValid))?;
        tracing::debug!(kid = %envelope.headers.kid, "Envelope parsed");

        self.validator
            .validate(&envelope.headers, TOKEN_METHOD, &self.token_endpoint, now)
            .map_err(|e| Rejection::at(ServerStage::BindingValid)(e.into()))?;
        tracing::debug!("Binding headers valid");

        let payload = envelope
            .verify(&self.client_key.public)
            .map_err(Rejection::at(ServerStage::Verified))?;
        tracing::debug!(key_id = %self.client_key.key_id, "Signature verified");

        let request: TokenRequest = serde_json::from_slice(payload)
            .map_err(|e| GnapError::parse(format!("Payload is not a token request: {e}")))
            .map_err(Rejection::at(ServerStage::PolicyEvaluated))?;
        if let Decision::Deny { reason } = self.policy.decide(&request) {
            return Err(Rejection::at(ServerStage::PolicyEvaluated)(
                GnapError::PolicyDenied { reason },
            ));
        }
        tracing::debug!("Policy allowed request");

        AccessToken::mint(&request, &self.client_key.key_id, &self.identity, now)
            .map_err(Rejection::at(ServerStage::Granted))
    }
}

/// Accept `application/json`, ignoring parameters and case
fn check_content_type(content_type: Option<&str>) -> Result<(), GnapError> {
    let media_type = content_type
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .unwrap_or_default();

    if media_type.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
        Ok(())
    } else {
        Err(GnapError::UnsupportedContentType {
            content_type: content_type.unwrap_or_default().to_string(),
        })
    }
}
