//! Securing outgoing requests

use crate::{
    JSON_CONTENT_TYPE, Result, TOKEN_ENDPOINT, TOKEN_METHOD,
    envelope::SignedEnvelope,
    errors::GnapError,
    identity::{ClientIdentity, MessageSecurity},
    request::TokenRequest,
};

/// A request ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecuredRequest {
    /// Value for the `Content-Type` header
    pub content_type: &'static str,
    /// Request body
    pub body: String,
}

/// Secure `request` according to the client's message security mode
///
/// Attached JWS is the only mode implemented; the body is the compact JWS
/// bound to `post` on the token endpoint.
///
/// # Errors
/// Returns [`GnapError::UnsupportedSecurityMode`] for any other mode and the
/// signing errors of [`SignedEnvelope::sign`].
pub fn secure_request(request: &TokenRequest, client: &ClientIdentity) -> Result<SecuredRequest> {
    tracing::debug!(request = %request.dump(), "Securing token request");

    match client.message_security {
        MessageSecurity::AttachedJws => {
            let envelope =
                SignedEnvelope::sign(request, &client.keys, TOKEN_METHOD, TOKEN_ENDPOINT)?;
            Ok(SecuredRequest {
                content_type: JSON_CONTENT_TYPE,
                body: envelope.to_compact(),
            })
        }
        mode @ MessageSecurity::DetachedSignature => Err(GnapError::UnsupportedSecurityMode {
            mode: mode.proof().to_string(),
        }),
    }
}
