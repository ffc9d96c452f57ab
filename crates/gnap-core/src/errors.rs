//! Error types for key material, envelopes and the grant pipeline

use std::fmt;

use thiserror::Error;

/// Errors produced by the protocol core
#[derive(Error, Debug)]
pub enum GnapError {
    /// Randomness source or RSA key construction failed
    #[error("Key generation failed: {reason}")]
    KeyGeneration {
        /// Failure details
        reason: String,
    },

    /// The persistent store could not be opened, read or written
    #[error("Persistence error: {reason}")]
    Persistence {
        /// Failure details
        reason: String,
    },

    /// Cached key JSON is malformed or not a usable RSA key
    #[error("Key parse error: {reason}")]
    KeyParse {
        /// Failure details
        reason: String,
    },

    /// The envelope or its payload is structurally malformed
    #[error("Badly formatted message: {reason}")]
    Parse {
        /// Failure details
        reason: String,
    },

    /// The signature does not validate against the expected key
    #[error("Signature verification failed: {reason}")]
    Verification {
        /// Failure details
        reason: String,
    },

    /// Protected binding headers do not match the request
    #[error("Binding check failed: {0}")]
    Binding(#[from] BindingError),

    /// Request body content type is not accepted
    #[error("Cannot handle content type: {content_type}")]
    UnsupportedContentType {
        /// Content type as received (empty if absent)
        content_type: String,
    },

    /// The identity's message security mode has no implementation
    #[error("Unsupported message security mode: {mode}")]
    UnsupportedSecurityMode {
        /// Mode name
        mode: String,
    },

    /// The policy capability refused the grant
    #[error("Policy denied the request: {reason}")]
    PolicyDenied {
        /// Reason given by the policy
        reason: String,
    },

    /// JSON encoding of a request, header or key failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Environmental failure (clock, signing backend)
    #[error("Internal error: {reason}")]
    Internal {
        /// Failure details
        reason: String,
    },
}

impl GnapError {
    /// Fieldless classification of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyGeneration { .. } => ErrorKind::KeyGeneration,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::KeyParse { .. } => ErrorKind::KeyParse,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Verification { .. } => ErrorKind::Verification,
            Self::Binding(_) => ErrorKind::Binding,
            Self::UnsupportedContentType { .. } => ErrorKind::UnsupportedContentType,
            Self::UnsupportedSecurityMode { .. } => ErrorKind::UnsupportedSecurityMode,
            Self::PolicyDenied { .. } => ErrorKind::PolicyDenied,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn persistence(reason: impl fmt::Display) -> Self {
        Self::Persistence {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    pub(crate) fn verification(reason: impl Into<String>) -> Self {
        Self::Verification {
            reason: reason.into(),
        }
    }
}

/// Classification of [`GnapError`] without its details
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`GnapError::KeyGeneration`]
    KeyGeneration,
    /// See [`GnapError::Persistence`]
    Persistence,
    /// See [`GnapError::KeyParse`]
    KeyParse,
    /// See [`GnapError::Parse`]
    Parse,
    /// See [`GnapError::Verification`]
    Verification,
    /// See [`GnapError::Binding`]
    Binding,
    /// See [`GnapError::UnsupportedContentType`]
    UnsupportedContentType,
    /// See [`GnapError::UnsupportedSecurityMode`]
    UnsupportedSecurityMode,
    /// See [`GnapError::PolicyDenied`]
    PolicyDenied,
    /// See [`GnapError::Serialization`]
    Serialization,
    /// See [`GnapError::Internal`]
    Internal,
}

/// Mismatch between an envelope's protected headers and the received request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// `htm` absent or not the expected method
    #[error("HTTP method mismatch: expected '{expected}', envelope has {found:?}")]
    MethodMismatch {
        /// Lowercase method the endpoint accepts
        expected: String,
        /// `htm` value found, if any
        found: Option<String>,
    },

    /// `htu` absent or not exactly the expected path
    #[error("Target path mismatch: expected '{expected}', envelope has {found:?}")]
    PathMismatch {
        /// Path of the endpoint
        expected: String,
        /// `htu` value found, if any
        found: Option<String>,
    },

    /// `ts` absent or not an exact integer
    #[error("Missing or malformed timestamp")]
    MissingOrMalformedTimestamp,

    /// `now - ts` outside the open freshness window
    #[error(
        "Timestamp outside freshness window: skew {skew_seconds}s, \
         window ±{window_seconds}s (exclusive)"
    )]
    TimestampOutOfWindow {
        /// `now - ts`, saturated on overflow
        skew_seconds: i64,
        /// Half-width of the window
        window_seconds: i64,
    },
}

/// Stages of the server-side grant pipeline, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerStage {
    /// Content type check on the raw request
    Received,
    /// Envelope structure parsed
    StructurallyValid,
    /// `htm` / `htu` / `ts` checked
    BindingValid,
    /// Signature verified against the client's cached key
    Verified,
    /// Payload decoded and policy consulted
    PolicyEvaluated,
    /// Access token minted and signed
    Granted,
}

impl fmt::Display for ServerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::StructurallyValid => "structurally-valid",
            Self::BindingValid => "binding-valid",
            Self::Verified => "verified",
            Self::PolicyEvaluated => "policy-evaluated",
            Self::Granted => "granted",
        };
        f.write_str(name)
    }
}

/// A request refused by the grant pipeline
///
/// `stage` names the stage whose check failed; later stages never ran.
#[derive(Error, Debug)]
#[error("Request rejected at {stage} stage: {error}")]
pub struct Rejection {
    /// Stage whose check failed
    pub stage: ServerStage,
    /// The failure
    #[source]
    pub error: GnapError,
}

impl Rejection {
    pub(crate) fn at(stage: ServerStage) -> impl FnOnce(GnapError) -> Self {
        move |error| Self { stage, error }
    }

    /// Classification of the underlying error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// The binding error, if the binding stage failed
    #[must_use]
    pub fn binding_error(&self) -> Option<&BindingError> {
        match &self.error {
            GnapError::Binding(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = GnapError::parse("two signatures");
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.to_string().contains("Badly formatted"));

        let err: GnapError = BindingError::MissingOrMalformedTimestamp.into();
        assert_eq!(err.kind(), ErrorKind::Binding);
    }

    #[test]
    fn test_rejection_carries_stage() {
        let rejection = Rejection::at(ServerStage::BindingValid)(GnapError::Binding(
            BindingError::PathMismatch {
                expected: "/tx".to_string(),
                found: Some("/wrong-path".to_string()),
            },
        ));

        assert_eq!(rejection.kind(), ErrorKind::Binding);
        assert!(matches!(
            rejection.binding_error(),
            Some(BindingError::PathMismatch { .. })
        ));
        assert!(rejection.to_string().contains("binding-valid"));
    }
}
