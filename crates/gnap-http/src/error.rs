//! Transport error types

use gnap_core::GnapError;
use thiserror::Error;

/// Errors raised while serving or calling the token endpoint
#[derive(Error, Debug)]
pub enum TransportError {
    /// Protocol-level failure
    #[error(transparent)]
    Core(#[from] GnapError),

    /// HTTP client failure (connect, timeout, body decoding)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The listener could not be bound or the server stopped with an error
    #[error("Server I/O error on {address}: {source}")]
    Io {
        /// Listen address
        address: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The token endpoint answered with something other than 200
    #[error("Expected status code 200, got {status}")]
    UnexpectedStatus {
        /// Status received
        status: u16,
    },
}

/// Transport result type
pub type TransportResult<T> = Result<T, TransportError>;
