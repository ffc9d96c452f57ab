//! CLI error types

use std::path::PathBuf;

use gnap_core::GnapError;
use gnap_http::TransportError;
use thiserror::Error;

/// Errors surfaced by `gnap` commands
#[derive(Error, Debug)]
pub enum CliError {
    /// Protocol or key-material failure
    #[error(transparent)]
    Core(#[from] GnapError),

    /// HTTP failure talking to or serving the token endpoint
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Configuration could not be assembled
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Config file not found
    #[error("Configuration file not found: {0}")]
    ConfigFileNotFound(PathBuf),

    /// Config file extension not recognized
    #[error("Unsupported configuration file format: {0}. Use .toml, .yaml, .yml, or .json")]
    UnsupportedConfigFormat(PathBuf),

    /// No cache path given and no home directory to default to
    #[error("Cannot determine home directory for the default cache; pass --cache")]
    NoHomeDirectory,

    /// Logging could not be initialized
    #[error("Logging setup failed: {0}")]
    Logging(#[source] std::io::Error),

    /// An identity the command needs has not been created
    #[error("{what} is not initialized; run `gnap init` first")]
    NotInitialized {
        /// Which identity
        what: String,
    },

    /// JSON output failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Hints printed after the error message
    pub fn suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Transport(TransportError::Http(_)) => vec![
                "Check that `gnap serve` is running",
                "Verify client.as_uri or pass --as-uri",
            ],
            Self::Transport(TransportError::UnexpectedStatus { .. }) => vec![
                "Check the server log for the rejected stage",
                "Client and server clocks must agree within 10 seconds",
            ],
            Self::Core(GnapError::Persistence { .. }) => vec![
                "Another gnap process may hold the cache open",
                "Use --cache to pick a different cache file",
            ],
            Self::NotInitialized { .. } => vec!["Run `gnap init` against the same cache"],
            _ => vec![],
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
