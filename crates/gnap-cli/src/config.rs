//! Layered configuration
//!
//! Sources, lowest precedence first: built-in defaults, an optional file,
//! then `GNAP__`-prefixed environment variables with `__` between sections
//! (`GNAP__SERVER__PORT=9091`, `GNAP__LOGGING__LEVEL=debug`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use gnap_core::{ClientProfile, ServerProfile};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};
use crate::logging::LoggingConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "GNAP";

/// Cache location relative to the home directory
pub const DEFAULT_CACHE_PATH: &str = ".gnap/cache.redb";

/// Complete `gnap` configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GnapConfig {
    /// Identity cache; defaults to `~/.gnap/cache.redb`
    pub cache_path: Option<PathBuf>,
    /// Client identity defaults
    pub client: ClientProfile,
    /// Authorization server settings
    pub server: ServerProfile,
    /// Logging
    pub logging: LoggingConfig,
}

impl GnapConfig {
    /// Load from defaults, `file` and the process environment
    ///
    /// # Errors
    /// Returns [`CliError::ConfigFileNotFound`] or
    /// [`CliError::UnsupportedConfigFormat`] for a bad `file`, and
    /// [`CliError::Config`] if the merged values do not deserialize.
    pub fn load(file: Option<&Path>) -> CliResult<Self> {
        Self::load_with_env(file, None)
    }

    /// Like [`Self::load`] with an explicit environment instead of the process one
    ///
    /// # Errors
    /// Same as [`Self::load`].
    pub fn load_with_env(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> CliResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = file {
            if !path.exists() {
                return Err(CliError::ConfigFileNotFound(path.to_path_buf()));
            }
            let format = match path.extension().and_then(|s| s.to_str()) {
                Some("toml") => FileFormat::Toml,
                Some("yaml" | "yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return Err(CliError::UnsupportedConfigFormat(path.to_path_buf())),
            };
            let name = path
                .to_str()
                .ok_or_else(|| CliError::UnsupportedConfigFormat(path.to_path_buf()))?;
            builder = builder.add_source(File::new(name, format));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Resolve the cache path: `--cache`, then config, then the home default
    ///
    /// # Errors
    /// Returns [`CliError::NoHomeDirectory`] if nothing is set and the home
    /// directory is unknown.
    pub fn resolve_cache_path(&self, flag: Option<&Path>) -> CliResult<PathBuf> {
        if let Some(path) = flag.or(self.cache_path.as_deref()) {
            return Ok(path.to_path_buf());
        }
        dirs::home_dir()
            .map(|home| home.join(DEFAULT_CACHE_PATH))
            .ok_or(CliError::NoHomeDirectory)
    }
}
