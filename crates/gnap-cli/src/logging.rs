//! Logging initialization
//!
//! Logs never go to stdout, which carries command output (tokens, public
//! keys). `RUST_LOG` overrides the configured level.
//!
//! | Output   | Guard returned | Why                          |
//! |----------|----------------|------------------------------|
//! | `Stderr` | No             | Direct writes, no buffering  |
//! | `File`   | **Yes**        | Non-blocking writer buffers  |
//! | `None`   | No             | No subscriber installed      |

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Where log lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    /// Standard error
    Stderr,
    /// Rolling files under `directory`
    File,
    /// Logging disabled
    None,
}

/// File rotation period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    /// Every minute
    Minute,
    /// Every hour
    Hourly,
    /// Every day
    Daily,
    /// Single file
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `gnap_core=debug`
    pub level: String,
    /// JSON lines instead of human-readable output
    pub structured: bool,
    /// Output target
    pub output: LogOutput,
    /// Directory for file output
    pub directory: Option<PathBuf>,
    /// File name prefix for file output
    pub file_prefix: String,
    /// Rotation for file output
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            output: LogOutput::Stderr,
            directory: None,
            file_prefix: "gnap.log".to_string(),
            rotation: LogRotation::Daily,
        }
    }
}

/// Flushes buffered file logs when dropped; hold it until exit
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

impl LoggingConfig {
    /// Install the global subscriber
    ///
    /// Returns a guard for file output, which must be held.
    ///
    /// # Errors
    /// Returns an error if file output has no directory, the directory cannot
    /// be created, or a subscriber is already installed.
    pub fn init(&self) -> io::Result<Option<LoggingGuard>> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.output {
            LogOutput::None => Ok(None),
            LogOutput::Stderr => {
                init_stderr(self, filter)?;
                Ok(None)
            }
            LogOutput::File => {
                let dir = self.directory.as_ref().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "File logging requires logging.directory",
                    )
                })?;
                let guard = init_file(self, dir, filter)?;
                Ok(Some(guard))
            }
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// One formatting layer, JSON or text, over any writer
fn format_layer<W>(structured: bool, ansi: bool, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_ansi(ansi).with_writer(writer);
    if structured {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

fn install(layer: BoxedLayer, filter: EnvFilter) -> io::Result<()> {
    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))
}

fn init_stderr(config: &LoggingConfig, filter: EnvFilter) -> io::Result<()> {
    install(format_layer(config.structured, true, io::stderr), filter)
}

fn init_file(config: &LoggingConfig, dir: &Path, filter: EnvFilter) -> io::Result<LoggingGuard> {
    std::fs::create_dir_all(dir)?;

    let prefix = &config.file_prefix;
    let appender = match config.rotation {
        LogRotation::Minute => tracing_appender::rolling::minutely(dir, prefix),
        LogRotation::Hourly => tracing_appender::rolling::hourly(dir, prefix),
        LogRotation::Daily => tracing_appender::rolling::daily(dir, prefix),
        LogRotation::Never => tracing_appender::rolling::never(dir, prefix),
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);

    install(format_layer(config.structured, false, writer), filter)?;
    Ok(LoggingGuard { _file_guard: guard })
}
