//! # gnap
//!
//! Command-line front end for the GNAP grant exchange.
//!
//! ```text
//! gnap init                      # create client and server identities
//! gnap show                      # print public keys and key ids
//! gnap serve --port 9090         # run the /tx token endpoint
//! gnap request --action read     # sign a token request and send it
//! ```
//!
//! Command output goes to stdout as JSON; logs go to stderr or files.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;

pub use cli::{Cli, Commands, RequestArgs, ServeArgs};
pub use config::GnapConfig;
pub use error::{CliError, CliResult};

use clap::Parser;
use serde::Serialize;

/// Parse arguments, load configuration and run the selected command
///
/// # Errors
/// Returns the failing command's [`CliError`].
pub async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let mut config = GnapConfig::load(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    let _guard = config.logging.init().map_err(CliError::Logging)?;
    let cache = config.resolve_cache_path(cli.cache.as_deref())?;

    execute(cli.command, &config, &cache).await
}

async fn execute(command: Commands, config: &GnapConfig, cache: &std::path::Path) -> CliResult<()> {
    match command {
        Commands::Init => {
            let (client, server) = commands::init(config, cache)?;
            print_json(&serde_json::json!({
                "cache": cache.display().to_string(),
                "clientKeyId": client.keys.key_id,
                "authorizationServerKeyId": server.keys.key_id,
            }))
        }
        Commands::Show => print_json(&commands::show(config, cache)?),
        Commands::Serve(args) => commands::serve(config, cache, args).await,
        Commands::Request(args) => print_json(&commands::request(config, cache, args).await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
