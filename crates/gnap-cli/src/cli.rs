//! CLI argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Main CLI application structure
#[derive(Parser, Debug)]
#[command(
    name = "gnap",
    version,
    about = "Signed grant requests: a GNAP client and authorization server",
    long_about = "Creates and caches RSA identities for a client and an authorization server,\n\
                  serves the /tx token endpoint, and sends signed token requests to it.\n\n\
                  Configuration is read from built-in defaults, then an optional file\n\
                  (--config), then GNAP__* environment variables (e.g. GNAP__SERVER__PORT)."
)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (.toml, .yaml, .yml or .json)
    #[arg(long, short = 'c', global = true, env = "GNAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Key-value cache holding identities (default: ~/.gnap/cache.redb)
    #[arg(long, global = true, env = "GNAP_CACHE")]
    pub cache: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the client and authorization server identities if missing
    Init,

    /// Print public keys and key ids of the cached identities
    Show,

    /// Run the authorization server until Ctrl-C
    Serve(ServeArgs),

    /// Sign a token request and send it to the authorization server
    Request(RequestArgs),
}

/// Options for `serve`
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Listen address (overrides server.bind_address)
    #[arg(long)]
    pub bind: Option<String>,

    /// Listen port (overrides server.port)
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
}

/// Options for `request`
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Resource type
    #[arg(long, default_value = "photo-api")]
    pub resource_type: String,

    /// Requested action (repeatable)
    #[arg(long = "action", default_values_t = [String::from("read"), String::from("print")])]
    pub actions: Vec<String>,

    /// Resource location
    #[arg(long, default_value = "http://localhost/photos")]
    pub location: String,

    /// Where the server redirects after interaction
    #[arg(long, default_value = "http://localhost/client/request-done")]
    pub redirect_uri: String,

    /// Token endpoint to send to (overrides the cached client's asUri)
    #[arg(long)]
    pub as_uri: Option<String>,
}

impl Default for RequestArgs {
    fn default() -> Self {
        Self {
            resource_type: "photo-api".to_string(),
            actions: vec!["read".to_string(), "print".to_string()],
            location: "http://localhost/photos".to_string(),
            redirect_uri: "http://localhost/client/request-done".to_string(),
            as_uri: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_request_defaults_match_flags() {
        let cli = Cli::try_parse_from(["gnap", "request"]).unwrap();
        let Commands::Request(args) = cli.command else {
            panic!("expected request command");
        };
        let defaults = RequestArgs::default();
        assert_eq!(args.resource_type, defaults.resource_type);
        assert_eq!(args.actions, defaults.actions);
        assert_eq!(args.location, defaults.location);
        assert_eq!(args.redirect_uri, defaults.redirect_uri);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "gnap", "serve", "--port", "9191", "--cache", "/tmp/c.redb", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.cache, Some(PathBuf::from("/tmp/c.redb")));
        assert!(matches!(cli.command, Commands::Serve(ServeArgs { port: Some(9191), .. })));
    }
}
