//! Command implementations
//!
//! Every command opens the cache, does its work and closes it again before
//! any network I/O, so a `serve` process never holds the cache while a
//! `request` from another process needs it.

use std::path::Path;
use std::sync::Arc;

use gnap_core::{
    AllowAll, BindingValidator, ClientIdentity, GrantServer, KeyMaterialStore, Nonce, RedbStore,
    ServerIdentity, TokenResponse, build_token_request,
};
use gnap_http::GrantHttpClient;
use serde_json::{Value, json};

use crate::cli::{RequestArgs, ServeArgs};
use crate::config::GnapConfig;
use crate::error::{CliError, CliResult};

fn open_store(cache: &Path) -> CliResult<KeyMaterialStore<RedbStore>> {
    tracing::debug!(cache = %cache.display(), "Opening identity cache");
    Ok(KeyMaterialStore::new(RedbStore::open(cache)?))
}

/// Create both identities if they are missing
///
/// # Errors
/// Returns [`CliError::Core`] on cache or key-generation failures.
pub fn init(config: &GnapConfig, cache: &Path) -> CliResult<(ClientIdentity, ServerIdentity)> {
    let store = open_store(cache)?;
    let client = store.load_or_create_client(&config.client)?;
    let server = store.load_or_create_server(&config.server)?;
    Ok((client, server))
}

/// Public keys and key ids of the cached identities
///
/// Never creates anything and never prints private members.
///
/// # Errors
/// Returns [`CliError::NotInitialized`] if either identity is missing.
pub fn show(config: &GnapConfig, cache: &Path) -> CliResult<Value> {
    let store = open_store(cache)?;

    let client = store
        .load_client(&config.client.id)?
        .ok_or_else(|| CliError::NotInitialized {
            what: format!("Client '{}'", config.client.id),
        })?;
    let server = store
        .load_server(&config.server.id)?
        .ok_or_else(|| CliError::NotInitialized {
            what: format!("Authorization server '{}'", config.server.id),
        })?;

    Ok(json!({
        "client": {
            "id": client.id,
            "name": client.name,
            "uri": client.uri,
            "asUri": client.as_uri,
            "messageSecurity": client.message_security.proof(),
            "keyId": client.keys.key_id,
            "publicKey": client.keys.public,
        },
        "authorizationServer": {
            "id": server.id,
            "name": server.name,
            "uri": server.uri,
            "keyId": server.keys.key_id,
            "publicKey": server.keys.public,
        },
    }))
}

/// Build the grant server from the cache and config
///
/// The server identity is created on first run. The trusted client must
/// already exist; only its public key is read.
///
/// # Errors
/// Returns [`CliError::Core`] if the cache cannot be read or the client has
/// not been initialized.
pub fn bootstrap_server(config: &GnapConfig, cache: &Path) -> CliResult<GrantServer> {
    let (identity, client_key) = {
        let store = open_store(cache)?;
        let identity = store.load_or_create_server(&config.server)?;
        let client_key = store.load_client_public(&config.server.client_id)?;
        (identity, client_key)
    };

    Ok(GrantServer::new(identity, client_key, Arc::new(AllowAll))
        .with_validator(BindingValidator::new(config.server.freshness_window_seconds))
        .with_token_endpoint(config.server.token_endpoint.clone()))
}

/// Run the authorization server until Ctrl-C
///
/// # Errors
/// Returns bootstrap failures and [`CliError::Transport`] if the listener
/// cannot be bound.
pub async fn serve(config: &GnapConfig, cache: &Path, args: ServeArgs) -> CliResult<()> {
    let mut profile = config.server.clone();
    if let Some(bind) = args.bind {
        profile.bind_address = bind;
    }
    if let Some(port) = args.port {
        profile.port = port;
    }

    let server = bootstrap_server(config, cache)?;
    gnap_http::serve(&profile.listen_address(), Arc::new(server)).await?;
    Ok(())
}

/// Sign a token request for the cached client and send it
///
/// # Errors
/// Returns [`CliError::Core`] on cache or signing failures and
/// [`CliError::Transport`] if the server is unreachable or answers with
/// anything but 200.
pub async fn request(
    config: &GnapConfig,
    cache: &Path,
    args: RequestArgs,
) -> CliResult<TokenResponse> {
    let mut client = {
        let store = open_store(cache)?;
        store.load_or_create_client(&config.client)?
    };
    if let Some(as_uri) = args.as_uri {
        client.as_uri = as_uri;
    }

    let request = build_token_request(
        &args.resource_type,
        &args.actions,
        &args.location,
        &client,
        &args.redirect_uri,
        Nonce::generate()?,
    );

    let response = GrantHttpClient::new()?.request_token(&request, &client).await?;
    tracing::info!(as_uri = %client.as_uri, "Received access token");
    Ok(response)
}
