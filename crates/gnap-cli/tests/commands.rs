//! Command tests against a temporary cache

use std::path::PathBuf;
use std::sync::Arc;

use gnap_cli::{CliError, GnapConfig, RequestArgs, commands};
use gnap_core::{AccessToken, GnapError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn cache() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gnap").join("cache.redb");
    (dir, path)
}

#[test]
fn test_show_requires_init() {
    let (_dir, path) = cache();
    let config = GnapConfig::default();

    let err = commands::show(&config, &path).unwrap_err();
    assert!(matches!(err, CliError::NotInitialized { .. }));
    assert!(!err.suggestions().is_empty());
}

#[test]
fn test_init_then_show() {
    let (_dir, path) = cache();
    let config = GnapConfig::default();

    let (client, server) = commands::init(&config, &path).unwrap();
    let shown = commands::show(&config, &path).unwrap();

    assert_eq!(shown["client"]["keyId"], client.keys.key_id.as_str());
    assert_eq!(shown["client"]["name"], "My First Client");
    assert_eq!(shown["client"]["messageSecurity"], "jws");
    assert_eq!(shown["authorizationServer"]["keyId"], server.keys.key_id.as_str());
    assert_eq!(shown["authorizationServer"]["name"], "My Authorization Server");

    for side in ["client", "authorizationServer"] {
        let jwk = &shown[side]["publicKey"];
        assert_eq!(jwk["kty"], "RSA");
        assert!(jwk.get("d").is_none(), "{side} leaked a private member");
    }

    // Second init reuses the cached keys
    let (again, _) = commands::init(&config, &path).unwrap();
    assert_eq!(again.keys.key_id, client.keys.key_id);
}

#[test]
fn test_bootstrap_requires_client() {
    let (_dir, path) = cache();
    let err = commands::bootstrap_server(&GnapConfig::default(), &path).unwrap_err();
    assert!(matches!(err, CliError::Core(GnapError::Persistence { .. })));
}

#[tokio::test]
async fn test_request_against_served_endpoint() {
    let (_dir, path) = cache();
    let config = GnapConfig::default();
    commands::init(&config, &path).unwrap();

    let server = Arc::new(commands::bootstrap_server(&config, &path).unwrap());
    let server_key = server.identity().keys.public.clone();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(gnap_http::serve_with_shutdown(listener, server, async move {
        let _ = stopped.await;
    }));

    let args = RequestArgs {
        as_uri: Some(format!("http://{address}/tx")),
        ..RequestArgs::default()
    };
    let response = commands::request(&config, &path, args).await.unwrap();

    assert!(!response.access_token.key);
    let claims = AccessToken::verify(&response.access_token.value, &server_key).unwrap();
    assert_eq!(claims.resources.resource_type, "photo-api");
    assert_eq!(claims.resources.actions, vec!["read", "print"]);
    assert_eq!(claims.iss, "My Authorization Server");

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
