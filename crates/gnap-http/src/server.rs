//! Token endpoint

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::any,
};
use gnap_core::GrantServer;
use tokio::net::TcpListener;

use crate::error::{TransportError, TransportResult};

/// Router exposing the server's token endpoint
///
/// The route accepts every method so that non-POST requests get the same
/// `500` as any other failure instead of axum's `405`.
pub fn router(server: Arc<GrantServer>) -> Router {
    let endpoint = server.token_endpoint().to_string();
    Router::new()
        .route(&endpoint, any(token_handler))
        .with_state(server)
}

async fn token_handler(
    State(server): State<Arc<GrantServer>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    tracing::info!(method = %method, content_type = ?content_type, "Received token request");

    if method != Method::POST {
        tracing::warn!(method = %method, "Token endpoint only accepts POST");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    // RSA verification and signing are CPU-bound
    let outcome =
        tokio::task::spawn_blocking(move || server.handle_incoming(&body, content_type.as_deref()))
            .await;

    match outcome {
        Ok(Ok(token)) => (StatusCode::OK, Json(token.to_response())).into_response(),
        // Already logged with its stage by the grant pipeline
        Ok(Err(_rejection)) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Grant pipeline task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve the token endpoint on `address` until Ctrl-C
///
/// # Errors
/// Returns [`TransportError::Io`] if the address cannot be bound or the
/// server fails.
pub async fn serve(address: &str, server: Arc<GrantServer>) -> TransportResult<()> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|source| TransportError::Io {
            address: address.to_string(),
            source,
        })?;
    serve_with_shutdown(listener, server, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` completes
///
/// # Errors
/// Returns [`TransportError::Io`] if the server fails.
pub async fn serve_with_shutdown(
    listener: TcpListener,
    server: Arc<GrantServer>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> TransportResult<()> {
    let address = listener
        .local_addr()
        .map(|addr: SocketAddr| addr.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());

    tracing::info!(
        address = %address,
        endpoint = %server.token_endpoint(),
        issuer = %server.identity().name,
        client_key_id = %server.client_key_id(),
        "Authorization server listening"
    );

    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|source| TransportError::Io {
            address: address.clone(),
            source,
        })?;

    tracing::info!(address = %address, "Authorization server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        // Without a signal handler, run until the process is killed
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
