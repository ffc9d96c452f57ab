//! # GNAP HTTP
//!
//! Transport adapter around [`gnap_core`]: an `axum` router serving the token
//! endpoint and a `reqwest` client that posts secured requests to it.
//!
//! Every failure on the server side is answered with `500` and an empty body.
//! The failing stage is logged but not exposed to the caller.

pub mod client;
pub mod error;
pub mod server;

pub use client::GrantHttpClient;
pub use error::{TransportError, TransportResult};
pub use server::{router, serve, serve_with_shutdown};
