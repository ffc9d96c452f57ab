//! # GNAP Core - Signed Grant Requests
//!
//! Protocol core for a minimal grant-negotiation exchange: a client assembles a
//! structured access request, signs it as a JWS whose protected header binds it
//! to an HTTP method, a target path and a timestamp, and the authorization
//! server checks that binding, verifies the signature, consults a policy and
//! issues a signed access token.
//!
//! ## Architecture
//!
//! - `errors` - Error taxonomy and the server-side [`Rejection`]
//! - `keys` - RSA key pairs, JWK encoding and RFC 7638 key identifiers
//! - `store` - Key-value persistence seam (`redb` file, in-memory for tests)
//! - `identity` - Client and authorization-server identities, load-or-create
//! - `envelope` - Signed envelope codec (sign, parse, verify)
//! - `binding` - `htm` / `htu` / `ts` binding and freshness checks
//! - `request` - The `TokenRequest` document and its builder
//! - `token` - Access token claims, minting and inspection
//! - `policy` - Injected allow/deny capability
//! - `client` - Securing a request according to the client's message security
//! - `server` - The grant pipeline run for each incoming request
//!
//! ## Limitations
//!
//! - One signature algorithm (RS256), never negotiated.
//! - The freshness window is the only replay defense; used timestamps are not
//!   tracked, so a captured request can be replayed while it is still fresh.

pub mod binding;
pub mod client;
pub mod envelope;
pub mod errors;
pub mod identity;
pub mod keys;
pub mod policy;
pub mod request;
pub mod server;
pub mod store;
pub mod token;

pub use binding::BindingValidator;
pub use client::{SecuredRequest, secure_request};
pub use envelope::{ProtectedHeaders, SignedEnvelope};
pub use errors::{BindingError, ErrorKind, GnapError, Rejection, ServerStage};
pub use identity::{
    ClientIdentity, ClientProfile, IdentityScope, KeyMaterialStore, MessageSecurity,
    ServerIdentity, ServerProfile,
};
pub use keys::{KeyPair, RsaJwk, generate_keypair};
pub use policy::{AllowAll, Decision, DenyAll, PolicyDecision};
pub use request::{Nonce, TokenRequest, build_token_request};
pub use server::GrantServer;
pub use store::{KeyValueStore, MemoryStore, RedbStore};
pub use token::{AccessToken, AccessTokenClaims, AccessTokenValue, TokenResponse};

/// Core result type
pub type Result<T> = std::result::Result<T, GnapError>;

/// Token endpoint path the signed request is bound to
pub const TOKEN_ENDPOINT: &str = "/tx";

/// HTTP method the signed request is bound to (lowercase on the wire)
pub const TOKEN_METHOD: &str = "post";

/// Content type of an attached-JWS request body
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Half-width of the open freshness window around the server clock
pub const FRESHNESS_WINDOW_SECONDS: i64 = 10;

/// Validity of an issued access token
pub const ACCESS_TOKEN_LIFETIME_SECONDS: i64 = 3600;

/// Random bytes in an interaction nonce (hex-encoded on the wire)
pub const NONCE_LENGTH: usize = 12;

/// RSA modulus size for generated key pairs
pub const RSA_KEY_BITS: usize = 2048;

/// Current Unix time in whole seconds
///
/// # Errors
/// Returns [`GnapError::Internal`] if the system clock is before the Unix epoch.
pub fn unix_now() -> Result<i64> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .map_err(|_| GnapError::Internal {
            reason: "System clock before Unix epoch".to_string(),
        })
}
