//! Client and authorization-server identities
//!
//! An identity is created once, on first use of its scope, and read back from
//! the key-value store on every later run. Fields live under a scope prefix
//! (`client.<id>.` or `as.<id>.`); absence of `<prefix>Name` means the scope
//! has not been initialized yet.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    FRESHNESS_WINDOW_SECONDS, Result, TOKEN_ENDPOINT,
    errors::GnapError,
    keys::{KeyPair, RsaJwk, generate_keypair},
    store::KeyValueStore,
};

const FIELD_NAME: &str = "Name";
const FIELD_URI: &str = "URI";
const FIELD_AS_URI: &str = "asUri";
const FIELD_MESSAGE_SECURITY: &str = "MessageSecurity";
const FIELD_PRIVATE_KEY: &str = "Prv";
const FIELD_PUBLIC_KEY: &str = "Pub";

/// How a client proves possession of its key on each request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSecurity {
    /// Signature sent apart from the body (`jwsd`)
    DetachedSignature,
    /// Body is a JWS carrying the payload (`jws`)
    AttachedJws,
}

impl MessageSecurity {
    /// Proof method name carried in `client.key.proof`
    #[must_use]
    pub fn proof(self) -> &'static str {
        match self {
            Self::DetachedSignature => "jwsd",
            Self::AttachedJws => "jws",
        }
    }

    /// Numeric code used in the persisted `MessageSecurity` field
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::DetachedSignature => 0,
            Self::AttachedJws => 1,
        }
    }

    /// Parse a persisted code or a proof name
    ///
    /// # Errors
    /// Returns [`GnapError::UnsupportedSecurityMode`] for anything else.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "0" | "jwsd" | "detached_signature" => Ok(Self::DetachedSignature),
            "1" | "jws" | "attached_jws" => Ok(Self::AttachedJws),
            other => Err(GnapError::UnsupportedSecurityMode {
                mode: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for MessageSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proof())
    }
}

/// Which identity a set of persisted fields belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityScope {
    /// A requesting client
    Client(String),
    /// An authorization server
    AuthzServer(String),
}

impl IdentityScope {
    /// Key prefix in the store, including the trailing dot
    #[must_use]
    pub fn prefix(&self) -> String {
        match self {
            Self::Client(id) => format!("client.{id}."),
            Self::AuthzServer(id) => format!("as.{id}."),
        }
    }

    /// Fully qualified key for one field
    #[must_use]
    pub fn key(&self, field: &str) -> String {
        format!("{}{field}", self.prefix())
    }
}

impl fmt::Display for IdentityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.prefix();
        f.write_str(prefix.trim_end_matches('.'))
    }
}

/// Settings a client identity is created from on first run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientProfile {
    /// Scope identifier
    pub id: String,
    /// Display name sent in `client.name`
    pub name: String,
    /// Client URI sent in `client.uri`
    pub uri: String,
    /// Token endpoint of the authorization server
    pub as_uri: String,
    /// Proof mode for outgoing requests
    pub message_security: MessageSecurity,
}

impl Default for ClientProfile {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "My First Client".to_string(),
            uri: "http://localhost/client/clientID".to_string(),
            as_uri: "http://localhost:9090/tx".to_string(),
            message_security: MessageSecurity::AttachedJws,
        }
    }
}

impl ClientProfile {
    /// Store scope of this client
    #[must_use]
    pub fn scope(&self) -> IdentityScope {
        IdentityScope::Client(self.id.clone())
    }
}

/// Settings for the authorization server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerProfile {
    /// Scope identifier
    pub id: String,
    /// Issuer name placed in access tokens
    pub name: String,
    /// Server URI
    pub uri: String,
    /// Listen address
    pub bind_address: String,
    /// Listen port
    pub port: u16,
    /// The single registered client whose public key is trusted
    pub client_id: String,
    /// Path requests are bound to
    pub token_endpoint: String,
    /// Half-width of the open freshness window
    pub freshness_window_seconds: i64,
}

impl Default for ServerProfile {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "My Authorization Server".to_string(),
            uri: "http://localhost:9090".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: 9090,
            client_id: "default".to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            freshness_window_seconds: FRESHNESS_WINDOW_SECONDS,
        }
    }
}

impl ServerProfile {
    /// Store scope of this server
    #[must_use]
    pub fn scope(&self) -> IdentityScope {
        IdentityScope::AuthzServer(self.id.clone())
    }

    /// `host:port` to listen on
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// A loaded client identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Scope identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Client URI
    pub uri: String,
    /// Token endpoint of the authorization server
    pub as_uri: String,
    /// Proof mode for outgoing requests
    pub message_security: MessageSecurity,
    /// Signing key
    pub keys: KeyPair,
}

/// A loaded authorization-server identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    /// Scope identifier
    pub id: String,
    /// Issuer name
    pub name: String,
    /// Server URI
    pub uri: String,
    /// Token signing key
    pub keys: KeyPair,
}

/// Identity lifecycle on top of a [`KeyValueStore`]
#[derive(Debug)]
pub struct KeyMaterialStore<S> {
    store: S,
}

impl<S: KeyValueStore> KeyMaterialStore<S> {
    /// Wrap a store
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The wrapped store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Release the wrapped store
    pub fn into_inner(self) -> S {
        self.store
    }

    /// Whether a scope has been initialized
    ///
    /// # Errors
    /// Returns [`GnapError::Persistence`] if the store cannot be read.
    pub fn is_initialized(&self, scope: &IdentityScope) -> Result<bool> {
        Ok(self.store.get(&scope.key(FIELD_NAME))?.is_some())
    }

    /// Load the client identity, generating and persisting it on first run
    ///
    /// # Errors
    /// Returns [`GnapError::Persistence`] on store failures,
    /// [`GnapError::KeyParse`] on malformed cached keys and
    /// [`GnapError::KeyGeneration`] if a new key cannot be made.
    pub fn load_or_create_client(&self, profile: &ClientProfile) -> Result<ClientIdentity> {
        let scope = profile.scope();
        if let Some(identity) = self.load_client(&profile.id)? {
            tracing::info!(
                scope = %scope,
                key_id = %identity.keys.key_id,
                "Loaded client identity"
            );
            return Ok(identity);
        }

        let identity = ClientIdentity {
            id: profile.id.clone(),
            name: profile.name.clone(),
            uri: profile.uri.clone(),
            as_uri: profile.as_uri.clone(),
            message_security: profile.message_security,
            keys: generate_keypair()?,
        };

        let mut entries = vec![
            (scope.key(FIELD_NAME), identity.name.clone()),
            (scope.key(FIELD_URI), identity.uri.clone()),
            (scope.key(FIELD_AS_URI), identity.as_uri.clone()),
            (
                scope.key(FIELD_MESSAGE_SECURITY),
                identity.message_security.code().to_string(),
            ),
        ];
        entries.extend(key_entries(&scope, &identity.keys)?);
        self.store.put_all(&entries)?;

        tracing::info!(scope = %scope, key_id = %identity.keys.key_id, "Created client identity");
        Ok(identity)
    }

    /// Load the authorization-server identity, generating it on first run
    ///
    /// # Errors
    /// Same as [`Self::load_or_create_client`].
    pub fn load_or_create_server(&self, profile: &ServerProfile) -> Result<ServerIdentity> {
        let scope = profile.scope();
        if let Some(identity) = self.load_server(&profile.id)? {
            tracing::info!(
                scope = %scope,
                key_id = %identity.keys.key_id,
                "Loaded authorization server identity"
            );
            return Ok(identity);
        }

        let identity = ServerIdentity {
            id: profile.id.clone(),
            name: profile.name.clone(),
            uri: profile.uri.clone(),
            keys: generate_keypair()?,
        };

        let mut entries = vec![
            (scope.key(FIELD_NAME), identity.name.clone()),
            (scope.key(FIELD_URI), identity.uri.clone()),
        ];
        entries.extend(key_entries(&scope, &identity.keys)?);
        self.store.put_all(&entries)?;

        tracing::info!(
            scope = %scope,
            key_id = %identity.keys.key_id,
            "Created authorization server identity"
        );
        Ok(identity)
    }

    /// Load a stored client identity with its private key, if present
    ///
    /// # Errors
    /// Returns [`GnapError::Persistence`] if a field is missing or unreadable
    /// and [`GnapError::KeyParse`] on malformed key JSON.
    pub fn load_client(&self, id: &str) -> Result<Option<ClientIdentity>> {
        let scope = IdentityScope::Client(id.to_string());
        let Some(name) = self.store.get(&scope.key(FIELD_NAME))? else {
            return Ok(None);
        };

        let stored = self.required(&scope, FIELD_MESSAGE_SECURITY)?;
        let message_security = MessageSecurity::parse(&stored).map_err(|e| {
            GnapError::persistence(format!(
                "Invalid stored {}: {e}",
                scope.key(FIELD_MESSAGE_SECURITY)
            ))
        })?;

        Ok(Some(ClientIdentity {
            id: id.to_string(),
            name,
            uri: self.required(&scope, FIELD_URI)?,
            as_uri: self.required(&scope, FIELD_AS_URI)?,
            message_security,
            keys: self.read_keys(&scope, true)?,
        }))
    }

    /// Load a stored authorization-server identity, if present
    ///
    /// # Errors
    /// Same as [`Self::load_client`].
    pub fn load_server(&self, id: &str) -> Result<Option<ServerIdentity>> {
        let scope = IdentityScope::AuthzServer(id.to_string());
        let Some(name) = self.store.get(&scope.key(FIELD_NAME))? else {
            return Ok(None);
        };

        Ok(Some(ServerIdentity {
            id: id.to_string(),
            name,
            uri: self.required(&scope, FIELD_URI)?,
            keys: self.read_keys(&scope, true)?,
        }))
    }

    /// Read a client's public key only, as the server does at startup
    ///
    /// # Errors
    /// Returns [`GnapError::Persistence`] if the client was never initialized
    /// and [`GnapError::KeyParse`] on malformed key JSON.
    pub fn load_client_public(&self, id: &str) -> Result<KeyPair> {
        let scope = IdentityScope::Client(id.to_string());
        if !self.is_initialized(&scope)? {
            return Err(GnapError::persistence(format!(
                "Client '{id}' is not initialized; run the client once or `gnap init`"
            )));
        }
        self.read_keys(&scope, false)
    }

    fn required(&self, scope: &IdentityScope, field: &str) -> Result<String> {
        let key = scope.key(field);
        self.store
            .get(&key)?
            .ok_or_else(|| GnapError::persistence(format!("Missing stored field {key}")))
    }

    fn read_keys(&self, scope: &IdentityScope, with_private: bool) -> Result<KeyPair> {
        let public = RsaJwk::from_json(&self.required(scope, FIELD_PUBLIC_KEY)?)?;
        if public.is_private() {
            return Err(GnapError::KeyParse {
                reason: format!("Stored public key for {scope} contains private members"),
            });
        }

        let private = if with_private {
            Some(RsaJwk::from_json(&self.required(scope, FIELD_PRIVATE_KEY)?)?)
        } else {
            None
        };

        KeyPair::from_jwks(public, private)
    }
}

fn key_entries(scope: &IdentityScope, keys: &KeyPair) -> Result<Vec<(String, String)>> {
    let private = keys.private.as_ref().ok_or_else(|| GnapError::KeyGeneration {
        reason: "Generated key pair has no private half".to_string(),
    })?;
    Ok(vec![
        (scope.key(FIELD_PRIVATE_KEY), private.to_json()?),
        (scope.key(FIELD_PUBLIC_KEY), keys.public.to_json()?),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scope_prefixes() {
        assert_eq!(IdentityScope::Client("default".into()).prefix(), "client.default.");
        assert_eq!(IdentityScope::AuthzServer("a1".into()).key("Pub"), "as.a1.Pub");
    }

    #[test]
    fn test_message_security_names() {
        assert_eq!(MessageSecurity::AttachedJws.proof(), "jws");
        assert_eq!(MessageSecurity::DetachedSignature.proof(), "jwsd");
        assert_eq!(MessageSecurity::parse("1").unwrap(), MessageSecurity::AttachedJws);
        assert_eq!(
            MessageSecurity::parse("jwsd").unwrap(),
            MessageSecurity::DetachedSignature
        );
        assert!(matches!(
            MessageSecurity::parse("7"),
            Err(GnapError::UnsupportedSecurityMode { .. })
        ));
    }

    #[test]
    fn test_client_created_once() {
        let keys = KeyMaterialStore::new(MemoryStore::new());
        let profile = ClientProfile::default();

        let first = keys.load_or_create_client(&profile).unwrap();
        let second = keys.load_or_create_client(&profile).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.name, "My First Client");
        assert_eq!(first.message_security, MessageSecurity::AttachedJws);
        assert_eq!(
            keys.store().get("client.default.MessageSecurity").unwrap().as_deref(),
            Some("1")
        );
    }

    #[test]
    fn test_server_reads_public_key_only() {
        let keys = KeyMaterialStore::new(MemoryStore::new());
        let client = keys.load_or_create_client(&ClientProfile::default()).unwrap();

        let public = keys.load_client_public("default").unwrap();
        assert_eq!(public.key_id, client.keys.key_id);
        assert!(public.private.is_none());
    }

    #[test]
    fn test_uninitialized_client_public_key() {
        let keys = KeyMaterialStore::new(MemoryStore::new());
        assert!(matches!(
            keys.load_client_public("nobody"),
            Err(GnapError::Persistence { .. })
        ));
    }

    #[test]
    fn test_malformed_cached_key() {
        let store = MemoryStore::new();
        let scope = IdentityScope::AuthzServer("default".into());
        store
            .put_all(&[
                (scope.key("Name"), "AS".to_string()),
                (scope.key("URI"), "http://as".to_string()),
                (scope.key("Pub"), "{broken".to_string()),
                (scope.key("Prv"), "{broken".to_string()),
            ])
            .unwrap();

        let keys = KeyMaterialStore::new(store);
        assert!(matches!(
            keys.load_or_create_server(&ServerProfile::default()),
            Err(GnapError::KeyParse { .. })
        ));
    }

    #[test]
    fn test_unknown_stored_security_code() {
        let keys = KeyMaterialStore::new(MemoryStore::new());
        let client = keys.load_or_create_client(&ClientProfile::default()).unwrap();
        keys.store()
            .put_all(&[(
                IdentityScope::Client("default".into()).key("MessageSecurity"),
                "7".to_string(),
            )])
            .unwrap();

        let err = keys.load_client("default").unwrap_err();
        assert!(matches!(err, GnapError::Persistence { .. }), "{err}");
        assert!(matches!(
            keys.load_or_create_client(&ClientProfile::default()),
            Err(GnapError::Persistence { .. })
        ));
    }

    #[test]
    fn test_scopes_are_independent() {
        let keys = KeyMaterialStore::new(MemoryStore::new());
        let client = keys.load_or_create_client(&ClientProfile::default()).unwrap();
        let server = keys.load_or_create_server(&ServerProfile::default()).unwrap();

        assert_ne!(client.keys.key_id, server.keys.key_id);
        assert!(keys.is_initialized(&IdentityScope::AuthzServer("default".into())).unwrap());
        assert!(!keys.is_initialized(&IdentityScope::Client("other".into())).unwrap());
    }
}
