//! The token request document
//!
//! Sections fixed by the protocol are typed; anything else a peer sends is
//! kept in `extra` so it round-trips unchanged.

use std::fmt;

use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    NONCE_LENGTH, Result,
    errors::GnapError,
    identity::ClientIdentity,
    keys::RsaJwk,
};

/// Callback method for redirect interaction
pub const CALLBACK_METHOD_REDIRECT: &str = "redirect";

/// Subject identifier formats requested by default
pub const DEFAULT_SUB_IDS: [&str; 2] = ["iss-sub", "email"];

/// Random value binding an interaction callback to one request
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(String);

impl Nonce {
    /// Draw a fresh nonce from the OS RNG
    ///
    /// # Errors
    /// Returns [`GnapError::KeyGeneration`] if the RNG fails.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; NONCE_LENGTH];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| GnapError::KeyGeneration {
                reason: format!("Failed to create nonce: {e}"),
            })?;
        Ok(Self(hex::encode(bytes)))
    }

    /// Hex string form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self.0)
    }
}

/// Resources the client asks access to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Resource type
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Requested actions, without duplicates
    pub actions: Vec<String>,
    /// Resource locations, in order
    pub locations: Vec<String>,
}

/// Key the client will prove possession of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientKey {
    /// Proof method (`jws` or `jwsd`)
    pub proof: String,
    /// Public key
    pub jwk: RsaJwk,
}

/// Client section of the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Display name
    pub name: String,
    /// Client URI
    pub uri: String,
    /// Client key
    pub key: ClientKey,
}

/// Where the server sends the user back after interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callback {
    /// Callback method
    pub method: String,
    /// Redirect URI
    pub uri: String,
    /// Binds the callback to this request
    pub nonce: Nonce,
}

/// Interaction section of the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interact {
    /// Whether redirect interaction is supported
    pub redirect: bool,
    /// Callback after interaction
    pub callback: Callback,
}

/// Subject information requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Requested subject identifier formats
    pub sub_ids: Vec<String>,
}

/// A grant request as sent to the token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    /// Requested resources
    pub resources: Resources,
    /// Requesting client
    pub client: ClientInfo,
    /// Interaction modes
    pub interact: Interact,
    /// Always serialized, as `[]` when empty
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Subject information
    pub subject: Subject,
    /// Unrecognized top-level members
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenRequest {
    /// Indented JSON, for logs
    #[must_use]
    pub fn dump(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<unprintable request: {e}>"))
    }
}

/// Assemble a token request for one resource location
///
/// Actions are deduplicated, first occurrence wins.
pub fn build_token_request(
    resource_type: &str,
    actions: &[impl AsRef<str>],
    location: &str,
    client: &ClientIdentity,
    redirect_uri: &str,
    nonce: Nonce,
) -> TokenRequest {
    let mut unique: Vec<String> = Vec::with_capacity(actions.len());
    for action in actions {
        let action = action.as_ref();
        if !unique.iter().any(|seen| seen == action) {
            unique.push(action.to_string());
        }
    }

    TokenRequest {
        resources: Resources {
            resource_type: resource_type.to_string(),
            actions: unique,
            locations: vec![location.to_string()],
        },
        client: ClientInfo {
            name: client.name.clone(),
            uri: client.uri.clone(),
            key: ClientKey {
                proof: client.message_security.proof().to_string(),
                jwk: client.keys.public.clone(),
            },
        },
        interact: Interact {
            redirect: true,
            callback: Callback {
                method: CALLBACK_METHOD_REDIRECT.to_string(),
                uri: redirect_uri.to_string(),
                nonce,
            },
        },
        capabilities: Vec::new(),
        subject: Subject {
            sub_ids: DEFAULT_SUB_IDS.iter().map(|s| (*s).to_string()).collect(),
        },
        extra: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MessageSecurity;
    use crate::keys::generate_keypair;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn client() -> ClientIdentity {
        ClientIdentity {
            id: "default".to_string(),
            name: "My First Client".to_string(),
            uri: "http://localhost/client/clientID".to_string(),
            as_uri: "http://localhost:9090/tx".to_string(),
            message_security: MessageSecurity::AttachedJws,
            keys: generate_keypair().unwrap(),
        }
    }

    #[test]
    fn test_nonce_shape() {
        let a = Nonce::generate().unwrap();
        let b = Nonce::generate().unwrap();

        assert_eq!(a.as_str().len(), NONCE_LENGTH * 2);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_request_wire_shape() {
        let client = client();
        let nonce = Nonce::generate().unwrap();
        let request = build_token_request(
            "photo-api",
            &["read", "print", "read"],
            "http://localhost/photos",
            &client,
            "http://localhost/client/request-done",
            nonce.clone(),
        );

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value["resources"],
            serde_json::json!({
                "type": "photo-api",
                "actions": ["read", "print"],
                "locations": ["http://localhost/photos"],
            })
        );
        assert_eq!(value["client"]["key"]["proof"], "jws");
        assert_eq!(value["client"]["key"]["jwk"]["kid"], client.keys.key_id.as_str());
        assert!(value["client"]["key"]["jwk"].get("d").is_none());
        assert_eq!(value["interact"]["redirect"], true);
        assert_eq!(value["interact"]["callback"]["method"], "redirect");
        assert_eq!(value["interact"]["callback"]["nonce"], nonce.as_str());
        assert_eq!(value["capabilities"], serde_json::json!([]));
        assert_eq!(value["subject"]["sub_ids"], serde_json::json!(["iss-sub", "email"]));
    }

    #[test]
    fn test_unknown_members_round_trip() {
        let request = build_token_request(
            "photo-api",
            &["read"],
            "http://localhost/photos",
            &client(),
            "http://localhost/done",
            Nonce::generate().unwrap(),
        );
        let mut value = serde_json::to_value(&request).unwrap();
        value["user"] = serde_json::json!({"assertion": "abc"});

        let parsed: TokenRequest = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(parsed.extra["user"]["assertion"], "abc");
        assert_eq!(serde_json::to_value(&parsed).unwrap(), value);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_capabilities_always_present(
            actions in proptest::collection::vec("[a-z]{1,8}", 0..6),
            resource_type in "[a-z-]{1,16}",
        ) {
            let request = TokenRequest {
                resources: Resources {
                    resource_type,
                    actions,
                    locations: vec!["http://localhost/photos".to_string()],
                },
                client: ClientInfo {
                    name: "c".to_string(),
                    uri: "http://c".to_string(),
                    key: ClientKey {
                        proof: "jws".to_string(),
                        jwk: RsaJwk {
                            kty: "RSA".to_string(),
                            kid: None,
                            alg: None,
                            key_use: None,
                            n: "AQAB".to_string(),
                            e: "AQAB".to_string(),
                            private: None,
                        },
                    },
                },
                interact: Interact {
                    redirect: true,
                    callback: Callback {
                        method: CALLBACK_METHOD_REDIRECT.to_string(),
                        uri: "http://c/done".to_string(),
                        nonce: Nonce("00".to_string()),
                    },
                },
                capabilities: Vec::new(),
                subject: Subject { sub_ids: Vec::new() },
                extra: Map::new(),
            };

            let json = serde_json::to_string(&request).unwrap();
            prop_assert!(json.contains(r#""capabilities":[]"#));
        }
    }
}
