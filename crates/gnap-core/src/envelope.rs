//! Signed envelope codec
//!
//! A request body is an attached JWS (RFC 7515) over the canonical JSON of the
//! payload. Its protected header binds the signature to an HTTP method (`htm`),
//! a target path (`htu`) and an integer Unix timestamp (`ts`).
//!
//! `jsonwebtoken` only emits registered header parameters, so the header and
//! signing input are assembled here and only the RS256 primitive is delegated
//! to `jsonwebtoken::crypto`.
//!
//! Parsing accepts the compact serialization as well as the flattened and
//! general JSON serializations. Exactly one signature is allowed.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, crypto};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    Result,
    errors::GnapError,
    keys::{KeyPair, RsaJwk, SIGNING_ALGORITHM},
    unix_now,
};

/// Protected JWS header with the binding parameters
///
/// `alg` and `kid` are required for the envelope to parse; `htm`, `htu` and
/// `ts` are optional here so their absence is reported by the binding check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedHeaders {
    /// Signature algorithm
    pub alg: String,

    /// Key identifier of the signer
    pub kid: String,

    /// Lowercase HTTP method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub htm: Option<String>,

    /// Target path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub htu: Option<String>,

    /// Unix timestamp, kept as a JSON number so integers are never rounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<Value>,

    /// Any other header parameters
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProtectedHeaders {
    /// `ts` as an exact integer, if it is one
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        self.ts.as_ref().and_then(Value::as_i64)
    }
}

/// A parsed single-signature JWS
#[derive(Debug, Clone, PartialEq)]
pub struct SignedEnvelope {
    /// Protected header exactly as received (base64url)
    pub protected: String,
    /// Decoded protected header
    pub headers: ProtectedHeaders,
    /// Payload bytes
    pub payload: Vec<u8>,
    /// Signature bytes
    pub signature: Vec<u8>,
}

/// JSON serialization of a JWS (RFC 7515 section 7.2)
#[derive(Deserialize)]
struct JsonSerialization {
    payload: Option<String>,
    protected: Option<String>,
    signature: Option<String>,
    signatures: Option<Vec<JsonSignature>>,
}

#[derive(Deserialize)]
struct JsonSignature {
    protected: Option<String>,
    signature: String,
}

impl SignedEnvelope {
    /// Sign `payload` for `method` and `path` at the current time
    ///
    /// # Errors
    /// Returns [`GnapError::KeyParse`] if `key` has no usable private half,
    /// [`GnapError::Serialization`] if the payload cannot be encoded and
    /// [`GnapError::Internal`] if the clock or signer fails.
    pub fn sign<T: Serialize + ?Sized>(
        payload: &T,
        key: &KeyPair,
        method: &str,
        path: &str,
    ) -> Result<Self> {
        Self::sign_at(payload, key, method, path, unix_now()?)
    }

    /// Sign `payload` with an explicit `ts`
    ///
    /// # Errors
    /// Same as [`Self::sign`].
    pub fn sign_at<T: Serialize + ?Sized>(
        payload: &T,
        key: &KeyPair,
        method: &str,
        path: &str,
        ts: i64,
    ) -> Result<Self> {
        let headers = ProtectedHeaders {
            alg: SIGNING_ALGORITHM.to_string(),
            kid: key.key_id.clone(),
            htm: Some(method.to_lowercase()),
            htu: Some(path.to_string()),
            ts: Some(Value::from(ts)),
            extra: Map::new(),
        };
        let payload = serde_json::to_vec(payload)?;
        Self::sign_with_headers(headers, payload, key)
    }

    /// Sign raw payload bytes under arbitrary protected headers
    ///
    /// # Errors
    /// Same as [`Self::sign`].
    pub fn sign_with_headers(
        headers: ProtectedHeaders,
        payload: Vec<u8>,
        key: &KeyPair,
    ) -> Result<Self> {
        let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&headers)?);
        let signing_input = format!("{protected}.{}", URL_SAFE_NO_PAD.encode(&payload));

        let encoding_key = key.encoding_key()?;
        let signature = crypto::sign(signing_input.as_bytes(), &encoding_key, Algorithm::RS256)
            .map_err(|e| GnapError::Internal {
                reason: format!("Failed to sign message body: {e}"),
            })?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| GnapError::Internal {
                reason: format!("Signer returned invalid base64url: {e}"),
            })?;

        tracing::debug!(
            key_id = %key.key_id,
            htm = ?headers.htm,
            htu = ?headers.htu,
            ts = ?headers.ts,
            "Signed envelope"
        );

        Ok(Self {
            protected,
            headers,
            payload,
            signature,
        })
    }

    /// Parse wire bytes without checking the signature
    ///
    /// # Errors
    /// Returns [`GnapError::Parse`] if the bytes are not a single-signature
    /// JWS with a decodable protected header naming an `alg` and a `kid`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| GnapError::parse("Message is not valid UTF-8"))?
            .trim();

        if text.starts_with('{') {
            Self::parse_json(text)
        } else {
            Self::parse_compact(text)
        }
    }

    fn parse_compact(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split('.').collect();
        let [protected, payload, signature] = parts.as_slice() else {
            return Err(GnapError::parse(format!(
                "Expected 3 compact JWS segments, got {}",
                parts.len()
            )));
        };
        Self::from_segments(protected, payload, signature)
    }

    fn parse_json(text: &str) -> Result<Self> {
        let json: JsonSerialization = serde_json::from_str(text)
            .map_err(|e| GnapError::parse(format!("Invalid JWS JSON serialization: {e}")))?;

        let payload = json
            .payload
            .ok_or_else(|| GnapError::parse("JWS has no payload"))?;

        match json.signatures {
            Some(mut signatures) => {
                if signatures.len() != 1 {
                    return Err(GnapError::parse(format!(
                        "Expected exactly 1 signature, got {}",
                        signatures.len()
                    )));
                }
                let entry = signatures.remove(0);
                let protected = entry
                    .protected
                    .ok_or_else(|| GnapError::parse("Signature has no protected header"))?;
                Self::from_segments(&protected, &payload, &entry.signature)
            }
            None => {
                let protected = json
                    .protected
                    .ok_or_else(|| GnapError::parse("JWS has no protected header"))?;
                let signature = json
                    .signature
                    .ok_or_else(|| GnapError::parse("JWS has no signature"))?;
                Self::from_segments(&protected, &payload, &signature)
            }
        }
    }

    fn from_segments(protected: &str, payload: &str, signature: &str) -> Result<Self> {
        let header_bytes = decode_segment(protected, "protected header")?;
        let headers: ProtectedHeaders = serde_json::from_slice(&header_bytes)
            .map_err(|e| GnapError::parse(format!("Invalid protected header: {e}")))?;

        Ok(Self {
            protected: protected.to_string(),
            headers,
            payload: decode_segment(payload, "payload")?,
            signature: decode_segment(signature, "signature")?,
        })
    }

    /// Check the signature against `key` and return the payload
    ///
    /// The header's `kid` must name `key`.
    ///
    /// # Errors
    /// Returns [`GnapError::Verification`] if the algorithm is not RS256, the
    /// key id does not match or the signature does not validate.
    pub fn verify(&self, key: &RsaJwk) -> Result<&[u8]> {
        if self.headers.alg != SIGNING_ALGORITHM {
            return Err(GnapError::verification(format!(
                "Algorithm {} not allowed",
                self.headers.alg
            )));
        }

        let expected = key.thumbprint();
        if self.headers.kid != expected {
            return Err(GnapError::verification(format!(
                "Envelope key id {} does not match expected key {expected}",
                self.headers.kid
            )));
        }

        let decoding_key = key
            .decoding_key()
            .map_err(|e| GnapError::verification(e.to_string()))?;
        let valid = crypto::verify(
            &URL_SAFE_NO_PAD.encode(&self.signature),
            self.signing_input().as_bytes(),
            &decoding_key,
            Algorithm::RS256,
        )
        .map_err(|e| GnapError::verification(e.to_string()))?;

        if !valid {
            return Err(GnapError::verification("Signature does not match"));
        }
        Ok(&self.payload)
    }

    /// Compact serialization
    #[must_use]
    pub fn to_compact(&self) -> String {
        format!(
            "{}.{}",
            self.signing_input(),
            URL_SAFE_NO_PAD.encode(&self.signature)
        )
    }

    fn signing_input(&self) -> String {
        format!("{}.{}", self.protected, URL_SAFE_NO_PAD.encode(&self.payload))
    }
}

fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| GnapError::parse(format!("Invalid base64url in {what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keypair;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::OnceLock;

    const TS: i64 = 1_700_000_000;

    fn shared_key() -> &'static KeyPair {
        static KEY: OnceLock<KeyPair> = OnceLock::new();
        KEY.get_or_init(|| generate_keypair().unwrap())
    }

    #[test]
    fn test_sign_parse_verify() {
        let key = generate_keypair().unwrap();
        let payload = json!({"resources": {"type": "photo-api"}});

        let envelope = SignedEnvelope::sign_at(&payload, &key, "POST", "/tx", TS).unwrap();
        let parsed = SignedEnvelope::parse(envelope.to_compact().as_bytes()).unwrap();

        assert_eq!(parsed, envelope);
        assert_eq!(parsed.headers.alg, "RS256");
        assert_eq!(parsed.headers.kid, key.key_id);
        assert_eq!(parsed.headers.htm.as_deref(), Some("post"));
        assert_eq!(parsed.headers.htu.as_deref(), Some("/tx"));
        assert_eq!(parsed.headers.timestamp(), Some(TS));

        let bytes = parsed.verify(&key.public).unwrap();
        let decoded: Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_flattened_json_form() {
        let key = generate_keypair().unwrap();
        let envelope = SignedEnvelope::sign_at(&json!({"a": 1}), &key, "post", "/tx", TS).unwrap();

        let wire = json!({
            "protected": envelope.protected,
            "payload": URL_SAFE_NO_PAD.encode(&envelope.payload),
            "signature": URL_SAFE_NO_PAD.encode(&envelope.signature),
        });
        let parsed = SignedEnvelope::parse(wire.to_string().as_bytes()).unwrap();

        assert!(parsed.verify(&key.public).is_ok());
    }

    #[test]
    fn test_two_signatures_rejected() {
        let key = generate_keypair().unwrap();
        let envelope = SignedEnvelope::sign_at(&json!({"a": 1}), &key, "post", "/tx", TS).unwrap();
        let signature = json!({
            "protected": envelope.protected,
            "signature": URL_SAFE_NO_PAD.encode(&envelope.signature),
        });

        let wire = json!({
            "payload": URL_SAFE_NO_PAD.encode(&envelope.payload),
            "signatures": [signature.clone(), signature.clone()],
        });
        let err = SignedEnvelope::parse(wire.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, GnapError::Parse { .. }));
        assert!(err.to_string().contains("Badly formatted"));

        let wire = json!({
            "payload": URL_SAFE_NO_PAD.encode(&envelope.payload),
            "signatures": [signature],
        });
        let parsed = SignedEnvelope::parse(wire.to_string().as_bytes()).unwrap();
        assert!(parsed.verify(&key.public).is_ok());
    }

    #[test]
    fn test_malformed_structure() {
        for wire in ["", "a.b", "a.b.c.d", "!!!.e30.AA", "{\"payload\":\"e30\"}"] {
            assert!(
                matches!(SignedEnvelope::parse(wire.as_bytes()), Err(GnapError::Parse { .. })),
                "accepted {wire:?}"
            );
        }

        // Header without alg
        let header = URL_SAFE_NO_PAD.encode(br#"{"kid":"k","htm":"post"}"#);
        let wire = format!("{header}.e30.AAAA");
        assert!(matches!(
            SignedEnvelope::parse(wire.as_bytes()),
            Err(GnapError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_kid_rejected() {
        let key = generate_keypair().unwrap();
        let envelope = SignedEnvelope::sign_at(&json!({"a": 1}), &key, "post", "/tx", TS).unwrap();

        let mut header = serde_json::to_value(&envelope.headers).unwrap();
        header.as_object_mut().unwrap().remove("kid");
        let wire = format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(&envelope.payload),
            URL_SAFE_NO_PAD.encode(&envelope.signature),
        );

        let err = SignedEnvelope::parse(wire.as_bytes()).unwrap_err();
        assert!(matches!(err, GnapError::Parse { .. }));
        assert!(err.to_string().contains("kid"), "{err}");
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = generate_keypair().unwrap();
        let other = generate_keypair().unwrap();
        let envelope = SignedEnvelope::sign_at(&json!({}), &signer, "post", "/tx", TS).unwrap();

        // kid names the signer, not `other`
        assert!(matches!(
            envelope.verify(&other.public),
            Err(GnapError::Verification { .. })
        ));

        // Claiming `other`'s kid does not make the signer's signature valid
        let mut relabeled = envelope.clone();
        relabeled.headers.kid = other.key_id.clone();
        assert!(matches!(
            relabeled.verify(&other.public),
            Err(GnapError::Verification { .. })
        ));
    }

    #[test]
    fn test_tampered_protected_header_fails() {
        let key = generate_keypair().unwrap();
        let envelope = SignedEnvelope::sign_at(&json!({}), &key, "post", "/tx", TS).unwrap();

        let mut headers = envelope.headers.clone();
        headers.htu = Some("/other".to_string());
        let forged = format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&headers).unwrap()),
            URL_SAFE_NO_PAD.encode(&envelope.payload),
            URL_SAFE_NO_PAD.encode(&envelope.signature),
        );

        let parsed = SignedEnvelope::parse(forged.as_bytes()).unwrap();
        assert!(matches!(
            parsed.verify(&key.public),
            Err(GnapError::Verification { .. })
        ));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let key = generate_keypair().unwrap();
        let mut envelope = SignedEnvelope::sign_at(&json!({}), &key, "post", "/tx", TS).unwrap();
        envelope.headers.alg = "none".to_string();

        assert!(matches!(
            envelope.verify(&key.public),
            Err(GnapError::Verification { .. })
        ));
    }

    #[test]
    fn test_float_timestamp_is_not_an_integer() {
        let headers: ProtectedHeaders =
            serde_json::from_str(r#"{"alg":"RS256","kid":"k","ts":1700000000.5}"#).unwrap();
        assert_eq!(headers.timestamp(), None);

        let headers: ProtectedHeaders =
            serde_json::from_str(r#"{"alg":"RS256","kid":"k","ts":"1700000000"}"#).unwrap();
        assert_eq!(headers.timestamp(), None);

        let headers: ProtectedHeaders =
            serde_json::from_str(r#"{"alg":"RS256","kid":"k","ts":9007199254740993}"#).unwrap();
        assert_eq!(headers.timestamp(), Some(9_007_199_254_740_993));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_verify_returns_signed_payload(
            payload in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..5),
        ) {
            let key = shared_key();
            let envelope = SignedEnvelope::sign_at(&payload, key, "post", "/tx", TS).unwrap();
            let parsed = SignedEnvelope::parse(envelope.to_compact().as_bytes()).unwrap();

            let bytes = parsed.verify(&key.public).unwrap();
            let decoded: BTreeMap<String, i64> = serde_json::from_slice(bytes).unwrap();
            prop_assert_eq!(decoded, payload);
        }

        #[test]
        fn prop_flipped_byte_fails(
            index in any::<proptest::sample::Index>(),
            bit in 0u8..8,
            in_signature in any::<bool>(),
        ) {
            let key = shared_key();
            let payload = json!({"actions": ["read", "print"]});
            let mut envelope = SignedEnvelope::sign_at(&payload, key, "post", "/tx", TS).unwrap();

            let target = if in_signature {
                &mut envelope.signature
            } else {
                &mut envelope.payload
            };
            let i = index.index(target.len());
            target[i] ^= 1 << bit;

            let is_verification_error =
                matches!(envelope.verify(&key.public), Err(GnapError::Verification { .. }));
            prop_assert!(is_verification_error);
        }
    }
}
