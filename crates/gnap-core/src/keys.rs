//! RSA key pairs and their JWK representation
//!
//! Keys are held as JWKs (RFC 7517) because that is both their persisted form
//! and their wire form inside `client.key.jwk`. The key identifier is the
//! RFC 7638 SHA-256 thumbprint of the public key, so it is stable across
//! reloads and identical on the private and public halves.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::rngs::OsRng;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{RSA_KEY_BITS, Result, errors::GnapError};

/// The only signing algorithm in use
pub const SIGNING_ALGORITHM: &str = "RS256";

/// JWK key type for RSA
pub const RSA_KEY_TYPE: &str = "RSA";

/// RSA key in JWK form, public or private
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    /// Key type - always "RSA"
    pub kty: String,

    /// Key identifier (RFC 7638 thumbprint)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Signing algorithm the key is tagged with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Public key use
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Modulus (base64url)
    pub n: String,

    /// Public exponent (base64url)
    pub e: String,

    /// Private members, present only on the private half
    #[serde(flatten)]
    pub private: Option<RsaPrivateParams>,
}

/// Private RSA members of a JWK (RFC 7518 section 6.3.2), zeroized on drop
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RsaPrivateParams {
    /// Private exponent
    pub d: String,
    /// First prime factor
    pub p: String,
    /// Second prime factor
    pub q: String,
    /// First factor CRT exponent
    pub dp: String,
    /// Second factor CRT exponent
    pub dq: String,
    /// First CRT coefficient
    pub qi: String,
}

impl fmt::Debug for RsaPrivateParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RsaPrivateParams { .. }")
    }
}

impl RsaJwk {
    /// Parse a JWK from its JSON form
    ///
    /// # Errors
    /// Returns [`GnapError::KeyParse`] if the JSON is malformed or not an RSA key.
    pub fn from_json(json: &str) -> Result<Self> {
        let jwk: Self = serde_json::from_str(json).map_err(|e| GnapError::KeyParse {
            reason: format!("Invalid JWK JSON: {e}"),
        })?;
        if jwk.kty != RSA_KEY_TYPE {
            return Err(GnapError::KeyParse {
                reason: format!("Unsupported key type: {}", jwk.kty),
            });
        }
        Ok(jwk)
    }

    /// Serialize this JWK to JSON
    ///
    /// # Errors
    /// Returns [`GnapError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether private members are present
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.private.is_some()
    }

    /// The public half of this key (private members dropped)
    #[must_use]
    pub fn to_public(&self) -> Self {
        Self {
            kty: self.kty.clone(),
            kid: self.kid.clone(),
            alg: Some(SIGNING_ALGORITHM.to_string()),
            key_use: Some("sig".to_string()),
            n: self.n.clone(),
            e: self.e.clone(),
            private: None,
        }
    }

    /// RFC 7638 SHA-256 thumbprint of the public members
    #[must_use]
    pub fn thumbprint(&self) -> String {
        compute_thumbprint(&self.n, &self.e)
    }

    /// Verification key for `jsonwebtoken`
    ///
    /// # Errors
    /// Returns [`GnapError::KeyParse`] if the modulus or exponent is invalid.
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        DecodingKey::from_rsa_components(&self.n, &self.e).map_err(|e| GnapError::KeyParse {
            reason: format!("Invalid RSA key components: {e}"),
        })
    }

    /// Signing key for `jsonwebtoken`
    ///
    /// # Errors
    /// Returns [`GnapError::KeyParse`] if the JWK has no private members or
    /// they do not form a valid RSA key.
    pub fn encoding_key(&self) -> Result<EncodingKey> {
        let private = self.private.as_ref().ok_or_else(|| GnapError::KeyParse {
            reason: "JWK has no private key material".to_string(),
        })?;

        let key = RsaPrivateKey::from_components(
            decode_uint(&self.n, "n")?,
            decode_uint(&self.e, "e")?,
            decode_uint(&private.d, "d")?,
            vec![decode_uint(&private.p, "p")?, decode_uint(&private.q, "q")?],
        )
        .map_err(|e| GnapError::KeyParse {
            reason: format!("Invalid RSA private key: {e}"),
        })?;
        key.validate().map_err(|e| GnapError::KeyParse {
            reason: format!("RSA private key failed validation: {e}"),
        })?;

        let der = key.to_pkcs1_der().map_err(|e| GnapError::KeyParse {
            reason: format!("Failed to encode private key: {e}"),
        })?;
        Ok(EncodingKey::from_rsa_der(der.as_bytes()))
    }
}

/// Asymmetric key pair owned by one identity
///
/// Only `public` is ever transmitted or cached by a counterparty. Key pairs
/// loaded for verification only have no private half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// Thumbprint of the public key
    pub key_id: String,
    /// Public JWK, tagged with `alg` and `use`
    pub public: RsaJwk,
    /// Private JWK
    pub private: Option<RsaJwk>,
}

impl KeyPair {
    /// Assemble a key pair from stored JWKs
    ///
    /// The key identifier is recomputed from the public key; a stored `kid`
    /// that disagrees is rejected.
    ///
    /// # Errors
    /// Returns [`GnapError::KeyParse`] if the halves do not belong together.
    pub fn from_jwks(public: RsaJwk, private: Option<RsaJwk>) -> Result<Self> {
        let key_id = public.thumbprint();
        if let Some(kid) = &public.kid {
            if *kid != key_id {
                return Err(GnapError::KeyParse {
                    reason: format!("Public key id {kid} does not match its thumbprint"),
                });
            }
        }
        if let Some(private) = &private {
            if !private.is_private() {
                return Err(GnapError::KeyParse {
                    reason: "Private JWK has no private members".to_string(),
                });
            }
            if private.n != public.n || private.e != public.e {
                return Err(GnapError::KeyParse {
                    reason: "Private key does not match public key".to_string(),
                });
            }
        }
        Ok(Self {
            key_id,
            public,
            private,
        })
    }

    /// Signing key for the private half
    ///
    /// # Errors
    /// Returns [`GnapError::KeyParse`] if this key pair has no private half.
    pub fn encoding_key(&self) -> Result<EncodingKey> {
        self.private
            .as_ref()
            .ok_or_else(|| GnapError::KeyParse {
                reason: format!("No private key loaded for key {}", self.key_id),
            })?
            .encoding_key()
    }

    /// The same key pair without its private half
    #[must_use]
    pub fn public_only(&self) -> Self {
        Self {
            key_id: self.key_id.clone(),
            public: self.public.clone(),
            private: None,
        }
    }
}

/// Generate a fresh RSA-2048 key pair tagged for RS256
///
/// # Errors
/// Returns [`GnapError::KeyGeneration`] if the RNG or key construction fails.
pub fn generate_keypair() -> Result<KeyPair> {
    let private_key =
        RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(|e| GnapError::KeyGeneration {
            reason: format!("Failed to generate RSA key: {e}"),
        })?;

    let n = encode_uint(private_key.n());
    let e = encode_uint(private_key.e());
    let key_id = compute_thumbprint(&n, &e);

    let private = private_params(&private_key)?;

    let public = RsaJwk {
        kty: RSA_KEY_TYPE.to_string(),
        kid: Some(key_id.clone()),
        alg: Some(SIGNING_ALGORITHM.to_string()),
        key_use: Some("sig".to_string()),
        n: n.clone(),
        e: e.clone(),
        private: None,
    };
    let private = RsaJwk {
        kty: RSA_KEY_TYPE.to_string(),
        kid: Some(key_id.clone()),
        alg: None,
        key_use: None,
        n,
        e,
        private: Some(private),
    };

    tracing::debug!(key_id = %key_id, bits = RSA_KEY_BITS, "Generated RSA key pair");

    Ok(KeyPair {
        key_id,
        public,
        private: Some(private),
    })
}

/// Compute the RFC 7638 thumbprint of an RSA public key
#[must_use]
pub fn compute_thumbprint(n: &str, e: &str) -> String {
    // Required members only, lexicographic order, no whitespace
    let canonical = serde_json::json!({
        "e": e,
        "kty": RSA_KEY_TYPE,
        "n": n,
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn private_params(key: &RsaPrivateKey) -> Result<RsaPrivateParams> {
    let [p, q] = key.primes() else {
        return Err(GnapError::KeyGeneration {
            reason: format!("Expected two primes, got {}", key.primes().len()),
        });
    };
    let one = BigUint::from(1u32);
    let two = BigUint::from(2u32);
    let d = key.d();

    let dp = d % &(p - &one);
    let dq = d % &(q - &one);
    // q^-1 mod p by Fermat's little theorem (p is prime)
    let qi = q.modpow(&(p - &two), p);

    Ok(RsaPrivateParams {
        d: encode_uint(d),
        p: encode_uint(p),
        q: encode_uint(q),
        dp: encode_uint(&dp),
        dq: encode_uint(&dq),
        qi: encode_uint(&qi),
    })
}

fn encode_uint(value: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(value.to_bytes_be())
}

fn decode_uint(value: &str, member: &str) -> Result<BigUint> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| GnapError::KeyParse {
            reason: format!("Invalid base64url in JWK member '{member}': {e}"),
        })?;
    Ok(BigUint::from_bytes_be(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generated_keypair_shape() {
        let key_pair = generate_keypair().unwrap();

        assert_eq!(key_pair.public.kty, "RSA");
        assert_eq!(key_pair.public.alg.as_deref(), Some("RS256"));
        assert_eq!(key_pair.public.kid.as_deref(), Some(key_pair.key_id.as_str()));
        assert!(!key_pair.public.is_private());

        let private = key_pair.private.as_ref().unwrap();
        assert!(private.is_private());
        assert_eq!(private.kid, key_pair.public.kid);
        assert_eq!(key_pair.key_id, key_pair.public.thumbprint());

        assert!(key_pair.encoding_key().is_ok());
        assert!(key_pair.public.decoding_key().is_ok());
    }

    #[test]
    fn test_jwk_json_reload_is_identical() {
        let key_pair = generate_keypair().unwrap();
        let private = key_pair.private.as_ref().unwrap();

        let public_json = key_pair.public.to_json().unwrap();
        let private_json = private.to_json().unwrap();

        let reloaded = KeyPair::from_jwks(
            RsaJwk::from_json(&public_json).unwrap(),
            Some(RsaJwk::from_json(&private_json).unwrap()),
        )
        .unwrap();

        assert_eq!(reloaded, key_pair);
        assert_eq!(reloaded.public.to_json().unwrap(), public_json);
        assert!(reloaded.encoding_key().is_ok());
    }

    #[test]
    fn test_public_json_has_no_private_members() {
        let key_pair = generate_keypair().unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&key_pair.public.to_json().unwrap()).unwrap();

        for member in ["d", "p", "q", "dp", "dq", "qi"] {
            assert!(value.get(member).is_none(), "public JWK leaks '{member}'");
        }
        assert_eq!(value["use"], "sig");
    }

    #[test]
    fn test_thumbprint_rfc7638_vector() {
        // RFC 7638 section 3.1 example key
        let n = "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw";
        let e = "AQAB";

        assert_eq!(
            compute_thumbprint(n, e),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }

    #[test]
    fn test_mismatched_halves_rejected() {
        let a = generate_keypair().unwrap();
        let b = generate_keypair().unwrap();

        let err = KeyPair::from_jwks(a.public.clone(), b.private.clone()).unwrap_err();
        assert!(matches!(err, GnapError::KeyParse { .. }));
    }

    #[test]
    fn test_malformed_jwk_json() {
        assert!(matches!(
            RsaJwk::from_json("{not json"),
            Err(GnapError::KeyParse { .. })
        ));
        assert!(matches!(
            RsaJwk::from_json(r#"{"kty":"EC","n":"x","e":"y"}"#),
            Err(GnapError::KeyParse { .. })
        ));
    }

    #[test]
    fn test_public_only_cannot_sign() {
        let key_pair = generate_keypair().unwrap().public_only();
        assert!(matches!(
            key_pair.encoding_key(),
            Err(GnapError::KeyParse { .. })
        ));
    }
}
