//! JSON Web Key Set model and conversion into verification keys.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// JSON Web Key structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (RSA, EC, oct)
    pub kty: String,
    /// Key ID
    pub kid: String,
    /// Key use (sig, enc)
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// Algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// RSA modulus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC x coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// EC curve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// Symmetric key value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

/// JSON Web Key Set structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// List of keys
    pub keys: Vec<Jwk>,
}

/// A key usable for signature verification, tied to its key id.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    algorithms: Vec<Algorithm>,
    key: DecodingKey,
}

impl VerificationKey {
    /// Build a key from parts.
    #[must_use]
    pub fn new(kid: impl Into<String>, algorithms: Vec<Algorithm>, key: DecodingKey) -> Self {
        Self {
            kid: kid.into(),
            algorithms,
            key,
        }
    }

    /// Convert a JWK. Returns `None` for unsupported or weak keys.
    #[must_use]
    pub fn from_jwk(jwk: &Jwk) -> Option<Self> {
        if jwk.key_use.as_deref().is_some_and(|u| u != "sig") {
            return None;
        }

        let (family, key) = match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk.n.as_ref()?;
                let e = jwk.e.as_ref()?;

                // 2048-bit modulus is 342 base64url chars
                if n.len() < 340 {
                    warn!(kid = %jwk.kid, "RSA key too small, rejecting");
                    return None;
                }

                let algorithms = vec![
                    Algorithm::RS256,
                    Algorithm::RS384,
                    Algorithm::RS512,
                    Algorithm::PS256,
                    Algorithm::PS384,
                    Algorithm::PS512,
                ];
                (algorithms, DecodingKey::from_rsa_components(n, e).ok()?)
            }
            "EC" => {
                let x = jwk.x.as_ref()?;
                let y = jwk.y.as_ref()?;
                let algorithm = match jwk.crv.as_deref().unwrap_or("P-256") {
                    "P-256" => Algorithm::ES256,
                    "P-384" => Algorithm::ES384,
                    crv => {
                        warn!(kid = %jwk.kid, crv = %crv, "Unsupported EC curve, rejecting");
                        return None;
                    }
                };
                (vec![algorithm], DecodingKey::from_ec_components(x, y).ok()?)
            }
            "oct" => {
                let secret = URL_SAFE_NO_PAD.decode(jwk.k.as_ref()?).ok()?;
                if secret.len() < 32 {
                    warn!(kid = %jwk.kid, "Symmetric key too short, rejecting");
                    return None;
                }
                let algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
                (algorithms, DecodingKey::from_secret(&secret))
            }
            _ => {
                warn!(kty = %jwk.kty, kid = %jwk.kid, "Unsupported key type");
                return None;
            }
        };

        // A published alg pins the key to exactly that algorithm
        let algorithms = match jwk.alg.as_deref().map(Algorithm::from_str) {
            Some(Ok(alg)) if family.contains(&alg) => vec![alg],
            Some(_) => {
                warn!(kid = %jwk.kid, alg = ?jwk.alg, "Key algorithm does not match key type");
                return None;
            }
            None => family,
        };

        Some(Self::new(jwk.kid.clone(), algorithms, key))
    }

    /// Key identifier.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithms this key may verify.
    #[must_use]
    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    /// Whether the key may verify tokens signed with `alg`.
    #[must_use]
    pub fn allows(&self, alg: Algorithm) -> bool {
        self.algorithms.contains(&alg)
    }

    /// Key material.
    #[must_use]
    pub const fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

/// Verification keys indexed by key id.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, VerificationKey>,
}

impl KeySet {
    /// Empty key set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JWKS document, skipping keys that cannot be used.
    #[must_use]
    pub fn from_jwks(jwks: &Jwks) -> Self {
        jwks.keys
            .iter()
            .filter_map(VerificationKey::from_jwk)
            .collect()
    }

    /// Add or replace a key.
    pub fn insert(&mut self, key: VerificationKey) {
        self.keys.insert(key.kid.clone(), key);
    }

    /// Look up a key by id.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.get(kid)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<VerificationKey> for KeySet {
    fn from_iter<I: IntoIterator<Item = VerificationKey>>(iter: I) -> Self {
        let mut set = Self::new();
        for key in iter {
            set.insert(key);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oct_jwk(kid: &str, secret: &[u8]) -> Jwk {
        Jwk {
            kty: "oct".to_string(),
            kid: kid.to_string(),
            key_use: Some("sig".to_string()),
            alg: None,
            n: None,
            e: None,
            x: None,
            y: None,
            crv: None,
            k: Some(URL_SAFE_NO_PAD.encode(secret)),
        }
    }

    #[test]
    fn test_oct_key_conversion() {
        let key = VerificationKey::from_jwk(&oct_jwk("k1", &[7u8; 32])).unwrap();
        assert_eq!(key.kid(), "k1");
        assert!(key.allows(Algorithm::HS256));
        assert!(!key.allows(Algorithm::RS256));
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(VerificationKey::from_jwk(&oct_jwk("k1", &[7u8; 16])).is_none());
    }

    #[test]
    fn test_alg_pins_key() {
        let mut jwk = oct_jwk("k1", &[7u8; 32]);
        jwk.alg = Some("HS384".to_string());
        let key = VerificationKey::from_jwk(&jwk).unwrap();
        assert_eq!(key.algorithms(), &[Algorithm::HS384]);

        jwk.alg = Some("RS256".to_string());
        assert!(VerificationKey::from_jwk(&jwk).is_none());
    }

    #[test]
    fn test_encryption_keys_skipped() {
        let mut jwk = oct_jwk("enc-1", &[7u8; 32]);
        jwk.key_use = Some("enc".to_string());
        assert!(VerificationKey::from_jwk(&jwk).is_none());
    }

    #[test]
    fn test_small_rsa_key_rejected() {
        let jwk = Jwk {
            kty: "RSA".to_string(),
            kid: "rsa-1".to_string(),
            key_use: None,
            alg: None,
            n: Some("c2hvcnQ".to_string()),
            e: Some("AQAB".to_string()),
            x: None,
            y: None,
            crv: None,
            k: None,
        };
        assert!(VerificationKey::from_jwk(&jwk).is_none());
    }

    #[test]
    fn test_key_set_from_jwks_skips_unusable() {
        let mut unsupported = oct_jwk("weird", &[1u8; 32]);
        unsupported.kty = "OKP".to_string();
        let jwks = Jwks {
            keys: vec![oct_jwk("a", &[1u8; 32]), oct_jwk("b", &[2u8; 32]), unsupported],
        };

        let set = KeySet::from_jwks(&jwks);
        assert_eq!(set.len(), 2);
        assert!(set.get("a").is_some());
        assert!(set.get("weird").is_none());
    }

    #[test]
    fn test_jwks_parses_provider_document() {
        let doc = r#"{"keys":[{"kty":"oct","kid":"k1","use":"sig","k":"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"}]}"#;
        let jwks: Jwks = serde_json::from_str(doc).unwrap();
        assert_eq!(jwks.keys[0].key_use.as_deref(), Some("sig"));
        assert_eq!(KeySet::from_jwks(&jwks).len(), 1);
    }
}
