//! Test fixtures with sample data.
//!
//! This module provides signing keys, claims, token bundles and session
//! records for use in tests.

use account_session::jwks::{Jwk, Jwks};
use account_session::{
    ClientConfiguration, IdentityTokenClaims, KeySet, SessionRecord, TokenBundle, VerificationKey,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, encode};
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair};
use std::path::Path;

/// Issuer used across fixtures.
pub const ISSUER: &str = "https://login.example.com";
/// Client id used across fixtures.
pub const CLIENT_ID: &str = "client-1";
/// Token endpoint derived from [`ISSUER`].
pub const TOKEN_URL: &str = "https://login.example.com/oauth/token";
/// JWKS endpoint derived from [`ISSUER`].
pub const JWKS_URL: &str = "https://login.example.com/.well-known/jwks.json";
/// Userinfo endpoint derived from [`ISSUER`].
pub const USERINFO_URL: &str = "https://login.example.com/oauth/userinfo";

/// Install the test-capture subscriber once per test binary.
pub fn init_test_tracing() {
    let _ = account_common::init_tracing(&account_common::TracingConfig::for_tests());
}

/// Account key of [`test_config`].
#[must_use]
pub fn account_key() -> String {
    format!("{CLIENT_ID}@{ISSUER}")
}

/// Seconds since the epoch.
#[must_use]
pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Key pair able to sign identity tokens and publish its public half.
#[derive(Clone)]
pub struct TestSigner {
    kid: String,
    algorithm: Algorithm,
    encoding: EncodingKey,
    jwk: Jwk,
}

impl TestSigner {
    /// HS256 signer over a 32-byte secret derived from `seed`.
    #[must_use]
    pub fn hmac(kid: &str, seed: u8) -> Self {
        let secret = [seed; 32];
        Self {
            kid: kid.to_string(),
            algorithm: Algorithm::HS256,
            encoding: EncodingKey::from_secret(&secret),
            jwk: Jwk {
                kty: "oct".to_string(),
                kid: kid.to_string(),
                key_use: Some("sig".to_string()),
                alg: Some("HS256".to_string()),
                n: None,
                e: None,
                x: None,
                y: None,
                crv: None,
                k: Some(URL_SAFE_NO_PAD.encode(secret)),
            },
        }
    }

    /// Freshly generated ES256 signer.
    ///
    /// # Panics
    ///
    /// Panics if key generation fails.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn ecdsa(kid: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .expect("generate P-256 key");
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
            .expect("parse P-256 key");

        // Uncompressed point: 0x04 || x || y
        let public = pair.public_key().as_ref();
        let (x, y) = public[1..].split_at(32);

        Self {
            kid: kid.to_string(),
            algorithm: Algorithm::ES256,
            encoding: EncodingKey::from_ec_der(pkcs8.as_ref()),
            jwk: Jwk {
                kty: "EC".to_string(),
                kid: kid.to_string(),
                key_use: Some("sig".to_string()),
                alg: Some("ES256".to_string()),
                n: None,
                e: None,
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
                crv: Some("P-256".to_string()),
                k: None,
            },
        }
    }

    /// Key id.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public JWK.
    #[must_use]
    pub fn jwk(&self) -> Jwk {
        self.jwk.clone()
    }

    /// Verification key for the public half.
    ///
    /// # Panics
    ///
    /// Panics if the JWK cannot be converted.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn verification_key(&self) -> VerificationKey {
        VerificationKey::from_jwk(&self.jwk).expect("fixture JWK is valid")
    }

    /// Sign claims with this key, using its own kid.
    #[must_use]
    pub fn sign(&self, claims: &IdentityTokenClaims) -> String {
        self.sign_as(&self.kid, claims)
    }

    /// Sign claims with this key but put `kid` in the header.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn sign_as(&self, kid: &str, claims: &IdentityTokenClaims) -> String {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(kid.to_string());
        encode(&header, claims, &self.encoding).expect("sign fixture token")
    }

    /// Sign an arbitrary JSON payload, for wire shapes the claims type
    /// never emits itself.
    ///
    /// # Panics
    ///
    /// Panics if signing fails.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn sign_json(&self, payload: &serde_json::Value) -> String {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.kid.clone());
        encode(&header, payload, &self.encoding).expect("sign fixture payload")
    }
}

/// JWKS document publishing every signer.
#[must_use]
pub fn jwks_of(signers: &[&TestSigner]) -> Jwks {
    Jwks {
        keys: signers.iter().map(|s| s.jwk()).collect(),
    }
}

/// Pinned key set of every signer.
#[must_use]
pub fn key_set_of(signers: &[&TestSigner]) -> KeySet {
    signers.iter().map(|s| s.verification_key()).collect()
}

/// HS256 verification key that does not match any signer.
#[must_use]
pub fn unrelated_key(kid: &str) -> VerificationKey {
    VerificationKey::new(kid, vec![Algorithm::HS256], DecodingKey::from_secret(&[0xEE; 32]))
}

/// Claims for [`ISSUER`] and [`CLIENT_ID`] expiring at `exp`.
#[must_use]
pub fn claims(sub: &str, exp: i64) -> IdentityTokenClaims {
    IdentityTokenClaims::new(
        ISSUER.to_string(),
        sub.to_string(),
        vec![CLIENT_ID.to_string()],
        exp,
    )
}

/// Token bundle signed by `signer`, access token expiring at `expires_at`.
#[must_use]
pub fn bundle(
    signer: &TestSigner,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: i64,
) -> TokenBundle {
    let id_claims = claims("user-1", expires_at.max(now() + 3_600));
    TokenBundle {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.map(str::to_string),
        id_token: signer.sign(&id_claims),
        id_token_claims: id_claims,
        expires_at: Some(expires_at),
    }
}

/// Session record for `account_key` updated at `updated_at`.
#[must_use]
pub fn session_record(
    account_key: &str,
    tokens: TokenBundle,
    updated_at: DateTime<Utc>,
) -> SessionRecord {
    SessionRecord::at(account_key, tokens, updated_at)
}

/// Token endpoint JSON response.
#[must_use]
pub fn token_response_json(
    access_token: &str,
    refresh_token: Option<&str>,
    id_token: Option<&str>,
    expires_in: i64,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
    });
    if let Some(rt) = refresh_token {
        body["refresh_token"] = serde_json::json!(rt);
    }
    if let Some(id) = id_token {
        body["id_token"] = serde_json::json!(id);
    }
    body
}

/// Configuration for [`ISSUER`]/[`CLIENT_ID`] storing under `storage_dir`,
/// without retries.
///
/// # Panics
///
/// Panics if the fixture configuration is invalid.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_config(storage_dir: &Path) -> ClientConfiguration {
    ClientConfiguration::builder(ISSUER, CLIENT_ID)
        .with_encryption_key([42u8; 32])
        .with_storage_dir(storage_dir)
        .with_retry(account_common::RetryConfig::none())
        .build()
        .expect("fixture configuration is valid")
}
