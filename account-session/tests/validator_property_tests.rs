//! Property-based tests for identity token validation.

use account_session::{IdTokenValidator, IdentityTokenClaims, SessionError};
use proptest::prelude::*;
use std::sync::Arc;
use test_utils::generators::{audience_strategy, claims_strategy, nonce_strategy};
use test_utils::{CLIENT_ID, ISSUER, TestSigner, key_set_of};

const NOW: i64 = 1_760_000_000;

fn validator(signer: &TestSigner) -> IdTokenValidator {
    IdTokenValidator::new(Arc::new(key_set_of(&[signer])), ISSUER, CLIENT_ID)
}

fn validate(
    signer: &TestSigner,
    raw: &str,
    nonce: Option<&str>,
) -> Result<IdentityTokenClaims, SessionError> {
    tokio_test::block_on(validator(signer).validate_at(raw, nonce, NOW))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Well-formed tokens from a known key validate to the signed claims.
    #[test]
    fn prop_valid_tokens_yield_their_claims(claims in claims_strategy(NOW + 1)) {
        let signer = TestSigner::hmac("k1", 7);
        let raw = signer.sign(&claims);

        let validated = validate(&signer, &raw, claims.nonce.as_deref());

        prop_assert_eq!(validated, Ok(claims));
    }

    /// Any other issuer is rejected.
    #[test]
    fn prop_foreign_issuer_rejected(
        claims in claims_strategy(NOW + 1),
        host in "[a-z]{3,12}",
    ) {
        let signer = TestSigner::hmac("k1", 7);
        let mut claims = claims;
        claims.iss = format!("https://{host}.evil.test");
        let raw = signer.sign(&claims);

        let result = validate(&signer, &raw, claims.nonce.as_deref());

        let is_issuer_mismatch = matches!(result, Err(SessionError::IssuerMismatch { .. }));
        prop_assert!(is_issuer_mismatch);
    }

    /// Audiences that omit the client id are rejected.
    #[test]
    fn prop_missing_audience_rejected(
        claims in claims_strategy(NOW + 1),
        aud in audience_strategy(),
    ) {
        let signer = TestSigner::hmac("k1", 7);
        let mut claims = claims;
        claims.aud = aud.into_iter().filter(|a| a != CLIENT_ID).collect();
        let raw = signer.sign(&claims);

        let result = validate(&signer, &raw, claims.nonce.as_deref());

        let is_audience_mismatch = matches!(result, Err(SessionError::AudienceMismatch { .. }));
        prop_assert!(is_audience_mismatch);
    }

    /// Expiry at or before now is rejected.
    #[test]
    fn prop_expired_rejected(
        claims in claims_strategy(NOW + 1),
        age in 0i64..10_000_000,
    ) {
        let signer = TestSigner::hmac("k1", 7);
        let mut claims = claims;
        claims.exp = NOW - age;
        let raw = signer.sign(&claims);

        let result = validate(&signer, &raw, claims.nonce.as_deref());

        let is_expired = matches!(result, Err(SessionError::TokenExpired { .. }));
        prop_assert!(is_expired);
    }

    /// A nonce that differs from the one sent is rejected, as is a missing one.
    #[test]
    fn prop_nonce_must_match(
        claims in claims_strategy(NOW + 1),
        expected in nonce_strategy(),
    ) {
        prop_assume!(claims.nonce.as_deref() != Some(expected.as_str()));
        let signer = TestSigner::hmac("k1", 7);
        let raw = signer.sign(&claims);

        let result = validate(&signer, &raw, Some(&expected));

        prop_assert_eq!(result, Err(SessionError::NonceMismatch));
    }

    /// A token signed by a different secret under a known kid fails the signature check.
    #[test]
    fn prop_wrong_key_is_invalid_signature(
        claims in claims_strategy(NOW + 1),
        seed in any::<u8>(),
    ) {
        prop_assume!(seed != 7);
        let signer = TestSigner::hmac("k1", 7);
        let forger = TestSigner::hmac("k1", seed);
        let raw = forger.sign(&claims);

        let result = validate(&signer, &raw, claims.nonce.as_deref());

        prop_assert_eq!(result, Err(SessionError::InvalidSignature));
    }

    /// The signing key is checked before any claim, so an expired token
    /// from an unknown key reports the key.
    #[test]
    fn prop_signature_checked_before_claims(
        claims in claims_strategy(NOW + 1),
        kid in "[a-z]{4,8}",
    ) {
        prop_assume!(kid != "k1");
        let signer = TestSigner::hmac("k1", 7);
        let mut claims = claims;
        claims.exp = NOW - 10;
        claims.iss = "https://elsewhere.test".to_string();
        let raw = signer.sign_as(&kid, &claims);

        let result = validate(&signer, &raw, None);

        prop_assert_eq!(result, Err(SessionError::UnknownSigningKey { kid }));
    }

    /// Arbitrary strings never validate and never panic.
    #[test]
    fn prop_garbage_is_malformed(raw in "[A-Za-z0-9._-]{0,200}") {
        let signer = TestSigner::hmac("k1", 7);

        let result = validate(&signer, &raw, None);

        prop_assert!(result.is_err());
    }
}

#[tokio::test]
async fn test_ecdsa_tokens_validate() {
    let signer = TestSigner::ecdsa("ec-1");
    let claims = test_utils::claims("user-1", NOW + 600).with_nonce("abc");
    let raw = signer.sign(&claims);

    let validated = validator(&signer)
        .validate_at(&raw, Some("abc"), NOW)
        .await
        .unwrap();

    assert_eq!(validated, claims);
}

#[tokio::test]
async fn test_hmac_key_cannot_verify_ecdsa_token() {
    let ec = TestSigner::ecdsa("shared-kid");
    let hmac = TestSigner::hmac("shared-kid", 7);
    let raw = ec.sign(&test_utils::claims("user-1", NOW + 600));

    let result = validator(&hmac).validate_at(&raw, None, NOW).await;

    assert_eq!(result, Err(SessionError::InvalidSignature));
}
