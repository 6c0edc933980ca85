//! Shared proptest generators.

use crate::fixtures::{CLIENT_ID, ISSUER};
use account_session::IdentityTokenClaims;
use chrono::{DateTime, Utc};
use proptest::prelude::*;

/// Generate subject identifiers.
pub fn subject_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{8,24}"
}

/// Generate audiences that contain [`CLIENT_ID`] somewhere.
pub fn audience_strategy() -> impl Strategy<Value = Vec<String>> {
    (prop::collection::vec("[a-z]{3,10}", 0..3), any::<prop::sample::Index>()).prop_map(
        |(mut others, index)| {
            let at = index.index(others.len() + 1);
            others.insert(at, CLIENT_ID.to_string());
            others
        },
    )
}

/// Generate nonces.
pub fn nonce_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_-]{16,43}"
}

/// Generate authentication method references.
pub fn amr_strategy() -> impl Strategy<Value = Option<Vec<String>>> {
    prop::option::of(prop::collection::vec(
        prop_oneof![
            Just("pwd".to_string()),
            Just("otp".to_string()),
            Just("mfa".to_string()),
            Just("hwk".to_string()),
        ],
        1..3,
    ))
}

/// Generate claims for [`ISSUER`] that expire between `min_exp` and
/// `min_exp + 10 years`.
pub fn claims_strategy(min_exp: i64) -> impl Strategy<Value = IdentityTokenClaims> {
    (
        subject_strategy(),
        prop::option::of("[0-9]{1,9}"),
        audience_strategy(),
        min_exp..min_exp + 315_360_000,
        prop::option::of(nonce_strategy()),
        amr_strategy(),
    )
        .prop_map(|(sub, legacy, aud, exp, nonce, amr)| {
            let mut claims = IdentityTokenClaims::new(ISSUER.to_string(), sub, aud, exp);
            if let Some(legacy) = legacy {
                claims = claims.with_legacy_user_id(legacy);
            }
            claims.nonce = nonce;
            claims.amr = amr;
            claims
        })
}

/// Generate update timestamps within a year of 2025-01-01.
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (1_735_689_600_i64..1_767_225_600).prop_map(|secs| {
        DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    })
}
