//! Identity token claims.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Decoded payload of an OIDC identity token.
///
/// Decoding is tolerant where identity providers differ: `aud` may be a
/// single string or an array, and the legacy user id may arrive as
/// `legacy_user_id` or `user_id`. Encoding always emits the canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "WireClaims")]
pub struct IdentityTokenClaims {
    /// Issuer
    pub iss: String,
    /// Subject
    pub sub: String,
    /// Legacy numeric user id used by older backends.
    pub legacy_user_id: String,
    /// Audience, always a sequence in memory
    pub aud: Vec<String>,
    /// Expiry, seconds since the epoch
    pub exp: i64,
    /// Issued at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Nonce echoed from the authorization request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Authentication methods references
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amr: Option<Vec<String>>,
    /// Claims not modelled above
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Claims as they appear on the wire, before normalization.
#[derive(Deserialize)]
struct WireClaims {
    iss: String,
    sub: String,
    #[serde(default)]
    legacy_user_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(deserialize_with = "one_or_many")]
    aud: Vec<String>,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    amr: Option<Vec<String>>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

impl From<WireClaims> for IdentityTokenClaims {
    fn from(wire: WireClaims) -> Self {
        // legacy_user_id wins over user_id; subject is the last resort
        let legacy_user_id = wire
            .legacy_user_id
            .or(wire.user_id)
            .unwrap_or_else(|| wire.sub.clone());

        Self {
            iss: wire.iss,
            sub: wire.sub,
            legacy_user_id,
            aud: wire.aud,
            exp: wire.exp,
            iat: wire.iat,
            nonce: wire.nonce,
            amr: wire.amr,
            extra: wire.extra,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(aud) => vec![aud],
        OneOrMany::Many(aud) => aud,
    })
}

impl IdentityTokenClaims {
    /// Claims with the legacy user id defaulting to the subject.
    #[must_use]
    pub fn new(issuer: String, subject: String, audience: Vec<String>, exp: i64) -> Self {
        Self {
            iss: issuer,
            legacy_user_id: subject.clone(),
            sub: subject,
            aud: audience,
            exp,
            iat: Some(Utc::now().timestamp()),
            nonce: None,
            amr: None,
            extra: HashMap::new(),
        }
    }

    /// Sets the nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    #[must_use]
    pub fn with_legacy_user_id(mut self, legacy_user_id: impl Into<String>) -> Self {
        self.legacy_user_id = legacy_user_id.into();
        self
    }

    /// Adds authentication method references (amr)
    #[must_use]
    pub fn with_amr(mut self, methods: Vec<String>) -> Self {
        self.amr = Some(methods);
        self
    }

    /// Whether `audience` is one of the token's audiences.
    #[must_use]
    pub fn has_audience(&self, audience: &str) -> bool {
        self.aud.iter().any(|a| a == audience)
    }

    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Expired unless `exp` is strictly after `now`.
    #[must_use]
    pub const fn is_expired_at(&self, now: i64) -> bool {
        self.exp <= now
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }
}
