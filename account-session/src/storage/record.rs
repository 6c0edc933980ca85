//! Token bundles and persisted session records.

use crate::error::SessionError;
use crate::http::TokenResponse;
use crate::jwt::IdentityTokenClaims;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current persisted envelope version.
pub const RECORD_VERSION: u32 = 1;

/// Tokens issued for one login.
///
/// Without a refresh token the bundle is still usable, but it can never be
/// refreshed silently.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    /// Bearer access token
    pub access_token: String,
    /// Refresh token, if the provider issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Raw compact identity token
    pub id_token: String,
    /// Validated claims of `id_token`
    pub id_token_claims: IdentityTokenClaims,
    /// Access token expiry in seconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl TokenBundle {
    /// Bundle from a login token response whose identity token has been validated.
    ///
    /// # Errors
    ///
    /// Returns `TokenMalformed` if the response carries no identity token.
    pub fn from_login(
        response: TokenResponse,
        claims: IdentityTokenClaims,
        now: i64,
    ) -> Result<Self, SessionError> {
        let id_token = response
            .id_token
            .ok_or_else(|| SessionError::malformed("Token response has no id_token"))?;

        Ok(Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            id_token,
            id_token_claims: claims,
            expires_at: response.expires_in.map(|secs| now.saturating_add(secs)),
        })
    }

    /// Bundle after a refresh.
    ///
    /// `claims` must be the validated claims of `response.id_token` when the
    /// response has one. Omitted refresh or identity tokens are carried over.
    ///
    /// The new access token expires after `expires_in`, else at the `exp` of
    /// a newly issued identity token, else `default_lifetime_secs` from `now`.
    /// A carried-over identity token never dates the new access token.
    #[must_use]
    pub fn refreshed(
        &self,
        response: TokenResponse,
        claims: Option<IdentityTokenClaims>,
        now: i64,
        default_lifetime_secs: i64,
    ) -> Self {
        let issued = match (response.id_token, claims) {
            (Some(token), Some(claims)) => Some((token, claims)),
            _ => None,
        };

        let expires_at = match (response.expires_in, &issued) {
            (Some(secs), _) => now.saturating_add(secs),
            (None, Some((_, claims))) => claims.exp,
            (None, None) => now.saturating_add(default_lifetime_secs),
        };

        let (id_token, id_token_claims) = issued
            .unwrap_or_else(|| (self.id_token.clone(), self.id_token_claims.clone()));

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or_else(|| self.refresh_token.clone()),
            id_token,
            id_token_claims,
            expires_at: Some(expires_at),
        }
    }

    /// Whether a refresh token is present.
    #[must_use]
    pub const fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Access token expiry, falling back to the identity token's `exp`.
    #[must_use]
    pub const fn effective_expiry(&self) -> i64 {
        match self.expires_at {
            Some(at) => at,
            None => self.id_token_claims.exp,
        }
    }

    /// Expired once `now` is within `margin_secs` of the expiry.
    #[must_use]
    pub const fn is_expired_at(&self, now: i64, margin_secs: i64) -> bool {
        self.effective_expiry().saturating_sub(margin_secs) <= now
    }
}

impl fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBundle")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.has_refresh_token())
            .field("sub", &self.id_token_claims.sub)
            .field("expires_at", &self.effective_expiry())
            .finish_non_exhaustive()
    }
}

/// One stored session per account key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Stable key of the client configuration that owns the session
    pub account_key: String,
    /// Current tokens
    pub tokens: TokenBundle,
    /// Bumped on login and on every refresh
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// New record stamped now.
    #[must_use]
    pub fn new(account_key: impl Into<String>, tokens: TokenBundle) -> Self {
        Self::at(account_key, tokens, Utc::now())
    }

    /// New record with an explicit timestamp.
    #[must_use]
    pub fn at(account_key: impl Into<String>, tokens: TokenBundle, updated_at: DateTime<Utc>) -> Self {
        Self {
            account_key: account_key.into(),
            tokens,
            updated_at,
        }
    }

    /// Same account with new tokens, stamped now.
    #[must_use]
    pub fn with_tokens(&self, tokens: TokenBundle) -> Self {
        Self::new(self.account_key.clone(), tokens)
    }

    /// Encode into the versioned persisted form.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SessionError> {
        serde_json::to_vec(&EnvelopeRef {
            version: RECORD_VERSION,
            record: self,
        })
        .map_err(|e| SessionError::storage_write(format!("Failed to encode session: {e}")))
    }

    /// Decode from the versioned persisted form.
    ///
    /// # Errors
    ///
    /// Returns `DeserializationFailed` for unknown versions or invalid data.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        let probe: VersionProbe = serde_json::from_slice(bytes)
            .map_err(|e| SessionError::deserialization(format!("Invalid envelope: {e}")))?;
        if probe.version != RECORD_VERSION {
            return Err(SessionError::deserialization(format!(
                "Unsupported session version {}",
                probe.version
            )));
        }

        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| SessionError::deserialization(format!("Invalid session: {e}")))?;
        Ok(envelope.record)
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    record: &'a SessionRecord,
}

#[derive(Deserialize)]
struct Envelope {
    record: SessionRecord,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}
