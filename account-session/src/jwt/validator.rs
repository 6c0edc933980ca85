//! Identity token validator bound to one issuer and client.

use crate::error::SessionError;
use crate::jwks::KeySetResolver;
use crate::jwt::claims::IdentityTokenClaims;
use crate::jwt::token::{ClaimExpectations, Token, Unvalidated, Validated};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Validates compact identity tokens against a key set.
///
/// Signature verification always happens before any claim is read.
#[derive(Clone)]
pub struct IdTokenValidator {
    resolver: Arc<dyn KeySetResolver>,
    issuer: String,
    audience: String,
}

impl IdTokenValidator {
    /// Creates a validator expecting `issuer` and an audience containing `audience`.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn KeySetResolver>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    /// Expected issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Validates a token and returns the type-state wrapper.
    ///
    /// # Errors
    ///
    /// Returns the distinct validation failure for the first failing step.
    pub async fn validate_token(
        &self,
        raw_token: &str,
        expected_nonce: Option<&str>,
        now: i64,
    ) -> Result<Token<Validated>, SessionError> {
        let unvalidated = Token::<Unvalidated>::parse(raw_token)?;
        let signature_validated = unvalidated.validate_signature(self.resolver.as_ref()).await?;

        signature_validated.validate_claims(
            ClaimExpectations {
                issuer: &self.issuer,
                audience: &self.audience,
                nonce: expected_nonce,
            },
            now,
        )
    }

    /// Validates a token at the current time and returns its claims.
    ///
    /// # Errors
    ///
    /// `UnknownSigningKey`, `InvalidSignature`, `IssuerMismatch`,
    /// `AudienceMismatch`, `TokenExpired`, `NonceMismatch`, `TokenMalformed`
    /// or `KeySetUnavailable`.
    #[instrument(skip_all, fields(issuer = %self.issuer))]
    pub async fn validate(
        &self,
        raw_token: &str,
        expected_nonce: Option<&str>,
    ) -> Result<IdentityTokenClaims, SessionError> {
        self.validate_at(raw_token, expected_nonce, Utc::now().timestamp())
            .await
    }

    /// Same as [`Self::validate`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Self::validate`].
    pub async fn validate_at(
        &self,
        raw_token: &str,
        expected_nonce: Option<&str>,
        now: i64,
    ) -> Result<IdentityTokenClaims, SessionError> {
        match self.validate_token(raw_token, expected_nonce, now).await {
            Ok(token) => {
                debug!(sub = %token.subject(), "Identity token validated");
                Ok(token.into_claims())
            }
            Err(e) => {
                warn!(code = e.code(), "Identity token rejected");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwks::{KeySet, VerificationKey};
    use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, encode};

    const ISSUER: &str = "https://login.example.com";

    fn validator() -> IdTokenValidator {
        let keys: KeySet = [
            VerificationKey::new("a", vec![Algorithm::HS256], DecodingKey::from_secret(&[1u8; 32])),
            VerificationKey::new("b", vec![Algorithm::HS256], DecodingKey::from_secret(&[2u8; 32])),
        ]
        .into_iter()
        .collect();
        IdTokenValidator::new(Arc::new(keys), ISSUER, "client-1")
    }

    fn sign(kid: &str, secret: &[u8], claims: &IdentityTokenClaims) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid.to_string());
        encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn claims() -> IdentityTokenClaims {
        IdentityTokenClaims::new(
            ISSUER.to_string(),
            "user-1".to_string(),
            vec!["client-1".to_string()],
            2_000,
        )
    }

    #[tokio::test]
    async fn test_valid_token() {
        let expected = claims();
        let raw = sign("a", &[1u8; 32], &expected);
        let decoded = validator().validate_at(&raw, None, 1_000).await.unwrap();
        assert_eq!(decoded, expected);
    }

    #[tokio::test]
    async fn test_unknown_kid() {
        let raw = sign("c", &[1u8; 32], &claims());
        assert_eq!(
            validator().validate_at(&raw, None, 1_000).await.unwrap_err(),
            SessionError::UnknownSigningKey {
                kid: "c".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_kid_pointing_at_other_key() {
        // Signed with key "a" but claims to be "b"
        let raw = sign("b", &[1u8; 32], &claims());
        assert_eq!(
            validator().validate_at(&raw, None, 1_000).await.unwrap_err(),
            SessionError::InvalidSignature
        );
    }

    #[tokio::test]
    async fn test_signature_checked_before_expiry() {
        let raw = sign("b", &[1u8; 32], &claims());
        assert_eq!(
            validator().validate_at(&raw, None, 5_000).await.unwrap_err(),
            SessionError::InvalidSignature
        );
    }
}
