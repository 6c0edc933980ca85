//! Type-state identity token.
//!
//! Claims become reachable only once the signature has been verified, and
//! only `Token<Validated>` exposes them without restriction. The compiler
//! therefore rejects any code path that reads claims of an unverified token.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header};
use subtle::ConstantTimeEq;

use crate::error::SessionError;
use crate::jwks::{KeySetResolver, VerificationKey};
use crate::jwt::claims::IdentityTokenClaims;

mod private {
    pub trait Sealed {}
}

/// Marker trait for token validation states.
pub trait TokenState: private::Sealed {
    /// Human-readable state name for debugging
    fn state_name() -> &'static str;
}

/// Just parsed, nothing verified.
#[derive(Debug)]
pub struct Unvalidated;
impl private::Sealed for Unvalidated {}
impl TokenState for Unvalidated {
    fn state_name() -> &'static str {
        "Unvalidated"
    }
}

/// Signature verified, claims not yet checked.
#[derive(Debug)]
pub struct SignatureValidated {
    claims: IdentityTokenClaims,
}
impl private::Sealed for SignatureValidated {}
impl TokenState for SignatureValidated {
    fn state_name() -> &'static str {
        "SignatureValidated"
    }
}

/// Signature and claims verified.
#[derive(Debug)]
pub struct Validated {
    claims: IdentityTokenClaims,
}
impl private::Sealed for Validated {}
impl TokenState for Validated {
    fn state_name() -> &'static str {
        "Validated"
    }
}

/// What the claims of a verified token must satisfy.
#[derive(Debug, Clone, Copy)]
pub struct ClaimExpectations<'a> {
    /// Expected `iss`
    pub issuer: &'a str,
    /// Value that `aud` must contain
    pub audience: &'a str,
    /// Expected `nonce`, checked only when set
    pub nonce: Option<&'a str>,
}

/// Compact-serialized identity token in a given validation state.
#[derive(Debug)]
pub struct Token<State: TokenState> {
    raw: String,
    header: Header,
    state: State,
}

impl Token<Unvalidated> {
    /// Parse the header of a compact token. The payload is not decoded.
    ///
    /// # Errors
    ///
    /// Returns `TokenMalformed` if the header cannot be decoded.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let header = decode_header(raw)
            .map_err(|e| SessionError::malformed(format!("Invalid header: {e}")))?;

        Ok(Self {
            raw: raw.to_string(),
            header,
            state: Unvalidated,
        })
    }

    /// Key id from the header.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// Signing algorithm from the header.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.header.alg
    }

    /// Resolve the signing key by `kid` and verify the signature.
    ///
    /// # Errors
    ///
    /// - `TokenMalformed` if the header has no `kid` or the payload is not
    ///   an identity token
    /// - `UnknownSigningKey` if the resolver has no key for the `kid`
    /// - `InvalidSignature` if verification fails
    /// - `KeySetUnavailable` if the key set cannot be fetched
    pub async fn validate_signature(
        self,
        resolver: &dyn KeySetResolver,
    ) -> Result<Token<SignatureValidated>, SessionError> {
        let kid = self
            .kid()
            .ok_or_else(|| SessionError::malformed("Missing kid in header"))?
            .to_string();

        let key = resolver
            .get_key(&kid)
            .await?
            .ok_or(SessionError::UnknownSigningKey { kid })?;

        self.validate_signature_with_key(&key)
    }

    /// Verify the signature with an already resolved key.
    ///
    /// # Errors
    ///
    /// Same as [`Self::validate_signature`] minus key resolution.
    pub fn validate_signature_with_key(
        self,
        key: &VerificationKey,
    ) -> Result<Token<SignatureValidated>, SessionError> {
        if !key.allows(self.header.alg) {
            return Err(SessionError::InvalidSignature);
        }

        // Signature only; claims are checked by the next state
        let mut validation = Validation::new(self.header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<IdentityTokenClaims>(&self.raw, key.decoding_key(), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    SessionError::InvalidSignature
                }
                _ => SessionError::malformed(format!("Signature validation failed: {e}")),
            })?;

        Ok(Token {
            raw: self.raw,
            header: self.header,
            state: SignatureValidated {
                claims: data.claims,
            },
        })
    }
}

impl Token<SignatureValidated> {
    /// Check issuer, audience, expiry and nonce, in that order.
    ///
    /// `now` is seconds since the epoch. Expiry must be strictly after it.
    ///
    /// # Errors
    ///
    /// Returns the first failing check as `IssuerMismatch`,
    /// `AudienceMismatch`, `TokenExpired` or `NonceMismatch`.
    pub fn validate_claims(
        self,
        expected: ClaimExpectations<'_>,
        now: i64,
    ) -> Result<Token<Validated>, SessionError> {
        let claims = self.state.claims;

        if claims.iss != expected.issuer {
            return Err(SessionError::IssuerMismatch {
                expected: expected.issuer.to_string(),
                actual: claims.iss,
            });
        }

        if !claims.has_audience(expected.audience) {
            return Err(SessionError::AudienceMismatch {
                expected: expected.audience.to_string(),
                actual: claims.aud,
            });
        }

        if claims.is_expired_at(now) {
            return Err(SessionError::TokenExpired {
                expired_at: claims.expires_at(),
            });
        }

        if let Some(expected_nonce) = expected.nonce {
            let matches = claims
                .nonce
                .as_deref()
                .is_some_and(|n| bool::from(n.as_bytes().ct_eq(expected_nonce.as_bytes())));
            if !matches {
                return Err(SessionError::NonceMismatch);
            }
        }

        Ok(Token {
            raw: self.raw,
            header: self.header,
            state: Validated { claims },
        })
    }

    /// Claims of a token whose signature verified but whose claims have not
    /// been checked. Not for authorization decisions.
    #[must_use]
    pub const fn peek_claims(&self) -> &IdentityTokenClaims {
        &self.state.claims
    }
}

impl Token<Validated> {
    /// Verified claims.
    #[must_use]
    pub const fn claims(&self) -> &IdentityTokenClaims {
        &self.state.claims
    }

    /// Consume the token, keeping the claims.
    #[must_use]
    pub fn into_claims(self) -> IdentityTokenClaims {
        self.state.claims
    }

    /// Subject claim.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.claims().sub
    }

    /// Raw compact token.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Token header.
    #[must_use]
    pub const fn header(&self) -> &Header {
        &self.header
    }
}

impl<S: TokenState> Token<S> {
    /// Current state name.
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        S::state_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, EncodingKey, encode};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    const ISSUER: &str = "https://login.example.com";
    const CLIENT: &str = "client-1";

    fn sign(claims: &IdentityTokenClaims, kid: Option<&str>, secret: &[u8]) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn key() -> VerificationKey {
        VerificationKey::new("k1", vec![Algorithm::HS256], DecodingKey::from_secret(SECRET))
    }

    fn claims(exp: i64) -> IdentityTokenClaims {
        IdentityTokenClaims::new(
            ISSUER.to_string(),
            "user-1".to_string(),
            vec![CLIENT.to_string()],
            exp,
        )
        .with_nonce("n-1")
    }

    fn expectations(nonce: Option<&str>) -> ClaimExpectations<'_> {
        ClaimExpectations {
            issuer: ISSUER,
            audience: CLIENT,
            nonce,
        }
    }

    #[test]
    fn test_state_transitions() {
        let original = claims(2_000);
        let token = Token::parse(&sign(&original, Some("k1"), SECRET)).unwrap();
        assert_eq!(token.state_name(), "Unvalidated");
        assert_eq!(token.kid(), Some("k1"));
        assert_eq!(token.algorithm(), Algorithm::HS256);

        let verified = token.validate_signature_with_key(&key()).unwrap();
        assert_eq!(verified.state_name(), "SignatureValidated");

        let validated = verified
            .validate_claims(expectations(Some("n-1")), 1_000)
            .unwrap();
        assert_eq!(validated.state_name(), "Validated");
        assert_eq!(validated.subject(), "user-1");
        assert_eq!(validated.into_claims(), original);
    }

    #[test]
    fn test_wrong_secret_is_invalid_signature() {
        let raw = sign(&claims(2_000), Some("k1"), b"ffffffffffffffffffffffffffffffff");
        let err = Token::parse(&raw)
            .unwrap()
            .validate_signature_with_key(&key())
            .unwrap_err();
        assert_eq!(err, SessionError::InvalidSignature);
    }

    #[test]
    fn test_algorithm_not_allowed_by_key() {
        let mut header = Header::new(Algorithm::HS384);
        header.kid = Some("k1".to_string());
        let raw = encode(&header, &claims(2_000), &EncodingKey::from_secret(SECRET)).unwrap();

        let err = Token::parse(&raw)
            .unwrap()
            .validate_signature_with_key(&key())
            .unwrap_err();
        assert_eq!(err, SessionError::InvalidSignature);
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert_eq!(
            Token::parse("not.a.token").unwrap_err().code(),
            crate::error::TOKEN_MALFORMED
        );
    }

    #[tokio::test]
    async fn test_missing_kid_is_malformed() {
        let raw = sign(&claims(2_000), None, SECRET);
        let set: crate::jwks::KeySet = std::iter::once(key()).collect();
        let err = Token::parse(&raw)
            .unwrap()
            .validate_signature(&set)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::TokenMalformed { .. }));
    }

    #[test]
    fn test_claim_checks_in_order() {
        let verify = |c: &IdentityTokenClaims| {
            Token::parse(&sign(c, Some("k1"), SECRET))
                .unwrap()
                .validate_signature_with_key(&key())
                .unwrap()
        };

        let mut wrong_issuer = claims(500);
        wrong_issuer.iss = "https://evil.example.com".to_string();
        assert!(matches!(
            verify(&wrong_issuer).validate_claims(expectations(None), 1_000),
            Err(SessionError::IssuerMismatch { .. })
        ));

        let mut wrong_audience = claims(500);
        wrong_audience.aud = vec!["other".to_string()];
        assert!(matches!(
            verify(&wrong_audience).validate_claims(expectations(None), 1_000),
            Err(SessionError::AudienceMismatch { .. })
        ));

        assert!(matches!(
            verify(&claims(1_000)).validate_claims(expectations(None), 1_000),
            Err(SessionError::TokenExpired { .. })
        ));

        assert_eq!(
            verify(&claims(2_000))
                .validate_claims(expectations(Some("other")), 1_000)
                .unwrap_err(),
            SessionError::NonceMismatch
        );
    }

    #[test]
    fn test_expected_nonce_requires_claim() {
        let mut no_nonce = claims(2_000);
        no_nonce.nonce = None;
        let verified = Token::parse(&sign(&no_nonce, Some("k1"), SECRET))
            .unwrap()
            .validate_signature_with_key(&key())
            .unwrap();

        assert_eq!(verified.peek_claims().nonce, None);
        assert_eq!(
            verified
                .validate_claims(expectations(Some("n-1")), 1_000)
                .unwrap_err(),
            SessionError::NonceMismatch
        );
    }
}
