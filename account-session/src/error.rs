//! Error taxonomy for the session engine.
//!
//! Validation and refresh failures are returned with a discriminated kind so
//! host applications can choose the UX: force a new login on
//! [`SessionError::NoRefreshToken`] or [`SessionError::InvalidSignature`],
//! retry on [`SessionError::RefreshRequestFailed`].

use crate::http::HttpError;
use account_common::Retryable;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced by the session engine.
///
/// `Clone` so that one refresh outcome can be handed to every waiter.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session has no refresh token, so it can never be silently refreshed
    #[error("Session has no refresh token")]
    NoRefreshToken,

    /// The refresh request to the token endpoint failed
    #[error("Token refresh request failed: {cause}")]
    RefreshRequestFailed {
        /// Underlying HTTP failure
        cause: HttpError,
    },

    /// An authenticated request made on behalf of the session failed
    #[error("Authenticated request failed: {cause}")]
    RequestFailed {
        /// Underlying HTTP failure
        cause: HttpError,
    },

    /// The token header references a key id absent from the key set
    #[error("Unknown signing key: {kid}")]
    UnknownSigningKey {
        /// Key id from the token header
        kid: String,
    },

    /// Cryptographic signature verification failed
    #[error("Token signature invalid")]
    InvalidSignature,

    /// The `iss` claim does not match the configured issuer
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Configured issuer
        expected: String,
        /// Issuer found in the token
        actual: String,
    },

    /// The `aud` claim does not contain the client id
    #[error("Audience mismatch: expected {expected}, got {actual:?}")]
    AudienceMismatch {
        /// Expected audience (the client id)
        expected: String,
        /// Audience found in the token
        actual: Vec<String>,
    },

    /// The token expiry is not in the future
    #[error("Token expired at {expired_at}")]
    TokenExpired {
        /// When the token expired
        expired_at: DateTime<Utc>,
    },

    /// The `nonce` claim does not match the nonce sent with the request
    #[error("Nonce mismatch")]
    NonceMismatch,

    /// Token structure is malformed
    #[error("Token malformed: {reason}")]
    TokenMalformed {
        /// Description of the malformation
        reason: String,
    },

    /// The remote key set could not be fetched or parsed
    #[error("Key set unavailable: {reason}")]
    KeySetUnavailable {
        /// Description of the failure
        reason: String,
    },

    /// Persisting to the secure store failed
    #[error("Storage write failed: {reason}")]
    StorageWriteFailed {
        /// Description of the failure
        reason: String,
    },

    /// Reading from the secure store failed
    #[error("Storage read failed: {reason}")]
    StorageReadFailed {
        /// Description of the failure
        reason: String,
    },

    /// A stored blob could not be decoded into a session record
    #[error("Session deserialization failed: {reason}")]
    DeserializationFailed {
        /// Description of the failure
        reason: String,
    },

    /// No session is stored for the account key
    #[error("No session stored for {account_key}")]
    SessionNotFound {
        /// The account key that was looked up
        account_key: String,
    },

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Stable error code for host applications and logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoRefreshToken => SESSION_NO_REFRESH_TOKEN,
            Self::RefreshRequestFailed { .. } => SESSION_REFRESH_REQUEST_FAILED,
            Self::RequestFailed { .. } => REQUEST_FAILED,
            Self::UnknownSigningKey { .. } => TOKEN_UNKNOWN_SIGNING_KEY,
            Self::InvalidSignature => TOKEN_INVALID_SIGNATURE,
            Self::IssuerMismatch { .. } => TOKEN_ISSUER_MISMATCH,
            Self::AudienceMismatch { .. } => TOKEN_AUDIENCE_MISMATCH,
            Self::TokenExpired { .. } => TOKEN_EXPIRED,
            Self::NonceMismatch => TOKEN_NONCE_MISMATCH,
            Self::TokenMalformed { .. } => TOKEN_MALFORMED,
            Self::KeySetUnavailable { .. } => KEY_SET_UNAVAILABLE,
            Self::StorageWriteFailed { .. } => STORAGE_WRITE_FAILED,
            Self::StorageReadFailed { .. } => STORAGE_READ_FAILED,
            Self::DeserializationFailed { .. } => SESSION_DESERIALIZATION_FAILED,
            Self::SessionNotFound { .. } => SESSION_NOT_FOUND,
            Self::Configuration(_) => CONFIGURATION_ERROR,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    /// Whether the failure comes from validating a token.
    #[must_use]
    pub const fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            Self::UnknownSigningKey { .. }
                | Self::InvalidSignature
                | Self::IssuerMismatch { .. }
                | Self::AudienceMismatch { .. }
                | Self::TokenExpired { .. }
                | Self::NonceMismatch
                | Self::TokenMalformed { .. }
        )
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::TokenMalformed {
            reason: reason.into(),
        }
    }

    pub(crate) fn storage_write(reason: impl Into<String>) -> Self {
        Self::StorageWriteFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn storage_read(reason: impl Into<String>) -> Self {
        Self::StorageReadFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn deserialization(reason: impl Into<String>) -> Self {
        Self::DeserializationFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn key_set(reason: impl Into<String>) -> Self {
        Self::KeySetUnavailable {
            reason: reason.into(),
        }
    }
}

impl Retryable for SessionError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::RefreshRequestFailed { cause } | Self::RequestFailed { cause } => {
                cause.is_retryable()
            }
            Self::KeySetUnavailable { .. } => true,
            _ => false,
        }
    }
}

impl From<HttpError> for SessionError {
    fn from(cause: HttpError) -> Self {
        Self::RefreshRequestFailed { cause }
    }
}

// Error codes exposed to host applications
/// Refresh attempted without a refresh token.
pub const SESSION_NO_REFRESH_TOKEN: &str = "SESSION_NO_REFRESH_TOKEN";
/// Refresh request failed on the network or at the token endpoint.
pub const SESSION_REFRESH_REQUEST_FAILED: &str = "SESSION_REFRESH_REQUEST_FAILED";
/// Authenticated request failed.
pub const REQUEST_FAILED: &str = "REQUEST_FAILED";
/// Token signed with a key id missing from the key set.
pub const TOKEN_UNKNOWN_SIGNING_KEY: &str = "TOKEN_UNKNOWN_SIGNING_KEY";
/// Token signature did not verify.
pub const TOKEN_INVALID_SIGNATURE: &str = "TOKEN_INVALID_SIGNATURE";
/// Token issuer mismatch.
pub const TOKEN_ISSUER_MISMATCH: &str = "TOKEN_ISSUER_MISMATCH";
/// Token audience mismatch.
pub const TOKEN_AUDIENCE_MISMATCH: &str = "TOKEN_AUDIENCE_MISMATCH";
/// Token expired.
pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
/// Token nonce mismatch.
pub const TOKEN_NONCE_MISMATCH: &str = "TOKEN_NONCE_MISMATCH";
/// Token could not be parsed.
pub const TOKEN_MALFORMED: &str = "TOKEN_MALFORMED";
/// Key set fetch failed.
pub const KEY_SET_UNAVAILABLE: &str = "KEY_SET_UNAVAILABLE";
/// Secure store write failed.
pub const STORAGE_WRITE_FAILED: &str = "STORAGE_WRITE_FAILED";
/// Secure store read failed.
pub const STORAGE_READ_FAILED: &str = "STORAGE_READ_FAILED";
/// Stored session could not be decoded.
pub const SESSION_DESERIALIZATION_FAILED: &str = "SESSION_DESERIALIZATION_FAILED";
/// No stored session.
pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
/// Invalid configuration.
pub const CONFIGURATION_ERROR: &str = "CONFIGURATION_ERROR";
/// Internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failures_are_not_retryable() {
        let errors = [
            SessionError::InvalidSignature,
            SessionError::NonceMismatch,
            SessionError::UnknownSigningKey {
                kid: "k1".to_string(),
            },
        ];
        for err in errors {
            assert!(err.is_validation_failure());
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_refresh_failure_retryability_follows_cause() {
        let transient = SessionError::from(HttpError::Timeout);
        assert!(transient.is_retryable());

        let rejected = SessionError::from(HttpError::Status {
            status: 400,
            body: "invalid_grant".to_string(),
        });
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.code(), SESSION_REFRESH_REQUEST_FAILED);
    }

    #[test]
    fn test_error_codes_are_distinct() {
        assert_ne!(
            SessionError::NoRefreshToken.code(),
            SessionError::InvalidSignature.code()
        );
        assert_eq!(SessionError::NonceMismatch.code(), "TOKEN_NONCE_MISMATCH");
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::IssuerMismatch {
            expected: "https://login.example.com".to_string(),
            actual: "https://evil.example.com".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Issuer mismatch: expected https://login.example.com, got https://evil.example.com"
        );
    }
}
