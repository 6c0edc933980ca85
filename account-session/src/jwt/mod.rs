//! Identity token claims and validation.

pub mod claims;
pub mod token;
pub mod validator;

pub use claims::IdentityTokenClaims;
pub use token::{ClaimExpectations, SignatureValidated, Token, TokenState, Unvalidated, Validated};
pub use validator::IdTokenValidator;
