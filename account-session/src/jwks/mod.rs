//! Verification key sets.

pub mod key_set;
pub mod resolver;

pub use key_set::{Jwk, Jwks, KeySet, VerificationKey};
pub use resolver::{HttpKeySetFetcher, JwkCache, KeySetResolver, RemoteKeySetFetch};
