//! OAuth2/OIDC session and token lifecycle engine.
//!
//! This crate provides:
//! - Identity token claims, token bundles and persisted session records
//! - An encrypted, durable keyed store with shared access groups
//! - Remote key set resolution and identity token validation
//! - Single-flight token refresh per account
//! - The [`Client`]/[`User`] facade used by host applications

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod jwks;
pub mod jwt;
pub mod refresh;
pub mod storage;

pub use client::{Client, User, UserProfile};
pub use config::ClientConfiguration;
pub use error::SessionError;
pub use events::{ListenerHandle, SessionEvent};
pub use http::{HttpClient, HttpError, HttpRequest, HttpResponse, TokenResponse};
pub use jwks::{KeySet, KeySetResolver, VerificationKey};
pub use jwt::{IdTokenValidator, IdentityTokenClaims};
pub use refresh::RefreshCoordinator;
pub use storage::{SecureKeyedStore, SessionRecord, SessionStore, TokenBundle};
