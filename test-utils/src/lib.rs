//! Shared test utilities for the account session SDK.
//!
//! This crate provides:
//! - Proptest generators for claims and session records
//! - In-memory keyed store and scripted HTTP client
//! - Signing key fixtures and sample sessions

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use fixtures::*;
pub use generators::*;
pub use mocks::*;
