//! Verification provider integration
//!
//! This module provides the types and the client used to ask an external verification service
//! about a transaction. The service is consumed through the `VerificationProvider` trait so the
//! tracker can be driven by any implementation, including the scripted one used in tests.

/// HTTP client for the verification API
mod client;
/// Scripted provider for tests
#[cfg(test)]
pub mod mock;
/// The provider capability trait
mod provider;
/// Snapshot and error type definitions
mod types;

pub use client::{DEFAULT_REQUEST_TIMEOUT, HttpVerificationClient};
pub use provider::VerificationProvider;
pub use types::*;
