//! Confirmation tracking for transactions anchored on an external ledger.
//!
//! A [`tracker::Tracker`] polls a [`verification::VerificationProvider`] for one transaction at
//! a time, classifies each answer into a [`tracker::Status`], and stops polling once the status
//! is terminal.

pub mod tracker;
pub mod utils;
pub mod verification;

pub use tracker::{Status, Subscription, Tracker, TrackerConfig, TrackerError, TrackingSession};
pub use verification::{ErrorKind, HttpVerificationClient, ProviderError, Snapshot, VerificationProvider};
