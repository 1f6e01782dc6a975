//! Transaction Confirmation Tracking Module
//!
//! This module turns a stream of verification responses into a stable, user-meaningful
//! confirmation status for one transaction at a time. It is composed of several submodules:
//!
//! - `orchestrator`: The `Tracker`, public entry point. Starts, supersedes, and disposes sessions.
//! - `subscription`: The session core that applies fetch results, and the `Subscription` handle.
//! - `scheduler`: Drives repeated provider queries with an in-flight guard and cancellation.
//! - `classifier`: Pure mapping from a snapshot to a `Status` and a progress ratio.
//! - `events`: Change events and the listener registry used to notify observers.
//! - `config`: Polling cadence and confirmation thresholds.
//! - `types`: Status, session, and error types.
//!
//! Data flows from the scheduler through the provider into the session core, which classifies
//! the result, updates the session if it is still current, and notifies listeners.

/// Pure snapshot classification
pub mod classifier;
/// Tracker configuration
pub mod config;
/// Change events and listener registry
pub mod events;
/// Public entry point for tracking
pub mod orchestrator;
/// Poll scheduling and cancellation
pub mod scheduler;
/// Session core and subscription handle
pub mod subscription;
/// Status, session, and error types
pub mod types;

pub use config::TrackerConfig;
pub use events::{ListenerHandle, SessionChange, SessionListener};
pub use orchestrator::Tracker;
pub use subscription::Subscription;
pub use types::*;
