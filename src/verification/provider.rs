//! The verification capability consumed by the tracker.

use super::types::{ProviderError, Snapshot};
use async_trait::async_trait;

/// Trait for services that can report the verification state of a transaction.
///
/// Implementations only answer queries; they never retry or schedule on their own. Retrying is
/// the poll scheduler's job.
#[async_trait]
pub trait VerificationProvider: Send + Sync {
	/// Query the current verification snapshot for `transaction_id`.
	async fn fetch_verification(&self, transaction_id: &str) -> Result<Snapshot, ProviderError>;

	/// Get the name of this provider for logging and diagnostics.
	fn name(&self) -> &'static str;
}
