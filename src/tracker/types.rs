use crate::verification::{ErrorKind, Snapshot};

use serde::Serialize;

/// Confirmation status of a tracked transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
	/// No data yet, or the provider has not determined the outcome
	Pending,
	/// The provider could not be queried and no snapshot was ever obtained
	FetchFailed,
	/// Verified, below the partial confirmation threshold
	Unconfirmed,
	/// Verified, between the partial and finality thresholds
	PartiallyConfirmed,
	/// Verified, at or beyond the finality threshold
	FullyConfirmed,
	/// The provider rejected the transaction
	NotVerified,
}

impl Status {
	/// Terminal statuses end automatic polling for the session.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Status::FullyConfirmed | Status::NotVerified)
	}

	/// Resolve the status that follows `self` when a classification yields `next`.
	///
	/// Terminal statuses never change. `Pending` is initial-only: when an earlier snapshot had
	/// already been observed (`had_snapshot`), the session keeps its previous status instead.
	pub fn settle(self, next: Status, had_snapshot: bool) -> Status {
		if self.is_terminal() {
			return self;
		}
		if next == Status::Pending && had_snapshot {
			return self;
		}
		next
	}

	pub fn label(&self) -> &'static str {
		match self {
			Status::Pending => "verification in progress",
			Status::FetchFailed => "verification failed",
			Status::Unconfirmed => "unconfirmed",
			Status::PartiallyConfirmed => "partially confirmed",
			Status::FullyConfirmed => "fully confirmed",
			Status::NotVerified => "not verified",
		}
	}
}

impl std::fmt::Display for Status {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.label())
	}
}

/// Read-only view of the live state of one tracked transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingSession {
	pub transaction_id: String,
	/// Identity token of the session; a newer `track` call always gets a larger one.
	pub generation: u64,
	pub latest_snapshot: Option<Snapshot>,
	pub status: Status,
	/// Confirmation progress in `[0, 1]` for display
	pub progress: f64,
	pub is_polling: bool,
	pub last_error: Option<ErrorKind>,
	/// Number of fetches whose result was applied, failed ones included
	pub attempt_count: u32,
	pub consecutive_failures: u32,
}

impl TrackingSession {
	pub fn new(transaction_id: String, generation: u64) -> Self {
		Self {
			transaction_id,
			generation,
			latest_snapshot: None,
			status: Status::Pending,
			progress: 0.0,
			is_polling: true,
			last_error: None,
			attempt_count: 0,
			consecutive_failures: 0,
		}
	}
}

/// Errors returned to callers that misuse the tracker
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
	#[error("No active tracking session")]
	NoActiveSession,

	#[error("Tracking session has been disposed")]
	Disposed,

	#[error("Transaction id must not be empty")]
	InvalidTransactionId,

	#[error("Invalid tracker configuration: {0}")]
	InvalidConfig(String),
}

/// What happened to a manual refresh request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// A fetch will be issued right away
	Scheduled,
	/// A fetch is already outstanding or queued; no extra request is made
	Coalesced,
}
