//! Tracker orchestrator and public entry point.
//!
//! This module defines the `Tracker`, which owns at most one tracking session at a time. It wires
//! a verification provider, the classifier thresholds, and a poll scheduler into a session, and
//! makes sure that starting a new session always tears the previous one down first so no
//! orphaned polling task can touch stale state.
//!
//! The tracker is responsible for:
//! - Validating its configuration once, up front
//! - Handing out session identity tokens (generations) in increasing order
//! - Cancelling the previous session before a new one is created
//! - Rejecting `current`/`refresh` calls when no session is active

use crate::tracker::config::TrackerConfig;
use crate::tracker::subscription::Subscription;
use crate::tracker::types::{RefreshOutcome, TrackerError, TrackingSession};
use crate::utils::truncate_id;
use crate::verification::VerificationProvider;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Orchestrator for confirmation tracking.
///
/// Different `Tracker` instances share nothing and may run side by side.
pub struct Tracker {
	provider: Arc<dyn VerificationProvider>,
	config: TrackerConfig,
	next_generation: AtomicU64,
	/// Generation of the active session, 0 when none
	active_generation: Arc<AtomicU64>,
	active: Mutex<Option<Subscription>>,
}

impl Tracker {
	/// Create a tracker for the given provider, validating the configuration.
	pub fn new(
		provider: Arc<dyn VerificationProvider>,
		config: TrackerConfig,
	) -> Result<Self, TrackerError> {
		config.validate()?;

		Ok(Self {
			provider,
			config,
			next_generation: AtomicU64::new(1),
			active_generation: Arc::new(AtomicU64::new(0)),
			active: Mutex::new(None),
		})
	}

	pub fn config(&self) -> &TrackerConfig {
		&self.config
	}

	fn active(&self) -> MutexGuard<'_, Option<Subscription>> {
		self.active.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Start tracking `transaction_id`, superseding any current session.
	///
	/// The first fetch is issued immediately. Must be called from within a Tokio runtime.
	pub fn track(&self, transaction_id: &str) -> Result<Subscription, TrackerError> {
		if transaction_id.trim().is_empty() {
			return Err(TrackerError::InvalidTransactionId);
		}

		// Listeners of the previous session run without the lock held.
		let previous = self.active().take();
		if let Some(previous) = previous {
			previous.dispose();
		}

		let mut active = self.active();
		let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
		self.active_generation.store(generation, Ordering::SeqCst);

		info!(
			generation,
			poll_interval_ms = self.config.poll_interval.as_millis() as u64,
			finality = self.config.finality_confirmations,
			"Tracking transaction {}",
			truncate_id(transaction_id)
		);

		let subscription = Subscription::start(
			self.provider.clone(),
			transaction_id.to_string(),
			generation,
			self.active_generation.clone(),
			&self.config,
		);
		let displaced = active.replace(subscription.clone());
		drop(active);

		// A concurrent track may have installed a session in the meantime.
		if let Some(displaced) = displaced {
			displaced.dispose();
		}

		Ok(subscription)
	}

	/// The live session, if one is active.
	pub fn subscription(&self) -> Option<Subscription> {
		self.active()
			.as_ref()
			.filter(|subscription| !subscription.is_terminated())
			.cloned()
	}

	/// Read-only copy of the active session.
	pub fn current(&self) -> Result<TrackingSession, TrackerError> {
		self.subscription()
			.map(|subscription| subscription.session())
			.ok_or(TrackerError::NoActiveSession)
	}

	/// Force an immediate fetch for the active session.
	pub fn refresh(&self) -> Result<RefreshOutcome, TrackerError> {
		self.subscription()
			.ok_or(TrackerError::NoActiveSession)?
			.refresh()
	}

	/// Stop the active session, if any. Idempotent.
	pub fn dispose(&self) {
		let active = self.active().take();
		if let Some(subscription) = active {
			subscription.dispose();
		}
	}
}

impl Drop for Tracker {
	fn drop(&mut self) {
		self.dispose();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tracker::events::SessionChange;
	use crate::tracker::types::Status;
	use crate::verification::mock::{ScriptedProvider, confirmed};
	use crate::verification::{ErrorKind, ProviderError, Snapshot};
	use std::time::Duration;

	fn tracker(provider: Arc<ScriptedProvider>) -> Tracker {
		Tracker::new(provider, TrackerConfig::default()).unwrap()
	}

	async fn settle() {
		tokio::time::sleep(Duration::from_millis(1)).await;
	}

	fn record(subscription: &Subscription) -> Arc<Mutex<Vec<SessionChange>>> {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = seen.clone();
		subscription.on_change(move |changes: &[SessionChange], _: &TrackingSession| {
			sink.lock().unwrap().extend_from_slice(changes);
		});
		seen
	}

	fn status_changes(changes: &[SessionChange]) -> Vec<Status> {
		changes
			.iter()
			.filter_map(|change| match change {
				SessionChange::StatusChanged { to, .. } => Some(*to),
				_ => None,
			})
			.collect()
	}

	#[tokio::test(start_paused = true)]
	async fn test_fully_confirmed_stops_polling() {
		let provider = Arc::new(ScriptedProvider::new().script("0xabc", vec![confirmed("0xabc", 12)]));
		let tracker = tracker(provider.clone());

		let subscription = tracker.track("0xabc").unwrap();
		assert_eq!(subscription.status(), Status::Pending);
		let seen = record(&subscription);

		settle().await;
		assert_eq!(subscription.status(), Status::FullyConfirmed);
		assert_eq!(status_changes(&seen.lock().unwrap()), vec![Status::FullyConfirmed]);
		assert!(seen.lock().unwrap().contains(&SessionChange::PollingStopped));

		tokio::time::sleep(Duration::from_secs(120)).await;
		assert_eq!(provider.calls_for("0xabc"), 1);
		assert!(!tracker.current().unwrap().is_polling);
		assert_eq!(tracker.current().unwrap().progress, 1.0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_unconfirmed_polls_again_after_interval() {
		let provider = Arc::new(ScriptedProvider::new().script("0xabc", vec![confirmed("0xabc", 2)]));
		let tracker = tracker(provider.clone());

		let subscription = tracker.track("0xabc").unwrap();
		settle().await;
		assert_eq!(subscription.status(), Status::Unconfirmed);
		assert_eq!(provider.calls_for("0xabc"), 1);

		tokio::time::sleep(Duration::from_millis(10_000)).await;
		assert_eq!(provider.calls_for("0xabc"), 2);
		assert!(tracker.current().unwrap().is_polling);
	}

	#[tokio::test(start_paused = true)]
	async fn test_not_verified_stops_polling_but_refresh_is_allowed() {
		let provider = Arc::new(ScriptedProvider::new().script(
			"0xabc",
			vec![Ok(Snapshot::new("0xabc").with_verified(false))],
		));
		let tracker = tracker(provider.clone());

		let subscription = tracker.track("0xabc").unwrap();
		settle().await;
		assert_eq!(subscription.status(), Status::NotVerified);

		tokio::time::sleep(Duration::from_secs(60)).await;
		assert_eq!(provider.calls_for("0xabc"), 1);

		assert_eq!(tracker.refresh(), Ok(RefreshOutcome::Scheduled));
		settle().await;
		assert_eq!(provider.calls_for("0xabc"), 2);
		assert_eq!(subscription.status(), Status::NotVerified);

		tokio::time::sleep(Duration::from_secs(60)).await;
		assert_eq!(provider.calls_for("0xabc"), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_recovers_from_network_failure() {
		let provider = Arc::new(ScriptedProvider::new().script(
			"0xabc",
			vec![
				Err(ProviderError::network("connection reset")),
				confirmed("0xabc", 7),
			],
		));
		let tracker = tracker(provider.clone());

		let subscription = tracker.track("0xabc").unwrap();
		let seen = record(&subscription);

		settle().await;
		assert_eq!(subscription.status(), Status::FetchFailed);
		assert_eq!(subscription.last_error(), Some(ErrorKind::Network));
		assert!(subscription.snapshot().is_none());
		assert!(tracker.current().unwrap().is_polling);

		tokio::time::sleep(Duration::from_secs(10)).await;
		assert_eq!(subscription.status(), Status::FullyConfirmed);
		assert_eq!(subscription.last_error(), None);

		let seen = seen.lock().unwrap();
		assert_eq!(
			status_changes(&seen),
			vec![Status::FetchFailed, Status::FullyConfirmed]
		);
		assert!(seen.contains(&SessionChange::ErrorRecorded(ErrorKind::Network)));
		assert!(seen.contains(&SessionChange::ErrorCleared));
		assert_eq!(tracker.current().unwrap().attempt_count, 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_failure_keeps_known_snapshot() {
		let provider = Arc::new(ScriptedProvider::new().script(
			"0xabc",
			vec![
				confirmed("0xabc", 4),
				Err(ProviderError::timeout("slow")),
			],
		));
		let tracker = tracker(provider.clone());

		let subscription = tracker.track("0xabc").unwrap();
		settle().await;
		tokio::time::sleep(Duration::from_secs(10)).await;

		let session = tracker.current().unwrap();
		assert_eq!(session.status, Status::PartiallyConfirmed);
		assert_eq!(session.last_error, Some(ErrorKind::Timeout));
		assert_eq!(
			session.latest_snapshot.and_then(|s| s.confirmations),
			Some(4)
		);
		assert_eq!(session.consecutive_failures, 1);
		assert!(session.is_polling);
		drop(subscription);
	}

	#[tokio::test(start_paused = true)]
	async fn test_not_found_is_retried() {
		let provider = Arc::new(ScriptedProvider::new());
		let tracker = tracker(provider.clone());

		let subscription = tracker.track("0xunindexed").unwrap();
		tokio::time::sleep(Duration::from_secs(25)).await;

		assert_eq!(subscription.status(), Status::FetchFailed);
		assert_eq!(subscription.last_error(), Some(ErrorKind::NotFound));
		assert_eq!(provider.calls_for("0xunindexed"), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn test_refresh_while_in_flight_makes_one_call() {
		let provider = Arc::new(
			ScriptedProvider::new()
				.script("0xabc", vec![confirmed("0xabc", 1)])
				.gated("0xabc"),
		);
		let tracker = tracker(provider.clone());

		let subscription = tracker.track("0xabc").unwrap();
		settle().await;
		assert_eq!(tracker.refresh(), Ok(RefreshOutcome::Coalesced));
		assert_eq!(subscription.refresh(), Ok(RefreshOutcome::Coalesced));
		assert_eq!(provider.calls_for("0xabc"), 1);

		provider.release("0xabc");
		settle().await;
		assert_eq!(subscription.status(), Status::Unconfirmed);
		assert_eq!(provider.calls_for("0xabc"), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_superseded_session_never_updates_new_one() {
		let provider = Arc::new(
			ScriptedProvider::new()
				.script("0xaaa", vec![confirmed("0xaaa", 50)])
				.gated("0xaaa")
				.script("0xbbb", vec![confirmed("0xbbb", 1)]),
		);
		let tracker = tracker(provider.clone());

		let first = tracker.track("0xaaa").unwrap();
		settle().await;
		assert_eq!(provider.calls_for("0xaaa"), 1);

		let second = tracker.track("0xbbb").unwrap();
		assert!(first.is_terminated());
		assert!(second.generation() > first.generation());

		provider.release("0xaaa");
		settle().await;

		let session = tracker.current().unwrap();
		assert_eq!(session.transaction_id, "0xbbb");
		assert_eq!(session.status, Status::Unconfirmed);
		assert_eq!(
			session.latest_snapshot.map(|s| s.transaction_id),
			Some("0xbbb".to_string())
		);
		assert_eq!(first.status(), Status::Pending);
		assert!(first.snapshot().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_dispose_is_idempotent() {
		let provider = Arc::new(ScriptedProvider::new().script("0xabc", vec![confirmed("0xabc", 1)]));
		let tracker = tracker(provider.clone());

		let subscription = tracker.track("0xabc").unwrap();
		let seen = record(&subscription);
		settle().await;

		subscription.dispose();
		subscription.dispose();
		tracker.dispose();
		tracker.dispose();

		let disposed = seen
			.lock()
			.unwrap()
			.iter()
			.filter(|c| **c == SessionChange::Disposed)
			.count();
		assert_eq!(disposed, 1);
		assert!(subscription.is_terminated());
		assert_eq!(subscription.refresh(), Err(TrackerError::Disposed));
		assert_eq!(tracker.current(), Err(TrackerError::NoActiveSession));

		tokio::time::sleep(Duration::from_secs(60)).await;
		assert_eq!(provider.calls_for("0xabc"), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_dispose_during_in_flight_fetch() {
		let provider = Arc::new(
			ScriptedProvider::new()
				.script("0xabc", vec![confirmed("0xabc", 12)])
				.gated("0xabc"),
		);
		let tracker = tracker(provider.clone());

		let subscription = tracker.track("0xabc").unwrap();
		settle().await;
		tracker.dispose();
		provider.release("0xabc");
		settle().await;

		assert_eq!(subscription.status(), Status::Pending);
		assert!(subscription.snapshot().is_none());
	}

	#[tokio::test]
	async fn test_misuse_before_track() {
		let tracker = tracker(Arc::new(ScriptedProvider::new()));

		assert_eq!(tracker.current(), Err(TrackerError::NoActiveSession));
		assert_eq!(tracker.refresh(), Err(TrackerError::NoActiveSession));
		assert!(tracker.subscription().is_none());
		tracker.dispose();
	}

	#[tokio::test]
	async fn test_empty_transaction_id_is_rejected() {
		let tracker = tracker(Arc::new(ScriptedProvider::new()));

		assert!(matches!(
			tracker.track("   "),
			Err(TrackerError::InvalidTransactionId)
		));
	}

	#[tokio::test]
	async fn test_transaction_id_is_kept_as_supplied() {
		let tracker = tracker(Arc::new(ScriptedProvider::new()));

		let subscription = tracker.track(" 0xabc ").unwrap();
		assert_eq!(subscription.transaction_id(), " 0xabc ");
		assert_eq!(tracker.current().unwrap().transaction_id, " 0xabc ");
	}

	#[tokio::test(start_paused = true)]
	async fn test_listener_can_query_tracker_on_dispose() {
		let provider = Arc::new(
			ScriptedProvider::new()
				.script("0xabc", vec![confirmed("0xabc", 1)])
				.script("0xdef", vec![confirmed("0xdef", 1)]),
		);
		let tracker = Arc::new(tracker(provider));
		let observed = Arc::new(Mutex::new(Vec::new()));

		let first = tracker.track("0xabc").unwrap();
		let weak = Arc::downgrade(&tracker);
		let sink = observed.clone();
		first.on_change(move |changes: &[SessionChange], _: &TrackingSession| {
			if !changes.contains(&SessionChange::Disposed) {
				return;
			}
			if let Some(tracker) = weak.upgrade() {
				sink.lock().unwrap().push(tracker.current().map(|s| s.transaction_id));
				let _ = tracker.refresh();
				let _ = tracker.subscription();
			}
		});
		settle().await;

		let second = tracker.track("0xdef").unwrap();
		assert_eq!(second.transaction_id(), "0xdef");
		assert_eq!(
			*observed.lock().unwrap(),
			vec![Err(TrackerError::NoActiveSession)]
		);

		let weak = Arc::downgrade(&tracker);
		let sink = observed.clone();
		second.on_change(move |changes: &[SessionChange], _: &TrackingSession| {
			let Some(tracker) = weak.upgrade() else {
				return;
			};
			if changes.contains(&SessionChange::Disposed) {
				sink.lock().unwrap().push(tracker.current().map(|s| s.transaction_id));
			}
		});
		tracker.dispose();

		assert_eq!(observed.lock().unwrap().len(), 2);
		assert!(second.is_terminated());
		assert_eq!(tracker.current(), Err(TrackerError::NoActiveSession));
	}

	#[test]
	fn test_invalid_config_is_rejected() {
		let config = TrackerConfig::default().with_thresholds(7, 6);
		let result = Tracker::new(Arc::new(ScriptedProvider::new()), config);
		assert!(matches!(result, Err(TrackerError::InvalidConfig(_))));
	}

	#[tokio::test(start_paused = true)]
	async fn test_unsubscribed_listener_is_not_called() {
		let provider = Arc::new(ScriptedProvider::new().script("0xabc", vec![confirmed("0xabc", 2)]));
		let tracker = tracker(provider);

		let subscription = tracker.track("0xabc").unwrap();
		let seen = Arc::new(Mutex::new(0usize));
		let sink = seen.clone();
		let handle = subscription.on_change(move |_: &[SessionChange], _: &TrackingSession| {
			*sink.lock().unwrap() += 1;
		});
		handle.unsubscribe();

		settle().await;
		assert_eq!(subscription.status(), Status::Unconfirmed);
		assert_eq!(*seen.lock().unwrap(), 0);
	}
}
