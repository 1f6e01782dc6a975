//! Tracking session core and the subscription handle given to callers.
//!
//! `SessionCore` owns the mutable state of one session. It is the only place where fetch results
//! are applied, and every application is checked against the session's generation token so a
//! result belonging to a superseded or disposed session can never change anything.

use crate::tracker::classifier::{Thresholds, classify};
use crate::tracker::config::TrackerConfig;
use crate::tracker::events::{ListenerHandle, ListenerRegistry, SessionChange, SessionListener, diff};
use crate::tracker::scheduler::{PollDecision, PollHandler, PollScheduler};
use crate::tracker::types::{RefreshOutcome, Status, TrackerError, TrackingSession};
use crate::utils::{format_progress, truncate_id};
use crate::verification::{ErrorKind, ProviderError, Snapshot, VerificationProvider};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::watch;
use tracing::{info, warn};

struct SessionState {
	session: TrackingSession,
	terminated: bool,
}

/// Orders listener delivery so `Disposed` is always the last batch.
#[derive(Default)]
struct DispatchState {
	/// A change batch is being delivered
	running: bool,
	/// Set once disposed; later batches are dropped
	closed: bool,
	/// `Disposed` waiting for the running batch to finish
	deferred: Option<TrackingSession>,
}

pub(crate) struct SessionCore {
	generation: u64,
	/// Generation of the tracker's current session, shared with the tracker
	active_generation: Arc<AtomicU64>,
	thresholds: Thresholds,
	max_attempts: Option<u32>,
	state: Mutex<SessionState>,
	dispatch: Mutex<DispatchState>,
	listeners: ListenerRegistry,
	watch_tx: watch::Sender<TrackingSession>,
	scheduler: OnceLock<PollScheduler>,
}

impl SessionCore {
	fn state(&self) -> MutexGuard<'_, SessionState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn dispatch_state(&self) -> MutexGuard<'_, DispatchState> {
		self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Deliver a change batch unless the session has been disposed.
	fn deliver(&self, changes: &[SessionChange], session: &TrackingSession) {
		{
			let mut dispatch = self.dispatch_state();
			if dispatch.closed {
				return;
			}
			dispatch.running = true;
		}

		self.listeners.dispatch(changes, session);

		let deferred = {
			let mut dispatch = self.dispatch_state();
			dispatch.running = false;
			dispatch.deferred.take()
		};
		if let Some(session) = deferred {
			self.deliver_disposed(&session);
		}
	}

	/// Close the listener stream, delivering `Disposed` now or after the running batch.
	fn close(&self, session: TrackingSession) {
		let now = {
			let mut dispatch = self.dispatch_state();
			dispatch.closed = true;
			if dispatch.running {
				dispatch.deferred = Some(session);
				None
			} else {
				Some(session)
			}
		};
		if let Some(session) = now {
			self.deliver_disposed(&session);
		}
	}

	fn deliver_disposed(&self, session: &TrackingSession) {
		self.listeners.dispatch(&[SessionChange::Disposed], session);
		self.listeners.clear();
	}

	fn is_current(&self, state: &SessionState) -> bool {
		!state.terminated && self.active_generation.load(Ordering::SeqCst) == self.generation
	}

	/// Fold one fetch outcome into the session state.
	fn apply_outcome(&self, session: &mut TrackingSession, result: Result<Snapshot, ProviderError>) {
		session.attempt_count = session.attempt_count.saturating_add(1);
		let tx = truncate_id(&session.transaction_id);

		match result {
			Ok(snapshot) => {
				let had_snapshot = session.latest_snapshot.is_some();
				let classification = classify(Some(&snapshot), None, &self.thresholds);

				if session.status.is_terminal() && classification.status != session.status {
					warn!(
						"Ignoring snapshot for {} classified as {:?} after terminal status {:?}",
						tx, classification.status, session.status
					);
				} else {
					session.status = session.status.settle(classification.status, had_snapshot);
					session.progress = classification.progress;
					session.latest_snapshot = Some(snapshot);
				}
				session.last_error = None;
				session.consecutive_failures = 0;
			}
			Err(e) => {
				warn!(
					kind = %e.kind,
					attempt = session.attempt_count,
					"Verification fetch for {} failed: {}",
					tx,
					e.message
				);
				session.last_error = Some(e.kind);
				session.consecutive_failures = session.consecutive_failures.saturating_add(1);

				let classification =
					classify(session.latest_snapshot.as_ref(), Some(e.kind), &self.thresholds);
				let had_snapshot = session.latest_snapshot.is_some();
				session.status = session.status.settle(classification.status, had_snapshot);
				session.progress = classification.progress;
			}
		}
	}

	fn decide(&self, session: &TrackingSession) -> PollDecision {
		if session.status.is_terminal() {
			return PollDecision::Halt;
		}
		if let Some(max) = self.max_attempts {
			if session.attempt_count >= max {
				warn!(
					"Giving up automatic polling for {} after {} attempts (status: {})",
					truncate_id(&session.transaction_id),
					session.attempt_count,
					session.status
				);
				return PollDecision::Halt;
			}
		}
		PollDecision::Continue {
			failed: session.last_error.is_some(),
		}
	}
}

impl PollHandler for SessionCore {
	fn on_result(&self, result: Result<Snapshot, ProviderError>) -> PollDecision {
		let (changes, session, decision) = {
			let mut state = self.state();
			if !self.is_current(&state) {
				warn!(
					generation = self.generation,
					"Discarding result for superseded session {}",
					truncate_id(&state.session.transaction_id)
				);
				return PollDecision::Discard;
			}

			let before = state.session.clone();
			self.apply_outcome(&mut state.session, result);
			let decision = self.decide(&state.session);
			state.session.is_polling = matches!(decision, PollDecision::Continue { .. });

			let after = state.session.clone();
			self.watch_tx.send_replace(after.clone());
			(diff(&before, &after), after, decision)
		};

		for change in &changes {
			if let SessionChange::StatusChanged { from, to } = change {
				info!(
					progress = %format_progress(session.progress),
					"Transaction {} status: {} -> {}",
					truncate_id(&session.transaction_id),
					from,
					to
				);
			}
		}
		self.deliver(&changes, &session);

		decision
	}
}

/// Handle to one tracking session.
///
/// Cloning is cheap; all clones observe and control the same session.
#[derive(Clone)]
pub struct Subscription {
	core: Arc<SessionCore>,
}

impl Subscription {
	/// Create the session and start polling. Must be called from within a Tokio runtime.
	pub(crate) fn start(
		provider: Arc<dyn VerificationProvider>,
		transaction_id: String,
		generation: u64,
		active_generation: Arc<AtomicU64>,
		config: &TrackerConfig,
	) -> Self {
		let session = TrackingSession::new(transaction_id.clone(), generation);
		let (watch_tx, _) = watch::channel(session.clone());

		let core = Arc::new(SessionCore {
			generation,
			active_generation,
			thresholds: Thresholds::from(config),
			max_attempts: config.max_attempts,
			state: Mutex::new(SessionState {
				session,
				terminated: false,
			}),
			dispatch: Mutex::new(DispatchState::default()),
			listeners: ListenerRegistry::new(),
			watch_tx,
			scheduler: OnceLock::new(),
		});

		let scheduler =
			PollScheduler::start(provider, transaction_id, config, Arc::downgrade(&core));
		// Freshly created lock, cannot already be set
		let _ = core.scheduler.set(scheduler);

		Self { core }
	}

	pub fn transaction_id(&self) -> String {
		self.core.state().session.transaction_id.clone()
	}

	pub fn generation(&self) -> u64 {
		self.core.generation
	}

	pub fn status(&self) -> Status {
		self.core.state().session.status
	}

	pub fn snapshot(&self) -> Option<Snapshot> {
		self.core.state().session.latest_snapshot.clone()
	}

	pub fn last_error(&self) -> Option<ErrorKind> {
		self.core.state().session.last_error
	}

	/// Read-only copy of the whole session state.
	pub fn session(&self) -> TrackingSession {
		self.core.state().session.clone()
	}

	/// Register a listener notified after every applied change.
	pub fn on_change<L: SessionListener + 'static>(&self, listener: L) -> ListenerHandle {
		self.core.listeners.register(Arc::new(listener))
	}

	/// Watch channel that always holds the latest session state.
	pub fn changes(&self) -> watch::Receiver<TrackingSession> {
		self.core.watch_tx.subscribe()
	}

	/// Request an immediate fetch outside the poll cadence.
	///
	/// Allowed after a terminal status; the fetch result can then only refine the snapshot.
	pub fn refresh(&self) -> Result<RefreshOutcome, TrackerError> {
		if self.core.state().terminated {
			return Err(TrackerError::Disposed);
		}
		match self.core.scheduler.get() {
			Some(scheduler) => Ok(scheduler.refresh_now()),
			None => Err(TrackerError::NoActiveSession),
		}
	}

	pub fn is_terminated(&self) -> bool {
		self.core.state().terminated
	}

	/// Stop polling and release the session. Safe to call repeatedly and while a fetch is in flight.
	pub fn dispose(&self) {
		let session = {
			let mut state = self.core.state();
			if state.terminated {
				return;
			}
			state.terminated = true;
			state.session.is_polling = false;
			self.core.watch_tx.send_replace(state.session.clone());
			state.session.clone()
		};

		if let Some(scheduler) = self.core.scheduler.get() {
			scheduler.stop();
		}
		let _ = self.core.active_generation.compare_exchange(
			self.core.generation,
			0,
			Ordering::SeqCst,
			Ordering::SeqCst,
		);

		info!(
			attempts = session.attempt_count,
			"Stopped tracking {} ({})",
			truncate_id(&session.transaction_id),
			session.status
		);
		self.core.close(session);
	}
}
