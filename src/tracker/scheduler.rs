//! Poll scheduling for a tracking session.
//!
//! `PollScheduler` owns the single logical timeline of a session: it issues a fetch, hands the
//! outcome to a `PollHandler`, and then either waits out the poll interval, waits for a manual
//! refresh, or stops. At most one fetch is outstanding and at most one timer is pending at any
//! time. Both suspension points race against the session's cancellation token.

use crate::tracker::config::TrackerConfig;
use crate::tracker::types::RefreshOutcome;
use crate::utils::truncate_id;
use crate::verification::{ProviderError, Snapshot, VerificationProvider};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What the scheduler should do after a result has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
	/// Poll again after the interval
	Continue { failed: bool },
	/// Stop automatic polling; only manual refreshes issue new fetches
	Halt,
	/// The session is no longer current; end the polling task
	Discard,
}

/// Receiver of fetch outcomes.
pub trait PollHandler: Send + Sync + 'static {
	/// Apply one fetch outcome and decide how polling proceeds.
	fn on_result(&self, result: Result<Snapshot, ProviderError>) -> PollDecision;
}

/// Delay between polls, optionally growing across consecutive failures.
pub struct IntervalPolicy {
	base: Duration,
	failure_backoff: Option<ExponentialBackoff>,
}

impl IntervalPolicy {
	pub fn new(config: &TrackerConfig) -> Self {
		let failure_backoff = config.failure_backoff.as_ref().map(|backoff| ExponentialBackoff {
			current_interval: config.poll_interval,
			initial_interval: config.poll_interval,
			randomization_factor: 0.0,
			multiplier: 2.0,
			max_interval: backoff.max_interval,
			max_elapsed_time: None,
			..ExponentialBackoff::default()
		});

		Self {
			base: config.poll_interval,
			failure_backoff,
		}
	}

	/// Delay before the next automatic fetch.
	pub fn next_delay(&mut self, failed: bool) -> Duration {
		match (&mut self.failure_backoff, failed) {
			(Some(backoff), true) => backoff.next_backoff().unwrap_or(self.base),
			(Some(backoff), false) => {
				backoff.reset();
				self.base
			}
			(None, _) => self.base,
		}
	}
}

/// Guard shared by the polling task and refresh callers.
///
/// Holding the lock while flipping `in_flight` and draining queued refreshes makes a refresh
/// either land before a fetch starts (and get absorbed by it) or observe the fetch as outstanding.
#[derive(Default)]
struct FetchGuard {
	in_flight: bool,
}

/// Handle to the polling task of one session
pub struct PollScheduler {
	cancel: CancellationToken,
	refresh_tx: mpsc::Sender<()>,
	guard: Arc<Mutex<FetchGuard>>,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl PollScheduler {
	/// Spawn the polling task and issue the first fetch immediately.
	///
	/// The handler is held weakly: once it is dropped the task ends on its next result.
	/// Must be called from within a Tokio runtime.
	pub fn start<H: PollHandler>(
		provider: Arc<dyn VerificationProvider>,
		transaction_id: String,
		config: &TrackerConfig,
		handler: Weak<H>,
	) -> Self {
		let cancel = CancellationToken::new();
		let (refresh_tx, refresh_rx) = mpsc::channel(1);
		let guard = Arc::new(Mutex::new(FetchGuard::default()));

		let task = tokio::spawn(run(
			provider,
			transaction_id,
			IntervalPolicy::new(config),
			handler,
			cancel.clone(),
			refresh_rx,
			guard.clone(),
		));

		Self {
			cancel,
			refresh_tx,
			guard,
			task: Mutex::new(Some(task)),
		}
	}

	/// Force an out-of-cadence fetch.
	///
	/// Coalesced when a fetch is outstanding or another refresh is already queued.
	pub fn refresh_now(&self) -> RefreshOutcome {
		if self.cancel.is_cancelled() {
			return RefreshOutcome::Coalesced;
		}
		let guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
		if guard.in_flight {
			debug!("Fetch already outstanding, coalescing refresh");
			return RefreshOutcome::Coalesced;
		}
		match self.refresh_tx.try_send(()) {
			Ok(()) => RefreshOutcome::Scheduled,
			Err(_) => RefreshOutcome::Coalesced,
		}
	}

	/// Cancel the pending timer and any outstanding fetch. Idempotent.
	pub fn stop(&self) {
		self.cancel.cancel();
		// The task observes the token at its next suspension point; dropping the handle detaches it.
		self.task
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
	}

	pub fn is_stopped(&self) -> bool {
		self.cancel.is_cancelled()
	}
}

impl Drop for PollScheduler {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

async fn run<H: PollHandler>(
	provider: Arc<dyn VerificationProvider>,
	transaction_id: String,
	mut policy: IntervalPolicy,
	handler: Weak<H>,
	cancel: CancellationToken,
	mut refresh_rx: mpsc::Receiver<()>,
	guard: Arc<Mutex<FetchGuard>>,
) {
	let tx = truncate_id(&transaction_id);
	info!(provider = provider.name(), "Polling started for {}", tx);

	loop {
		{
			let mut guard = guard.lock().unwrap_or_else(PoisonError::into_inner);
			// Refreshes queued before this fetch are satisfied by it
			while refresh_rx.try_recv().is_ok() {}
			guard.in_flight = true;
		}

		debug!("Fetching verification for {}", tx);
		let result = tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			result = provider.fetch_verification(&transaction_id) => result,
		};

		let decision = match handler.upgrade() {
			Some(handler) => handler.on_result(result),
			None => PollDecision::Discard,
		};
		guard
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.in_flight = false;

		match decision {
			PollDecision::Discard => break,
			PollDecision::Continue { failed } => {
				let delay = policy.next_delay(failed);
				debug!("Next poll for {} in {:?}", tx, delay);
				tokio::select! {
					biased;
					_ = cancel.cancelled() => break,
					Some(()) = refresh_rx.recv() => debug!("Manual refresh for {}", tx),
					_ = tokio::time::sleep(delay) => {}
				}
			}
			PollDecision::Halt => {
				debug!("Automatic polling halted for {}, waiting for manual refresh", tx);
				tokio::select! {
					biased;
					_ = cancel.cancelled() => break,
					received = refresh_rx.recv() => {
						if received.is_none() {
							break;
						}
						debug!("Manual refresh for {}", tx);
					}
				}
			}
		}
	}

	info!("Polling stopped for {}", tx);
}
