use std::sync::Arc;
use tracing::{error, info, warn};

use tx_confirmation_tracker::tracker::{SessionChange, SessionListener};
use tx_confirmation_tracker::utils::{format_progress, truncate_id};
use tx_confirmation_tracker::verification::DEFAULT_REQUEST_TIMEOUT;
use tx_confirmation_tracker::{HttpVerificationClient, Tracker, TrackerConfig, TrackingSession};

const DEFAULT_VERIFICATION_API_URL: &str = "http://localhost:8080/api/v1";

/// Logs every change of the tracked session.
struct LoggingListener;

impl SessionListener for LoggingListener {
	fn on_change(&self, changes: &[SessionChange], session: &TrackingSession) {
		let tx = truncate_id(&session.transaction_id);
		for change in changes {
			match change {
				SessionChange::StatusChanged { to, .. } => info!(
					"{}: {} ({} confirmations, {})",
					tx,
					to,
					session
						.latest_snapshot
						.as_ref()
						.and_then(|s| s.confirmations)
						.unwrap_or(0),
					format_progress(session.progress)
				),
				SessionChange::SnapshotUpdated => {
					if let Some(url) = session
						.latest_snapshot
						.as_ref()
						.and_then(|s| s.explorer_url.as_deref())
					{
						info!("{}: explorer {}", tx, url);
					}
				}
				SessionChange::ErrorRecorded(kind) => warn!(
					"{}: verification attempt {} failed ({})",
					tx, session.attempt_count, kind
				),
				SessionChange::ErrorCleared => info!("{}: provider reachable again", tx),
				SessionChange::PollingStopped => info!("{}: automatic polling stopped", tx),
				SessionChange::Disposed => info!("{}: tracking released", tx),
			}
		}
	}

	fn name(&self) -> &'static str {
		"LoggingListener"
	}
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
	// A missing .env file is fine
	let _ = dotenvy::dotenv();

	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let Some(transaction_id) = std::env::args().nth(1) else {
		error!("Usage: tx-confirmation-tracker <transaction-id>");
		std::process::exit(2);
	};

	let config = match TrackerConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			std::process::exit(2);
		}
	};

	let api_url = std::env::var("VERIFICATION_API_URL")
		.unwrap_or_else(|_| DEFAULT_VERIFICATION_API_URL.to_string());
	let client = match HttpVerificationClient::new(api_url.clone(), DEFAULT_REQUEST_TIMEOUT) {
		Ok(client) => client,
		Err(e) => {
			error!("Failed to create verification client: {}", e);
			std::process::exit(1);
		}
	};
	info!("Using verification API at {}", api_url);

	let tracker = match Tracker::new(Arc::new(client), config) {
		Ok(tracker) => tracker,
		Err(e) => {
			error!("Failed to create tracker: {}", e);
			std::process::exit(2);
		}
	};

	let subscription = match tracker.track(&transaction_id) {
		Ok(subscription) => subscription,
		Err(e) => {
			error!("Failed to start tracking: {}", e);
			std::process::exit(2);
		}
	};
	subscription.on_change(LoggingListener);

	let mut changes = subscription.changes();
	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);

	loop {
		tokio::select! {
			_ = &mut ctrl_c => {
				info!("Interrupted, stopping");
				break;
			}
			changed = changes.changed() => {
				if changed.is_err() {
					break;
				}
				let session = changes.borrow_and_update().clone();
				if session.status.is_terminal() {
					break;
				}
				if !session.is_polling {
					warn!("Polling ceiling reached before a final status");
					break;
				}
			}
		}
	}

	let session = subscription.session();
	tracker.dispose();

	match serde_json::to_string_pretty(&session) {
		Ok(json) => info!("Final session state:\n{}", json),
		Err(e) => error!("Failed to serialize session: {}", e),
	}
}
