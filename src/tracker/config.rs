//! Tracker configuration.
//!
//! `TrackerConfig` carries the polling cadence and the confirmation thresholds. Defaults match a
//! network that treats six confirmations as final and polls every ten seconds. Deployments can
//! override every knob through environment variables (a `.env` file is honoured).

use crate::tracker::TrackerError;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_FINALITY_CONFIRMATIONS: u64 = 6;
pub const DEFAULT_PARTIAL_CONFIRMATIONS: u64 = 3;

/// Exponential growth of the poll delay across consecutive failed fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureBackoff {
	/// Upper bound for the delay between polls
	pub max_interval: Duration,
}

/// Configuration for a tracker
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
	/// Delay between the end of one automatic fetch and the start of the next
	pub poll_interval: Duration,
	/// Confirmations at which a verified transaction is final
	pub finality_confirmations: u64,
	/// Confirmations at which a verified transaction counts as partially confirmed
	pub partial_confirmations: u64,
	/// Stop automatic polling after this many applied fetches; `None` polls until terminal
	pub max_attempts: Option<u32>,
	/// Grow the delay while the provider keeps failing; `None` keeps a fixed cadence
	pub failure_backoff: Option<FailureBackoff>,
}

impl Default for TrackerConfig {
	fn default() -> Self {
		Self {
			poll_interval: DEFAULT_POLL_INTERVAL,
			finality_confirmations: DEFAULT_FINALITY_CONFIRMATIONS,
			partial_confirmations: DEFAULT_PARTIAL_CONFIRMATIONS,
			max_attempts: None,
			failure_backoff: None,
		}
	}
}

impl TrackerConfig {
	pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
		self.poll_interval = poll_interval;
		self
	}

	pub fn with_thresholds(mut self, partial: u64, finality: u64) -> Self {
		self.partial_confirmations = partial;
		self.finality_confirmations = finality;
		self
	}

	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = Some(max_attempts);
		self
	}

	pub fn with_failure_backoff(mut self, max_interval: Duration) -> Self {
		self.failure_backoff = Some(FailureBackoff { max_interval });
		self
	}

	/// Check that the thresholds and cadence describe a usable policy.
	pub fn validate(&self) -> Result<(), TrackerError> {
		if self.poll_interval.is_zero() {
			return Err(TrackerError::InvalidConfig(
				"poll interval must be greater than zero".to_string(),
			));
		}
		if self.finality_confirmations == 0 {
			return Err(TrackerError::InvalidConfig(
				"finality confirmations must be greater than zero".to_string(),
			));
		}
		if self.partial_confirmations > self.finality_confirmations {
			return Err(TrackerError::InvalidConfig(format!(
				"partial confirmations ({}) exceed finality confirmations ({})",
				self.partial_confirmations, self.finality_confirmations
			)));
		}
		if self.max_attempts == Some(0) {
			return Err(TrackerError::InvalidConfig(
				"max attempts must be greater than zero".to_string(),
			));
		}
		if let Some(backoff) = &self.failure_backoff {
			if backoff.max_interval < self.poll_interval {
				return Err(TrackerError::InvalidConfig(
					"failure backoff ceiling is shorter than the poll interval".to_string(),
				));
			}
		}
		Ok(())
	}

	/// Build a configuration from `TRACKER_*` environment variables.
	///
	/// Unset variables keep their defaults; unparsable ones are reported and ignored.
	/// Reads the process environment only; loading a `.env` file is left to the binary.
	pub fn from_env() -> Result<Self, TrackerError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TrackerError> {
		let parse = |key: &str| -> Option<u64> {
			let raw = lookup(key)?;
			match raw.trim().parse::<u64>() {
				Ok(value) => Some(value),
				Err(e) => {
					warn!("Ignoring {}={:?}: {}", key, raw, e);
					None
				}
			}
		};

		let mut config = Self::default();
		if let Some(ms) = parse("TRACKER_POLL_INTERVAL_MS") {
			config.poll_interval = Duration::from_millis(ms);
		}
		if let Some(n) = parse("TRACKER_FINALITY_CONFIRMATIONS") {
			config.finality_confirmations = n;
		}
		if let Some(n) = parse("TRACKER_PARTIAL_CONFIRMATIONS") {
			config.partial_confirmations = n;
		}
		if let Some(n) = parse("TRACKER_MAX_ATTEMPTS") {
			config.max_attempts = Some(u32::try_from(n).unwrap_or(u32::MAX));
		}
		if let Some(ms) = parse("TRACKER_FAILURE_BACKOFF_MAX_MS") {
			config.failure_backoff = Some(FailureBackoff {
				max_interval: Duration::from_millis(ms),
			});
		}

		config.validate()?;
		Ok(config)
	}
}
