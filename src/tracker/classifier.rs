//! Confirmation classification.
//!
//! Maps the latest verification snapshot (and the outcome of the latest fetch) to a discrete
//! `Status` and a display progress ratio. Everything here is pure: the scheduler and the session
//! core decide what to do with the result.

use crate::tracker::config::TrackerConfig;
use crate::tracker::types::Status;
use crate::verification::{ErrorKind, Snapshot};

/// Confirmation thresholds used by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Confirmations needed for `PartiallyConfirmed`
    pub partial: u64,
    /// Confirmations needed for `FullyConfirmed`
    pub finality: u64,
}

impl From<&TrackerConfig> for Thresholds {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            partial: config.partial_confirmations,
            finality: config.finality_confirmations,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&TrackerConfig::default())
    }
}

/// Result of classifying one snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub status: Status,
    pub progress: f64,
}

/// Classify the latest known state of a transaction.
///
/// `snapshot` is the most recent successful snapshot, if any; `error` is the failure of the
/// latest fetch, if it failed. A failed fetch only matters while no snapshot exists: a known good
/// snapshot keeps being classified on its own.
pub fn classify(
    snapshot: Option<&Snapshot>,
    error: Option<ErrorKind>,
    thresholds: &Thresholds,
) -> Classification {
    let Some(snapshot) = snapshot else {
        let status = if error.is_some() {
            Status::FetchFailed
        } else {
            Status::Pending
        };
        return Classification {
            status,
            progress: 0.0,
        };
    };

    let confirmations = snapshot.confirmations.unwrap_or(0);
    let status = match snapshot.verified {
        Some(false) => Status::NotVerified,
        Some(true) if confirmations >= thresholds.finality => Status::FullyConfirmed,
        Some(true) if confirmations >= thresholds.partial => Status::PartiallyConfirmed,
        Some(true) => Status::Unconfirmed,
        None => Status::Pending,
    };

    Classification {
        status,
        progress: progress_ratio(snapshot.confirmations, thresholds.finality),
    }
}

/// `min(confirmations, finality) / finality`, or 0 when the count is unknown.
pub fn progress_ratio(confirmations: Option<u64>, finality: u64) -> f64 {
    match confirmations {
        Some(count) if finality > 0 => count.min(finality) as f64 / finality as f64,
        _ => 0.0,
    }
}
