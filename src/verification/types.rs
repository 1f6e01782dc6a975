//! Types for verification provider integration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One verification result for one transaction, as returned by a provider.
///
/// A snapshot is never mutated once built. The `with_*` methods consume the value and return a
/// new one, so new provider data always produces a new `Snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// The caller-supplied transaction identifier.
    pub transaction_id: String,
    /// `Some(true)`/`Some(false)` once the provider has decided, `None` while undetermined.
    pub verified: Option<bool>,
    /// Number of blocks appended after the block containing the transaction.
    pub confirmations: Option<u64>,
    /// Opaque hash or identifier of the containing block.
    pub block_reference: Option<String>,
    /// Timestamp of the containing block.
    pub block_timestamp: Option<DateTime<Utc>>,
    /// Link to the transaction on a block explorer.
    pub explorer_url: Option<String>,
}

impl Snapshot {
    /// Create an undetermined snapshot for the given transaction.
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            verified: None,
            confirmations: None,
            block_reference: None,
            block_timestamp: None,
            explorer_url: None,
        }
    }

    pub fn with_verified(mut self, verified: bool) -> Self {
        self.verified = Some(verified);
        self
    }

    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = Some(confirmations);
        self
    }

    pub fn with_block_reference(mut self, block_reference: impl Into<String>) -> Self {
        self.block_reference = Some(block_reference.into());
        self
    }

    pub fn with_block_timestamp(mut self, block_timestamp: DateTime<Utc>) -> Self {
        self.block_timestamp = Some(block_timestamp);
        self
    }

    pub fn with_explorer_url(mut self, explorer_url: impl Into<String>) -> Self {
        self.explorer_url = Some(explorer_url.into());
        self
    }
}

/// Verification payload as served by the HTTP verification API.
///
/// Every field is optional on the wire; a missing field is treated the same as `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationResponse {
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(rename = "blockHash", default)]
    pub block_hash: Option<String>,
    #[serde(rename = "blockTimestamp", default)]
    pub block_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "explorerUrl", default)]
    pub explorer_url: Option<String>,
}

impl VerificationResponse {
    /// Attach the response to the transaction it was requested for.
    pub fn into_snapshot(self, transaction_id: &str) -> Snapshot {
        Snapshot {
            transaction_id: transaction_id.to_string(),
            verified: self.verified,
            confirmations: self.confirmations,
            block_reference: self.block_hash,
            block_timestamp: self.block_timestamp,
            explorer_url: self.explorer_url,
        }
    }
}

/// Category of a failed verification query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The provider did not answer in time.
    Timeout,
    /// The provider does not know the transaction (possibly not indexed yet).
    NotFound,
    /// The request could not be delivered.
    Network,
    /// Anything else, including malformed responses.
    Unknown,
}

impl ErrorKind {
    /// Whether the next scheduled poll should retry after this kind of failure.
    ///
    /// Every kind is retried: `NotFound` because indexing lags behind the ledger, `Unknown`
    /// because it is treated as transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::NotFound | ErrorKind::Network | ErrorKind::Unknown
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not found",
            ErrorKind::Network => "network",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Error returned by a verification provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Provider error ({kind}): {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::timeout(e.to_string())
        } else if e.status() == Some(reqwest::StatusCode::NOT_FOUND) {
            ProviderError::not_found(e.to_string())
        } else if e.is_connect() || e.is_request() {
            ProviderError::network(e.to_string())
        } else {
            ProviderError::unknown(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::unknown(format!("JSON parse error: {}", e))
    }
}
