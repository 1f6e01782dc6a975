//!
//! HTTP client for a transaction verification API.
//!
//! This module provides an async client that asks a verification service about a single
//! transaction and turns the JSON answer into a `Snapshot`. All methods are async and designed
//! for use with Tokio.

use super::provider::VerificationProvider;
use super::types::*;
use crate::utils::truncate_id;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, instrument};

/// Default per-request timeout for verification queries.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Verification API client
#[derive(Clone)]
pub struct HttpVerificationClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the verification API.
	base_url: Url,
}

impl HttpVerificationClient {
	/// Create a new verification client.
	///
	/// # Arguments
	/// * `base_url` - The root of the verification API.
	/// * `timeout` - Per-request timeout.
	///
	/// # Returns
	/// A new `HttpVerificationClient`, or a `ProviderError` if the base URL is not a valid
	/// hierarchical URL or the HTTP client cannot be built.
	pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self, ProviderError> {
		let base_url = Url::parse(base_url.as_ref())
			.map_err(|e| ProviderError::unknown(format!("Invalid verification API URL: {}", e)))?;
		if base_url.cannot_be_a_base() {
			return Err(ProviderError::unknown(format!(
				"Verification API URL cannot be a base: {}",
				base_url
			)));
		}

		let http_client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| ProviderError::unknown(format!("Failed to create HTTP client: {}", e)))?;

		Ok(Self {
			http_client,
			base_url,
		})
	}

	/// URL of the verification resource for one transaction.
	///
	/// The id is pushed as a single percent-encoded path segment.
	fn verification_url(&self, transaction_id: &str) -> Url {
		let mut url = self.base_url.clone();
		if let Ok(mut segments) = url.path_segments_mut() {
			segments
				.pop_if_empty()
				.extend(["transactions", transaction_id, "verification"]);
		}
		url
	}
}

#[async_trait]
impl VerificationProvider for HttpVerificationClient {
	#[instrument(skip(self), fields(tx = %truncate_id(transaction_id)))]
	async fn fetch_verification(&self, transaction_id: &str) -> Result<Snapshot, ProviderError> {
		let url = self.verification_url(transaction_id);
		debug!("Querying verification API: {}", url);

		let response = self
			.http_client
			.get(url)
			.header("Accept", "application/json")
			.send()
			.await?;

		match response.status() {
			status if status.is_success() => {}
			StatusCode::NOT_FOUND => {
				return Err(ProviderError::not_found(format!(
					"Transaction {} is unknown to the verification API",
					transaction_id
				)));
			}
			StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
				return Err(ProviderError::timeout(format!(
					"HTTP error: {}",
					response.status()
				)));
			}
			status => {
				return Err(ProviderError::unknown(format!("HTTP error: {}", status)));
			}
		}

		let body = response.bytes().await?;
		let payload: VerificationResponse = serde_json::from_slice(&body)?;

		debug!(
			verified = ?payload.verified,
			confirmations = ?payload.confirmations,
			"Received verification payload"
		);

		Ok(payload.into_snapshot(transaction_id))
	}

	fn name(&self) -> &'static str {
		"HttpVerificationClient"
	}
}
