//! Scripted in-memory provider used by the tracker tests.

use super::provider::VerificationProvider;
use super::types::{ProviderError, Snapshot};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Provider that replays a per-transaction script of responses.
///
/// Each call pops the next scripted response; the last one is repeated once the script is
/// exhausted. Unknown ids answer `NotFound`. A gated id blocks every call until a permit is
/// released through [`ScriptedProvider::release`].
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Result<Snapshot, ProviderError>>>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(
        self,
        transaction_id: &str,
        responses: Vec<Result<Snapshot, ProviderError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(transaction_id.to_string(), responses.into());
        self
    }

    pub fn gated(self, transaction_id: &str) -> Self {
        self.gates
            .lock()
            .unwrap()
            .insert(transaction_id.to_string(), Arc::new(Semaphore::new(0)));
        self
    }

    /// Let one blocked call for `transaction_id` proceed.
    pub fn release(&self, transaction_id: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(transaction_id) {
            gate.add_permits(1);
        }
    }

    pub fn calls_for(&self, transaction_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(transaction_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    fn next_response(&self, transaction_id: &str) -> Result<Snapshot, ProviderError> {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(transaction_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue.front().cloned().unwrap(),
            _ => Err(ProviderError::not_found(format!(
                "no script for {}",
                transaction_id
            ))),
        }
    }
}

#[async_trait]
impl VerificationProvider for ScriptedProvider {
    async fn fetch_verification(&self, transaction_id: &str) -> Result<Snapshot, ProviderError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(transaction_id.to_string())
            .or_default() += 1;
        self.total_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gates.lock().unwrap().get(transaction_id).cloned();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
        }

        self.next_response(transaction_id)
    }

    fn name(&self) -> &'static str {
        "ScriptedProvider"
    }
}

/// Verified snapshot with the given confirmation count.
pub fn confirmed(transaction_id: &str, confirmations: u64) -> Result<Snapshot, ProviderError> {
    Ok(Snapshot::new(transaction_id)
        .with_verified(true)
        .with_confirmations(confirmations))
}
