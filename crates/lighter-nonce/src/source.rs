//! Remote nonce source abstraction.
//!
//! The coordinator never talks to the venue directly. It asks a
//! [`RemoteNonceSource`] for the next nonce the venue will accept, which
//! allows:
//! - Dependency injection for testing
//! - Sharing one HTTP client between several coordinators

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::SourceError;
use crate::types::{AccountIndex, ApiKeyIndex, Nonce};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Lookup of the venue's next accepted nonce for an account/API key pair.
///
/// Implementations must not retry internally; the coordinator surfaces every
/// failure to its caller.
pub trait RemoteNonceSource: Send + Sync {
    /// Fetch the smallest nonce the venue currently accepts.
    fn next_nonce(
        &self,
        account_index: AccountIndex,
        api_key_index: ApiKeyIndex,
    ) -> BoxFuture<'_, Result<Nonce, SourceError>>;
}

/// Arc wrapper for RemoteNonceSource trait objects.
pub type DynNonceSource = Arc<dyn RemoteNonceSource>;

/// In-memory nonce source for tests.
///
/// Returns a per-slot configured value (or failure), falling back to a
/// default nonce, and records every call. A gate can hold fetches in flight
/// until [`release`](Self::release) is called.
#[derive(Debug)]
pub struct MockNonceSource {
    /// Default nonce for slots without an explicit response.
    default_nonce: Nonce,
    /// Per-slot responses.
    responses: Mutex<HashMap<ApiKeyIndex, Result<Nonce, SourceError>>>,
    /// Recorded calls, in order of arrival.
    calls: Mutex<Vec<(AccountIndex, ApiKeyIndex)>>,
    /// Closed semaphore = open gate.
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockNonceSource {
    /// Create a source answering `default_nonce` for every slot.
    pub fn new(default_nonce: u128) -> Self {
        Self {
            default_nonce: Nonce::new(default_nonce),
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    /// Answer `nonce` for `api_key_index` from now on.
    pub fn set_nonce(&self, api_key_index: ApiKeyIndex, nonce: u128) {
        self.responses
            .lock()
            .insert(api_key_index, Ok(Nonce::new(nonce)));
    }

    /// Fail every fetch for `api_key_index` from now on.
    pub fn set_failure(&self, api_key_index: ApiKeyIndex, error: SourceError) {
        self.responses.lock().insert(api_key_index, Err(error));
    }

    /// Drop any explicit response for `api_key_index`.
    pub fn clear_response(&self, api_key_index: ApiKeyIndex) {
        self.responses.lock().remove(&api_key_index);
    }

    /// Hold every subsequent fetch until [`release`](Self::release).
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let held fetches (and all future ones) complete.
    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }

    /// Get recorded calls.
    pub fn calls(&self) -> Vec<(AccountIndex, ApiKeyIndex)> {
        self.calls.lock().clone()
    }

    /// Number of fetches made for one slot.
    pub fn call_count(&self, api_key_index: ApiKeyIndex) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(_, idx)| *idx == api_key_index)
            .count()
    }
}

impl RemoteNonceSource for MockNonceSource {
    fn next_nonce(
        &self,
        account_index: AccountIndex,
        api_key_index: ApiKeyIndex,
    ) -> BoxFuture<'_, Result<Nonce, SourceError>> {
        Box::pin(async move {
            self.calls.lock().push((account_index, api_key_index));

            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                // Only ever resolves once the semaphore is closed.
                let _ = gate.acquire().await;
            }

            self.responses
                .lock()
                .get(&api_key_index)
                .cloned()
                .unwrap_or(Ok(self.default_nonce))
        })
    }
}
