//! Nonce coordinator for signed request submission.
//!
//! Keeps one [`NonceSlot`] per configured API key index, hands out nonces
//! round-robin across slots and reclaims a reservation when the request that
//! used it failed before the venue accepted it.
//!
//! # Locking
//!
//! Slot state and the rotation cursor live behind a single mutex. Draws,
//! rollbacks and slot writes hold it only for in-memory updates; remote
//! fetches run with the lock released.
//!
//! # Single-flight initialization
//!
//! The first `initialize` caller stores a shared handle to the pending
//! attempt; concurrent callers await the same handle and observe the same
//! outcome. The handle is cleared once the attempt completes, so a failed
//! attempt can be retried from scratch.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{try_join_all, FutureExt, Shared};
use lighter_telemetry::Metrics;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{NonceError, NonceResult};
use crate::slot::{NonceSlot, SlotSnapshot};
use crate::source::{BoxFuture, DynNonceSource};
use crate::types::{AccountIndex, ApiKeyIndex, DrawnNonce, Nonce};

type InitFuture = Shared<BoxFuture<'static, NonceResult<()>>>;

/// A pending initialization attempt.
struct InitFlight {
    /// Attempt number, used to clear only the handle this caller joined.
    id: u64,
    /// Whether the attempt refetches every slot.
    force: bool,
    future: InitFuture,
}

#[derive(Default)]
struct FlightState {
    current: Option<InitFlight>,
    seq: u64,
}

/// Mutable state guarded by the coordinator lock.
struct SlotTable {
    slots: HashMap<ApiKeyIndex, NonceSlot>,
    /// Offset into `api_key_indices` of the next rotating draw.
    cursor: usize,
    /// Set when an initialization attempt completed with every slot populated.
    ready: bool,
}

/// State shared with in-flight initialization futures.
struct CoordinatorState {
    account_index: AccountIndex,
    /// Deduplicated, ascending.
    api_key_indices: Vec<ApiKeyIndex>,
    source: DynNonceSource,
    table: Mutex<SlotTable>,
}

/// Issues per-credential nonces for one account.
///
/// # Guarantees
/// - Draws from one slot are strictly increasing by one, absent rollback
/// - Rotating draws visit slots in ascending API key index order
/// - Thread-safe for concurrent access; draws never block on I/O
pub struct NonceCoordinator {
    state: Arc<CoordinatorState>,
    flight: Mutex<FlightState>,
}

impl NonceCoordinator {
    /// Creates a coordinator for `account_index` rotating over `api_key_indices`.
    ///
    /// Indices are deduplicated and sorted. No remote call is made.
    ///
    /// # Errors
    /// Returns `NonceError::Configuration` if `api_key_indices` is empty.
    pub fn new(
        account_index: AccountIndex,
        api_key_indices: impl IntoIterator<Item = ApiKeyIndex>,
        source: DynNonceSource,
    ) -> NonceResult<Self> {
        let mut indices: Vec<ApiKeyIndex> = api_key_indices.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();

        if indices.is_empty() {
            return Err(NonceError::Configuration(
                "nonce coordinator requires at least one api key index".to_string(),
            ));
        }

        Ok(Self {
            state: Arc::new(CoordinatorState {
                account_index,
                api_key_indices: indices,
                source,
                table: Mutex::new(SlotTable {
                    slots: HashMap::new(),
                    cursor: 0,
                    ready: false,
                }),
            }),
            flight: Mutex::new(FlightState::default()),
        })
    }

    /// Account whose slots are tracked.
    #[must_use]
    pub fn account_index(&self) -> AccountIndex {
        self.state.account_index
    }

    /// Configured API key indices in rotation order.
    #[must_use]
    pub fn api_key_indices(&self) -> &[ApiKeyIndex] {
        &self.state.api_key_indices
    }

    /// Whether the last initialization succeeded with every slot populated.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.table.lock().ready
    }

    /// Fetches starting nonces from the remote source.
    ///
    /// With `force = false` only slots without state are fetched. With
    /// `force = true` every slot is refetched, discarding in-memory progress,
    /// and the rotation cursor restarts at the lowest API key index.
    ///
    /// Concurrent callers share one attempt. A forced call that arrives
    /// while a non-forced attempt is pending runs after it.
    ///
    /// # Errors
    /// Returns `NonceError::RemoteFetch` if any slot fetch fails. Slots
    /// fetched before the failure keep their new state, but the coordinator
    /// does not report ready.
    pub async fn initialize(&self, force: bool) -> NonceResult<()> {
        let (id, future) = self.join_or_start(force);
        let outcome = future.await;

        let mut flight = self.flight.lock();
        if flight.current.as_ref().is_some_and(|f| f.id == id) {
            flight.current = None;
        }
        outcome
    }

    /// Draws the next nonce from the slot at the rotation cursor.
    ///
    /// The cursor advances even if the selected slot has no state, so one
    /// missing slot does not stall rotation.
    ///
    /// # Errors
    /// - `NonceError::NotInitialized` if no slot has been populated
    /// - `NonceError::UnknownSlot` if the selected slot has no state
    pub fn draw(&self) -> NonceResult<DrawnNonce> {
        let mut guard = self.state.table.lock();
        let table = &mut *guard;
        if table.slots.is_empty() {
            return Err(NonceError::NotInitialized);
        }

        let indices = &self.state.api_key_indices;
        let api_key_index = indices[table.cursor % indices.len()];
        table.cursor = (table.cursor + 1) % indices.len();

        let slot = table
            .slots
            .get_mut(&api_key_index)
            .ok_or(NonceError::UnknownSlot(api_key_index))?;
        let nonce = slot.issue()?;
        drop(guard);

        Metrics::nonce_drawn(&api_key_index.to_string(), "rotating");
        Ok(DrawnNonce {
            api_key_index,
            nonce,
        })
    }

    /// Draws the next nonce from a specific slot, leaving the cursor alone.
    ///
    /// # Errors
    /// - `NonceError::NotInitialized` if no slot has been populated
    /// - `NonceError::UnknownSlot` if `api_key_index` has no state
    pub fn draw_for(&self, api_key_index: ApiKeyIndex) -> NonceResult<DrawnNonce> {
        let mut table = self.state.table.lock();
        if table.slots.is_empty() {
            return Err(NonceError::NotInitialized);
        }

        let slot = table
            .slots
            .get_mut(&api_key_index)
            .ok_or(NonceError::UnknownSlot(api_key_index))?;
        let nonce = slot.issue()?;
        drop(table);

        Metrics::nonce_drawn(&api_key_index.to_string(), "direct");
        Ok(DrawnNonce {
            api_key_index,
            nonce,
        })
    }

    /// Reclaims the most recent draw from a slot after a pre-acceptance failure.
    ///
    /// The next draw from that slot returns the same nonce again. No-op if
    /// the slot is unknown or nothing is outstanding.
    ///
    /// Must not be called once the venue has accepted the signed request.
    pub fn acknowledge_failure(&self, api_key_index: ApiKeyIndex) {
        let reclaimed = self
            .state
            .table
            .lock()
            .slots
            .get_mut(&api_key_index)
            .and_then(NonceSlot::rollback);

        match reclaimed {
            Some(nonce) => {
                warn!(
                    account_index = %self.state.account_index,
                    %api_key_index,
                    %nonce,
                    "Nonce reservation rolled back"
                );
                Metrics::nonce_rolled_back(&api_key_index.to_string());
            }
            None => {
                debug!(%api_key_index, "No outstanding nonce to roll back");
            }
        }
    }

    /// Refetches one slot from the remote source, replacing its state.
    ///
    /// Other slots and the rotation cursor are untouched.
    ///
    /// # Errors
    /// - `NonceError::UnknownSlot` if `api_key_index` is not configured
    /// - `NonceError::RemoteFetch` if the fetch fails; prior state is kept
    pub async fn refresh(&self, api_key_index: ApiKeyIndex) -> NonceResult<()> {
        if !self.state.is_configured(api_key_index) {
            return Err(NonceError::UnknownSlot(api_key_index));
        }
        self.state.fetch_slot(api_key_index).await
    }

    /// Snapshot of every configured slot in rotation order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        let table = self.state.table.lock();
        self.state
            .api_key_indices
            .iter()
            .map(|idx| {
                table
                    .slots
                    .get(idx)
                    .map_or_else(|| SlotSnapshot::unpopulated(*idx), NonceSlot::snapshot)
            })
            .collect()
    }

    /// Joins the pending attempt or starts a new one.
    fn join_or_start(&self, force: bool) -> (u64, InitFuture) {
        let mut flight = self.flight.lock();

        if let Some(current) = flight.current.as_ref() {
            if current.force || !force {
                debug!(
                    account_index = %self.state.account_index,
                    flight = current.id,
                    "Joining in-flight nonce initialization"
                );
                return (current.id, current.future.clone());
            }
        }

        // A forced attempt queues behind a pending non-forced one.
        let previous = flight.current.take().map(|f| f.future);
        flight.seq += 1;
        let id = flight.seq;

        let state = Arc::clone(&self.state);
        let future: BoxFuture<'static, NonceResult<()>> = Box::pin(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            state.populate(force).await
        });
        let future = future.shared();

        flight.current = Some(InitFlight {
            id,
            force,
            future: future.clone(),
        });
        (id, future)
    }
}

impl CoordinatorState {
    fn is_configured(&self, api_key_index: ApiKeyIndex) -> bool {
        self.api_key_indices.binary_search(&api_key_index).is_ok()
    }

    /// Fetches missing slots (or all of them when forced).
    async fn populate(&self, force: bool) -> NonceResult<()> {
        let pending: Vec<ApiKeyIndex> = {
            let mut table = self.table.lock();
            if force {
                table.ready = false;
            }
            self.api_key_indices
                .iter()
                .copied()
                .filter(|idx| force || !table.slots.contains_key(idx))
                .collect()
        };

        let result = try_join_all(pending.iter().map(|&idx| self.fetch_slot(idx))).await;

        let ready = {
            let mut table = self.table.lock();
            if result.is_ok() {
                if force {
                    table.cursor = 0;
                }
                table.ready = self
                    .api_key_indices
                    .iter()
                    .all(|idx| table.slots.contains_key(idx));
            }
            table.ready
        };
        Metrics::nonce_ready(&self.account_index.to_string(), ready);

        result?;
        info!(
            account_index = %self.account_index,
            fetched = pending.len(),
            slots = self.api_key_indices.len(),
            force,
            "Nonce coordinator initialized"
        );
        Ok(())
    }

    /// Fetches one slot and replaces its state.
    async fn fetch_slot(&self, api_key_index: ApiKeyIndex) -> NonceResult<()> {
        let nonce = self.fetch(api_key_index).await?;
        self.table
            .lock()
            .slots
            .insert(api_key_index, NonceSlot::new(api_key_index, nonce));

        debug!(
            account_index = %self.account_index,
            %api_key_index,
            %nonce,
            "Nonce slot refreshed"
        );
        Metrics::nonce_slot_refreshed(&api_key_index.to_string());
        Ok(())
    }

    async fn fetch(&self, api_key_index: ApiKeyIndex) -> NonceResult<Nonce> {
        self.source
            .next_nonce(self.account_index, api_key_index)
            .await
            .map_err(|source| {
                warn!(
                    account_index = %self.account_index,
                    %api_key_index,
                    error = %source,
                    "Remote nonce fetch failed"
                );
                Metrics::nonce_fetch_failed(&api_key_index.to_string());
                NonceError::RemoteFetch {
                    api_key_index,
                    source,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::source::MockNonceSource;

    const ACCOUNT: AccountIndex = AccountIndex::new(42);

    fn keys(raw: &[u8]) -> Vec<ApiKeyIndex> {
        raw.iter().copied().map(ApiKeyIndex::new).collect()
    }

    fn coordinator(raw: &[u8], start: u128) -> (NonceCoordinator, Arc<MockNonceSource>) {
        let source = Arc::new(MockNonceSource::new(start));
        let coordinator = NonceCoordinator::new(ACCOUNT, keys(raw), source.clone()).unwrap();
        (coordinator, source)
    }

    #[test]
    fn test_empty_slot_set_is_configuration_error() {
        let source = Arc::new(MockNonceSource::new(1));
        let result = NonceCoordinator::new(ACCOUNT, Vec::<ApiKeyIndex>::new(), source.clone());
        assert!(matches!(result, Err(NonceError::Configuration(_))));
        assert!(source.calls().is_empty());
    }

    #[test]
    fn test_indices_are_deduplicated_and_sorted() {
        let (coordinator, _) = coordinator(&[7, 3, 7, 5, 3], 1);
        assert_eq!(coordinator.api_key_indices(), keys(&[3, 5, 7]).as_slice());
        assert_eq!(coordinator.account_index(), ACCOUNT);
    }

    #[test]
    fn test_draw_before_initialize_fails() {
        let (coordinator, _) = coordinator(&[1, 2], 1);
        assert_eq!(coordinator.draw(), Err(NonceError::NotInitialized));
        assert_eq!(
            coordinator.draw_for(ApiKeyIndex::new(1)),
            Err(NonceError::NotInitialized)
        );
        assert!(!coordinator.is_ready());
    }

    #[tokio::test]
    async fn test_rotation_visits_slots_in_ascending_order() {
        let (coordinator, _) = coordinator(&[9, 2, 5], 10);
        coordinator.initialize(false).await.unwrap();
        assert!(coordinator.is_ready());

        let order: Vec<u8> = (0..9)
            .map(|_| coordinator.draw().unwrap().api_key_index.value())
            .collect();
        assert_eq!(order, vec![2, 5, 9, 2, 5, 9, 2, 5, 9]);
    }

    #[tokio::test]
    async fn test_single_slot_draws_increase_by_one() {
        let (coordinator, _) = coordinator(&[4], 1_000);
        coordinator.initialize(false).await.unwrap();

        let mut prev = coordinator.draw().unwrap().nonce;
        for _ in 0..100 {
            let next = coordinator.draw().unwrap().nonce;
            assert_eq!(next.value(), prev.value() + 1);
            prev = next;
        }
    }

    #[tokio::test]
    async fn test_draw_for_does_not_move_cursor() {
        let (coordinator, _) = coordinator(&[1, 2, 3], 50);
        coordinator.initialize(false).await.unwrap();

        assert_eq!(coordinator.draw().unwrap().api_key_index.value(), 1);
        let direct = coordinator.draw_for(ApiKeyIndex::new(3)).unwrap();
        assert_eq!(direct.nonce, Nonce::new(50));
        assert_eq!(coordinator.draw().unwrap().api_key_index.value(), 2);
        assert_eq!(
            coordinator.draw().unwrap(),
            DrawnNonce {
                api_key_index: ApiKeyIndex::new(3),
                nonce: Nonce::new(51),
            }
        );
    }

    #[tokio::test]
    async fn test_draw_for_unconfigured_slot() {
        let (coordinator, _) = coordinator(&[1], 50);
        coordinator.initialize(false).await.unwrap();
        assert_eq!(
            coordinator.draw_for(ApiKeyIndex::new(8)),
            Err(NonceError::UnknownSlot(ApiKeyIndex::new(8)))
        );
    }

    #[tokio::test]
    async fn test_acknowledge_failure_reissues_nonce() {
        let (coordinator, _) = coordinator(&[1, 2], 100);
        coordinator.initialize(false).await.unwrap();

        let first = coordinator.draw().unwrap();
        coordinator.acknowledge_failure(first.api_key_index);
        let again = coordinator.draw_for(first.api_key_index).unwrap();
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn test_acknowledge_failure_without_outstanding_is_noop() {
        let (coordinator, _) = coordinator(&[1], 100);
        coordinator.initialize(false).await.unwrap();

        coordinator.acknowledge_failure(ApiKeyIndex::new(1));
        coordinator.acknowledge_failure(ApiKeyIndex::new(99));
        assert_eq!(coordinator.snapshot()[0].next, Some(Nonce::new(100)));

        coordinator.draw().unwrap();
        coordinator.acknowledge_failure(ApiKeyIndex::new(1));
        coordinator.acknowledge_failure(ApiKeyIndex::new(1));
        assert_eq!(coordinator.snapshot()[0].next, Some(Nonce::new(100)));
        assert_eq!(coordinator.draw().unwrap().nonce, Nonce::new(100));
    }

    #[tokio::test]
    async fn test_non_forced_initialize_fetches_only_missing_slots() {
        let (coordinator, source) = coordinator(&[1, 2], 100);
        coordinator.initialize(false).await.unwrap();
        coordinator.draw().unwrap();

        coordinator.initialize(false).await.unwrap();
        assert_eq!(source.calls().len(), 2);
        // In-memory progress survives.
        assert_eq!(coordinator.draw_for(ApiKeyIndex::new(1)).unwrap().nonce, Nonce::new(101));
    }

    #[tokio::test]
    async fn test_forced_initialize_discards_progress_and_resets_cursor() {
        let (coordinator, source) = coordinator(&[3, 7], 100);
        coordinator.initialize(false).await.unwrap();
        coordinator.draw().unwrap();
        coordinator.draw().unwrap();
        coordinator.draw().unwrap();

        source.set_nonce(ApiKeyIndex::new(3), 500);
        source.set_nonce(ApiKeyIndex::new(7), 900);
        coordinator.initialize(true).await.unwrap();

        assert_eq!(source.calls().len(), 4);
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot[0].next, Some(Nonce::new(500)));
        assert_eq!(snapshot[0].last_issued, None);
        assert_eq!(snapshot[1].next, Some(Nonce::new(900)));

        let drawn = coordinator.draw().unwrap();
        assert_eq!(drawn.api_key_index, ApiKeyIndex::new(3));
        assert_eq!(drawn.nonce, Nonce::new(500));
    }

    #[tokio::test]
    async fn test_failed_initialize_is_not_ready_and_retryable() {
        let (coordinator, source) = coordinator(&[3, 7], 100);
        source.set_failure(
            ApiKeyIndex::new(7),
            SourceError::Transport("connection refused".to_string()),
        );

        let err = coordinator.initialize(false).await.unwrap_err();
        assert_eq!(
            err,
            NonceError::RemoteFetch {
                api_key_index: ApiKeyIndex::new(7),
                source: SourceError::Transport("connection refused".to_string()),
            }
        );
        assert!(!coordinator.is_ready());

        source.clear_response(ApiKeyIndex::new(7));
        coordinator.initialize(false).await.unwrap();
        assert!(coordinator.is_ready());
        assert_eq!(source.call_count(ApiKeyIndex::new(3)), 1);
        assert_eq!(source.call_count(ApiKeyIndex::new(7)), 2);
    }

    #[tokio::test]
    async fn test_forced_initialize_failure_clears_ready() {
        let (coordinator, source) = coordinator(&[1, 2], 100);
        coordinator.initialize(false).await.unwrap();
        assert!(coordinator.is_ready());

        source.set_failure(
            ApiKeyIndex::new(2),
            SourceError::Venue {
                code: 500,
                message: "internal".to_string(),
            },
        );
        assert!(coordinator.initialize(true).await.is_err());
        assert!(!coordinator.is_ready());
    }

    #[tokio::test]
    async fn test_draw_skips_past_missing_slot() {
        let (coordinator, source) = coordinator(&[1, 2], 100);
        source.set_failure(
            ApiKeyIndex::new(2),
            SourceError::Decode("bad body".to_string()),
        );
        assert!(coordinator.initialize(false).await.is_err());
        assert!(!coordinator.is_ready());

        assert_eq!(
            coordinator.draw().unwrap().api_key_index,
            ApiKeyIndex::new(1)
        );
        assert_eq!(
            coordinator.draw(),
            Err(NonceError::UnknownSlot(ApiKeyIndex::new(2)))
        );
        assert_eq!(coordinator.draw().unwrap().nonce, Nonce::new(101));
    }

    #[tokio::test]
    async fn test_refresh_replaces_single_slot() {
        let (coordinator, source) = coordinator(&[1, 2], 100);
        coordinator.initialize(false).await.unwrap();
        coordinator.draw().unwrap();
        coordinator.draw().unwrap();

        source.set_nonce(ApiKeyIndex::new(2), 777);
        coordinator.refresh(ApiKeyIndex::new(2)).await.unwrap();

        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot[0].next, Some(Nonce::new(101)));
        assert_eq!(snapshot[0].last_issued, Some(Nonce::new(100)));
        assert_eq!(snapshot[1].next, Some(Nonce::new(777)));
        assert_eq!(snapshot[1].last_issued, None);

        // Cursor untouched: slot 1 is next in rotation.
        assert_eq!(coordinator.draw().unwrap().api_key_index, ApiKeyIndex::new(1));
    }

    #[tokio::test]
    async fn test_refresh_unconfigured_slot() {
        let (coordinator, source) = coordinator(&[1], 100);
        assert_eq!(
            coordinator.refresh(ApiKeyIndex::new(5)).await,
            Err(NonceError::UnknownSlot(ApiKeyIndex::new(5)))
        );
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_prior_state() {
        let (coordinator, source) = coordinator(&[1], 100);
        coordinator.initialize(false).await.unwrap();
        coordinator.draw().unwrap();

        source.set_failure(
            ApiKeyIndex::new(1),
            SourceError::Transport("timeout".to_string()),
        );
        assert!(coordinator.refresh(ApiKeyIndex::new(1)).await.is_err());
        assert_eq!(coordinator.snapshot()[0].next, Some(Nonce::new(101)));
    }

    #[test]
    fn test_snapshot_lists_unpopulated_slots() {
        let (coordinator, _) = coordinator(&[2, 1], 100);
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].api_key_index, ApiKeyIndex::new(1));
        assert!(snapshot.iter().all(|s| !s.is_populated()));
    }

    #[test]
    fn test_initialize_from_blocking_context() {
        let (coordinator, source) = coordinator(&[1], 100);
        tokio_test::block_on(coordinator.initialize(false)).unwrap();
        assert_eq!(source.calls().len(), 1);
        assert!(coordinator.is_ready());
    }
}
