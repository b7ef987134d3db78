//! Optimistic mutation engine
//!
//! Each domain hook owns a `HookState` (what the UI renders) and runs
//! every mutation through the same contract: apply the patch locally
//! with no await in between, then try the remote call, and either
//! commit the canonical server state, roll back to the pre-mutation
//! snapshot, or queue the mutation for offline replay.

pub mod business_day;
pub mod cashier;
pub mod orders;

use std::sync::Arc;

use tokio::sync::watch;

use crate::bus::EventBus;
use crate::cache::RequestCache;
use crate::connectivity::ConnectivitySignal;
use crate::notify::Notifier;
use crate::store::LocalStore;

pub use business_day::BusinessDayHook;
pub use cashier::CashierHook;
pub use orders::OrderHook;

/// What the UI sees: data plus loading/error flags
#[derive(Debug, Clone)]
pub struct HookValue<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for HookValue<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

/// Watchable hook state
///
/// All writes are synchronous sends on a watch channel: a mutation's
/// optimistic apply is visible to subscribers before any await point.
#[derive(Debug)]
pub struct HookState<T> {
    tx: watch::Sender<HookValue<T>>,
}

impl<T: Clone> HookState<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(HookValue::default());
        Self { tx }
    }

    /// Current value (cloned)
    pub fn get(&self) -> HookValue<T> {
        self.tx.borrow().clone()
    }

    /// Current data, if any
    pub fn data(&self) -> Option<T> {
        self.tx.borrow().data.clone()
    }

    pub fn set_data(&self, data: Option<T>) {
        self.tx.send_modify(|value| {
            value.data = data;
            value.error = None;
        });
    }

    pub fn set_loading(&self, loading: bool) {
        self.tx.send_modify(|value| value.loading = loading);
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.tx.send_modify(|value| value.error = Some(error));
    }

    /// In-place update of the whole value
    pub fn update(&self, f: impl FnOnce(&mut HookValue<T>)) {
        self.tx.send_modify(f);
    }

    /// Observe state changes (UI components)
    pub fn subscribe(&self) -> watch::Receiver<HookValue<T>> {
        self.tx.subscribe()
    }
}

impl<T: Clone> Default for HookState<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of one mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    /// Optimistic state applied, remote outcome unknown
    Pending,
    /// Server confirmed; canonical state merged
    Committed,
    /// Reverted to the pre-mutation snapshot
    RolledBack,
    /// Kept locally, waiting for offline replay
    Queued,
}

/// How a mutation ended (when it did not fail outright)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Server confirmed the change
    Confirmed,
    /// Change queued for replay; local state is authoritative for now
    Queued,
}

/// Per-mutation state machine
///
/// Captures the pre-mutation snapshot as an immutable value at entry.
/// If the guard is dropped while still `Pending` (early return, `?`),
/// the snapshot is restored, so no exit path can leave half-applied
/// optimistic state behind.
#[must_use = "an unresolved guard rolls back on drop"]
pub struct MutationGuard<'a, T: Clone> {
    state: &'a HookState<T>,
    snapshot: Option<T>,
    phase: MutationPhase,
}

impl<'a, T: Clone> MutationGuard<'a, T> {
    /// Capture the snapshot before the optimistic apply
    pub fn begin(state: &'a HookState<T>) -> Self {
        Self {
            snapshot: state.data(),
            state,
            phase: MutationPhase::Pending,
        }
    }

    /// Pre-mutation value
    pub fn snapshot(&self) -> Option<&T> {
        self.snapshot.as_ref()
    }

    pub fn phase(&self) -> MutationPhase {
        self.phase
    }

    /// Server confirmed; keep whatever the caller merged into state
    pub fn commit(mut self) {
        self.phase = MutationPhase::Committed;
    }

    /// Mutation parked in the offline queue; keep the local state
    pub fn queued(mut self) {
        self.phase = MutationPhase::Queued;
    }

    /// Restore the snapshot exactly
    pub fn rollback(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        self.state.set_data(self.snapshot.clone());
        self.phase = MutationPhase::RolledBack;
    }
}

impl<T: Clone> Drop for MutationGuard<'_, T> {
    fn drop(&mut self) {
        if self.phase == MutationPhase::Pending {
            self.restore();
        }
    }
}

/// Shared collaborators every domain hook needs
#[derive(Clone)]
pub struct HookContext {
    pub store: Arc<dyn LocalStore>,
    pub cache: Arc<RequestCache>,
    pub bus: EventBus,
    pub connectivity: ConnectivitySignal,
    pub notifier: Notifier,
}

impl HookContext {
    /// Persist a record, degrading to a warning on store failure:
    /// the store is itself used to report failures, so a broken store
    /// must not fail the mutation that tried to use it.
    pub(crate) async fn persist<R: serde::Serialize>(&self, collection: &str, record: &R) {
        if let Err(e) = crate::store::put_as(&self.store, collection, record).await {
            tracing::warn!(collection = %collection, error = %e, "Local persist failed, dropping write");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimistic_apply_is_visible_before_resolution() {
        let state: HookState<i32> = HookState::new();
        state.set_data(Some(100));

        let guard = MutationGuard::begin(&state);
        state.set_data(Some(70));

        // still pending, but subscribers already see the new value
        assert_eq!(state.data(), Some(70));
        assert_eq!(guard.phase(), MutationPhase::Pending);
        guard.commit();
        assert_eq!(state.data(), Some(70));
    }

    #[test]
    fn test_rollback_restores_snapshot_exactly() {
        let state: HookState<i32> = HookState::new();
        state.set_data(Some(100));

        let guard = MutationGuard::begin(&state);
        state.set_data(Some(70));
        guard.rollback();

        assert_eq!(state.data(), Some(100));
    }

    #[test]
    fn test_pending_guard_rolls_back_on_drop() {
        let state: HookState<i32> = HookState::new();
        state.set_data(Some(100));

        {
            let _guard = MutationGuard::begin(&state);
            state.set_data(Some(70));
            // dropped while pending, e.g. an early `?` return
        }
        assert_eq!(state.data(), Some(100));
    }

    #[test]
    fn test_queued_guard_keeps_local_state() {
        let state: HookState<i32> = HookState::new();
        state.set_data(Some(100));

        let guard = MutationGuard::begin(&state);
        state.set_data(Some(70));
        guard.queued();

        assert_eq!(state.data(), Some(70));
    }

    #[test]
    fn test_second_mutation_stacks_on_optimistic_state() {
        let state: HookState<i32> = HookState::new();
        state.set_data(Some(100));

        let first = MutationGuard::begin(&state);
        state.set_data(Some(70));

        // second mutation begins while the first is still in flight:
        // its snapshot is the optimistic 70, not the last-synced 100
        let second = MutationGuard::begin(&state);
        assert_eq!(second.snapshot(), Some(&70));
        state.set_data(Some(50));

        second.rollback();
        assert_eq!(state.data(), Some(70));
        first.commit();
    }
}
