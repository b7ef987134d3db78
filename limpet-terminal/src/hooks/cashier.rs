//! Cashier shift hook
//!
//! Owns the terminal's view of the active shift. Open/close and cash
//! movements follow the optimistic contract; while offline the drawer
//! keeps working and every change lands in the offline queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::ServiceError;
use shared::models::{
    CashMovement, CashMovementKind, CashierShift, EntityKind, OfflineMutation, ShiftClose,
    ShiftOpen, ShiftStatus,
};
use shared::sync::SyncEvent;

use super::{HookContext, HookState, MutationGuard, MutationOutcome};
use crate::bus::{BusEvent, Origin, Subscription};
use crate::error::{MutationError, MutationResult};
use crate::services::CashierService;
use crate::store::collections;

/// Cache key for the active-shift read
pub const ACTIVE_SHIFT_KEY: &str = "cashier:active";

pub struct CashierHook {
    ctx: HookContext,
    service: Arc<dyn CashierService>,
    state: Arc<HookState<CashierShift>>,
    cache_ttl: Duration,
    _sync_sub: Subscription,
}

impl CashierHook {
    pub fn new(ctx: HookContext, service: Arc<dyn CashierService>, cache_ttl: Duration) -> Self {
        let state = Arc::new(HookState::<CashierShift>::new());

        // Reconcile sync events into hook state. While our local copy
        // is unsynced, remote updates stay off screen; a local-origin
        // event for that same shift is a server confirmation (mutation
        // or replay), which settles the copy as synced again.
        let sync_state = state.clone();
        let sync_sub = ctx.bus.subscribe("sync:cashier:update", move |event| {
            let BusEvent::Sync {
                event: SyncEvent::CashierUpdated { shift },
                origin,
            } = event
            else {
                return;
            };
            sync_state.update(|value| {
                let ours = value.data.as_ref().is_some_and(|local| local.id == shift.id);
                let unsynced = value.data.as_ref().is_some_and(|local| !local.synced);
                let adopt = match origin {
                    Origin::Local => ours,
                    Origin::Remote => ours && !unsynced,
                };
                if adopt {
                    value.data = Some(shift.clone());
                }
            });
        });

        Self {
            ctx,
            service,
            state,
            cache_ttl,
            _sync_sub: sync_sub,
        }
    }

    /// Watchable state for the UI
    pub fn state(&self) -> &HookState<CashierShift> {
        &self.state
    }

    /// Restore the last persisted shift after a restart
    pub async fn load_local(&self) {
        match crate::store::get_all_as::<CashierShift>(&self.ctx.store, collections::SHIFTS).await {
            Ok(shifts) => {
                let active = shifts.into_iter().find(CashierShift::is_open);
                if active.is_some() {
                    self.state.set_data(active);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not load local shifts");
            }
        }
    }

    /// Fetch the active shift, de-duplicated and memoized
    ///
    /// Offline the last known local state is served as-is; there is
    /// no mock fallback.
    pub async fn refresh(&self) -> Result<Option<CashierShift>, Arc<ServiceError>> {
        if !self.ctx.connectivity.is_online() {
            return Ok(self.state.data());
        }

        self.state.set_loading(true);
        let service = self.service.clone();
        let result = self
            .ctx
            .cache
            .execute_as::<Option<CashierShift>, _, _>(ACTIVE_SHIFT_KEY, self.cache_ttl, move || {
                async move {
                    let shift = service.active_shift().await?;
                    serde_json::to_value(shift)
                        .map_err(|e| ServiceError::Decode(e.to_string()))
                }
            })
            .await;
        self.state.set_loading(false);

        match result {
            Ok(shift) => {
                self.state.set_data(shift.clone());
                if let Some(ref shift) = shift {
                    self.ctx.persist(collections::SHIFTS, shift).await;
                }
                Ok(shift)
            }
            Err(e) => {
                self.state.set_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Open a shift with a starting float
    pub async fn open_shift(&self, req: ShiftOpen) -> MutationResult<MutationOutcome> {
        if self.state.data().is_some_and(|s| s.is_open()) {
            return Err(MutationError::Invalid {
                operation: "open shift",
                reason: "a shift is already open on this terminal".into(),
            });
        }

        let guard = MutationGuard::begin(&self.state);
        let optimistic = CashierShift {
            id: format!("shift_{}", Uuid::new_v4()),
            operator_id: req.operator_id.clone(),
            operator_name: req.operator_name.clone(),
            status: ShiftStatus::Open,
            starting_cash: req.starting_cash,
            current_cash: req.starting_cash,
            counted_cash: None,
            opened_at: Utc::now(),
            closed_at: None,
            synced: true,
            note: req.note.clone(),
        };
        self.state.set_data(Some(optimistic.clone()));

        if !self.ctx.connectivity.is_online() {
            return self.park_offline(guard, optimistic, "open shift").await;
        }

        match self.service.open_shift(&req).await {
            Ok(shift) => self.confirm(guard, shift).await,
            Err(e) => self.fail(guard, optimistic, "open shift", e).await,
        }
    }

    /// Close the open shift with a counted drawer
    pub async fn close_shift(&self, req: ShiftClose) -> MutationResult<MutationOutcome> {
        let current = self
            .state
            .data()
            .filter(CashierShift::is_open)
            .ok_or(MutationError::NoActive("shift"))?;

        let guard = MutationGuard::begin(&self.state);
        let mut optimistic = current.clone();
        optimistic.status = ShiftStatus::Closed;
        optimistic.counted_cash = Some(req.counted_cash);
        optimistic.closed_at = Some(Utc::now());
        optimistic.note = req.note.clone().or_else(|| optimistic.note.take());
        self.state.set_data(Some(optimistic.clone()));

        if !self.ctx.connectivity.is_online() {
            return self.park_offline(guard, optimistic, "close shift").await;
        }

        match self.service.close_shift(&current.id, &req).await {
            Ok(shift) => self.confirm(guard, shift).await,
            Err(e) => self.fail(guard, optimistic, "close shift", e).await,
        }
    }

    /// Deposit into or withdraw from the open drawer
    pub async fn cash_movement(&self, movement: CashMovement) -> MutationResult<MutationOutcome> {
        let current = self
            .state
            .data()
            .filter(CashierShift::is_open)
            .ok_or(MutationError::NoActive("shift"))?;

        if movement.amount <= Decimal::ZERO {
            return Err(MutationError::Invalid {
                operation: "cash movement",
                reason: "amount must be positive".into(),
            });
        }
        if movement.kind == CashMovementKind::Withdraw && movement.amount > current.current_cash {
            return Err(MutationError::Invalid {
                operation: "cash movement",
                reason: format!(
                    "cannot withdraw {} from a drawer holding {}",
                    movement.amount, current.current_cash
                ),
            });
        }

        let guard = MutationGuard::begin(&self.state);
        let mut optimistic = current.clone();
        match movement.kind {
            CashMovementKind::Deposit => optimistic.current_cash += movement.amount,
            CashMovementKind::Withdraw => optimistic.current_cash -= movement.amount,
        }
        self.state.set_data(Some(optimistic.clone()));

        if !self.ctx.connectivity.is_online() {
            return self.park_offline(guard, optimistic, "cash movement").await;
        }

        match self.service.cash_movement(&current.id, &movement).await {
            Ok(shift) => self.confirm(guard, shift).await,
            Err(e) => self.fail(guard, optimistic, "cash movement", e).await,
        }
    }

    /// Server confirmed: merge canonical state, broadcast, invalidate
    async fn confirm(
        &self,
        guard: MutationGuard<'_, CashierShift>,
        mut shift: CashierShift,
    ) -> MutationResult<MutationOutcome> {
        shift.synced = true;
        self.state.set_data(Some(shift.clone()));
        guard.commit();

        self.ctx.persist(collections::SHIFTS, &shift).await;
        self.ctx.cache.invalidate(ACTIVE_SHIFT_KEY);
        self.ctx.bus.emit(&BusEvent::Sync {
            event: SyncEvent::CashierUpdated { shift },
            origin: Origin::Local,
        });
        Ok(MutationOutcome::Confirmed)
    }

    /// Offline at call time: keep optimistic state, mark it unsynced,
    /// append to the offline queue
    async fn park_offline(
        &self,
        guard: MutationGuard<'_, CashierShift>,
        mut optimistic: CashierShift,
        operation: &'static str,
    ) -> MutationResult<MutationOutcome> {
        optimistic.synced = false;
        self.state.set_data(Some(optimistic.clone()));

        let snapshot = guard
            .snapshot()
            .and_then(|s| serde_json::to_value(s).ok())
            .unwrap_or(serde_json::Value::Null);
        let state = serde_json::to_value(&optimistic).unwrap_or(serde_json::Value::Null);
        guard.queued();

        self.ctx.persist(collections::SHIFTS, &optimistic).await;
        let mutation = OfflineMutation::new(EntityKind::Shift, optimistic.id.clone(), state, snapshot);
        self.ctx
            .persist(collections::OFFLINE_MUTATIONS, &mutation)
            .await;

        tracing::info!(shift_id = %optimistic.id, operation = operation, "Mutation queued offline");
        Ok(MutationOutcome::Queued)
    }

    /// Remote call failed: roll back, then queue (transient) or
    /// surface only (validation)
    async fn fail(
        &self,
        guard: MutationGuard<'_, CashierShift>,
        optimistic: CashierShift,
        operation: &'static str,
        error: ServiceError,
    ) -> MutationResult<MutationOutcome> {
        let snapshot = guard
            .snapshot()
            .and_then(|s| serde_json::to_value(s).ok())
            .unwrap_or(serde_json::Value::Null);
        guard.rollback();

        if error.is_transient() {
            let state = serde_json::to_value(&optimistic).unwrap_or(serde_json::Value::Null);
            let mutation =
                OfflineMutation::new(EntityKind::Shift, optimistic.id.clone(), state, snapshot);
            self.ctx
                .persist(collections::OFFLINE_MUTATIONS, &mutation)
                .await;
            self.ctx.notifier.warning(
                "Connection problem",
                format!("Could not reach the server; {operation} was saved and will be retried"),
            );
        } else {
            self.ctx.notifier.error(
                "Operation rejected",
                format!("{operation} was rejected by the server: {error}"),
            );
        }

        self.state.set_error(error.to_string());
        Err(MutationError::remote(
            "shift",
            optimistic.id,
            operation,
            error,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::cache::RequestCache;
    use crate::connectivity::ConnectivitySignal;
    use crate::notify::Notifier;
    use crate::store::{LocalStore, MemoryStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Instrumented fake cashier service
    #[derive(Default)]
    struct FakeCashierService {
        calls: Mutex<Vec<String>>,
        fail_next: Mutex<Option<ServiceError>>,
    }

    impl FakeCashierService {
        fn fail_next(&self, error: ServiceError) {
            *self.fail_next.lock().unwrap() = Some(error);
        }

        fn take_failure(&self) -> Option<ServiceError> {
            self.fail_next.lock().unwrap().take()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    #[async_trait]
    impl CashierService for FakeCashierService {
        async fn open_shift(&self, req: &ShiftOpen) -> Result<CashierShift, ServiceError> {
            self.record("open_shift");
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            Ok(CashierShift {
                id: "shift_srv".into(),
                operator_id: req.operator_id.clone(),
                operator_name: req.operator_name.clone(),
                status: ShiftStatus::Open,
                starting_cash: req.starting_cash,
                current_cash: req.starting_cash,
                counted_cash: None,
                opened_at: Utc::now(),
                closed_at: None,
                synced: true,
                note: req.note.clone(),
            })
        }

        async fn close_shift(
            &self,
            shift_id: &str,
            req: &ShiftClose,
        ) -> Result<CashierShift, ServiceError> {
            self.record("close_shift");
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            Ok(CashierShift {
                id: shift_id.into(),
                operator_id: "emp_1".into(),
                operator_name: "Ana".into(),
                status: ShiftStatus::Closed,
                starting_cash: Decimal::from(100),
                current_cash: Decimal::from(100),
                counted_cash: Some(req.counted_cash),
                opened_at: Utc::now(),
                closed_at: Some(Utc::now()),
                synced: true,
                note: None,
            })
        }

        async fn cash_movement(
            &self,
            shift_id: &str,
            movement: &CashMovement,
        ) -> Result<CashierShift, ServiceError> {
            self.record("cash_movement");
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            let delta = match movement.kind {
                CashMovementKind::Deposit => movement.amount,
                CashMovementKind::Withdraw => -movement.amount,
            };
            Ok(CashierShift {
                id: shift_id.into(),
                operator_id: "emp_1".into(),
                operator_name: "Ana".into(),
                status: ShiftStatus::Open,
                starting_cash: Decimal::from(100),
                current_cash: Decimal::from(100) + delta,
                counted_cash: None,
                opened_at: Utc::now(),
                closed_at: None,
                synced: true,
                note: None,
            })
        }

        async fn active_shift(&self) -> Result<Option<CashierShift>, ServiceError> {
            self.record("active_shift");
            Ok(None)
        }

        async fn put_shift(&self, shift: &CashierShift) -> Result<CashierShift, ServiceError> {
            self.record("put_shift");
            Ok(shift.clone())
        }
    }

    fn make_hook(online: bool) -> (CashierHook, Arc<FakeCashierService>, Arc<dyn LocalStore>) {
        let bus = EventBus::new();
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let connectivity = ConnectivitySignal::new(bus.clone());
        connectivity.set_online(online);
        let ctx = HookContext {
            store: store.clone(),
            cache: Arc::new(RequestCache::new()),
            bus: bus.clone(),
            connectivity,
            notifier: Notifier::new(bus),
        };
        let service = Arc::new(FakeCashierService::default());
        let hook = CashierHook::new(ctx, service.clone(), Duration::from_secs(5));
        (hook, service, store)
    }

    fn withdraw(amount: i64) -> CashMovement {
        CashMovement {
            kind: CashMovementKind::Withdraw,
            amount: Decimal::from(amount),
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_open_then_withdraw_online() {
        let (hook, service, _) = make_hook(true);
        let outcome = hook
            .open_shift(ShiftOpen {
                operator_id: "emp_1".into(),
                operator_name: "Ana".into(),
                starting_cash: Decimal::from(100),
                note: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome, MutationOutcome::Confirmed);
        // canonical server id replaced the optimistic one
        assert_eq!(hook.state().data().unwrap().id, "shift_srv");

        let outcome = hook.cash_movement(withdraw(30)).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Confirmed);
        assert_eq!(hook.state().data().unwrap().current_cash, Decimal::from(70));
        assert_eq!(
            *service.calls.lock().unwrap(),
            vec!["open_shift", "cash_movement"]
        );
    }

    #[tokio::test]
    async fn test_offline_withdraw_queues_and_keeps_local_state() {
        let (hook, service, store) = make_hook(true);
        hook.open_shift(ShiftOpen {
            operator_id: "emp_1".into(),
            operator_name: "Ana".into(),
            starting_cash: Decimal::from(100),
            note: None,
        })
        .await
        .unwrap();

        hook.ctx.connectivity.set_online(false);
        let outcome = hook.cash_movement(withdraw(30)).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Queued);

        let shift = hook.state().data().unwrap();
        assert_eq!(shift.current_cash, Decimal::from(70));
        assert!(!shift.synced);

        let queued = store.get_all(collections::OFFLINE_MUTATIONS).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0]["entity_id"], "shift_srv");
        assert_eq!(queued[0]["synced"], false);

        // remote never called while offline
        assert_eq!(*service.calls.lock().unwrap(), vec!["open_shift"]);
    }

    #[tokio::test]
    async fn test_transient_failure_rolls_back_and_queues() {
        let (hook, service, store) = make_hook(true);
        hook.open_shift(ShiftOpen {
            operator_id: "emp_1".into(),
            operator_name: "Ana".into(),
            starting_cash: Decimal::from(100),
            note: None,
        })
        .await
        .unwrap();

        service.fail_next(ServiceError::Timeout("10s".into()));
        let err = hook.cash_movement(withdraw(30)).await.unwrap_err();
        assert!(err.is_transient());

        // rolled back to the pre-mutation value, exactly
        assert_eq!(hook.state().data().unwrap().current_cash, Decimal::from(100));
        // but queued for replay
        let queued = store.get_all(collections::OFFLINE_MUTATIONS).await.unwrap();
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_rolls_back_without_queueing() {
        let (hook, service, store) = make_hook(true);
        hook.open_shift(ShiftOpen {
            operator_id: "emp_1".into(),
            operator_name: "Ana".into(),
            starting_cash: Decimal::from(100),
            note: None,
        })
        .await
        .unwrap();

        service.fail_next(ServiceError::Status {
            status: 422,
            message: "movement not allowed".into(),
        });
        let err = hook.cash_movement(withdraw(30)).await.unwrap_err();
        assert!(!err.is_transient());

        assert_eq!(hook.state().data().unwrap().current_cash, Decimal::from(100));
        let queued = store.get_all(collections::OFFLINE_MUTATIONS).await.unwrap();
        assert!(queued.is_empty());
    }

    #[tokio::test]
    async fn test_overdraw_is_rejected_locally() {
        let (hook, service, _) = make_hook(true);
        hook.open_shift(ShiftOpen {
            operator_id: "emp_1".into(),
            operator_name: "Ana".into(),
            starting_cash: Decimal::from(100),
            note: None,
        })
        .await
        .unwrap();

        let err = hook.cash_movement(withdraw(500)).await.unwrap_err();
        assert!(matches!(err, MutationError::Invalid { .. }));
        // state untouched, remote not called
        assert_eq!(hook.state().data().unwrap().current_cash, Decimal::from(100));
        assert_eq!(*service.calls.lock().unwrap(), vec!["open_shift"]);
    }

    #[tokio::test]
    async fn test_remote_sync_event_ignored_while_unsynced() {
        let (hook, _, _) = make_hook(false);
        hook.open_shift(ShiftOpen {
            operator_id: "emp_1".into(),
            operator_name: "Ana".into(),
            starting_cash: Decimal::from(100),
            note: None,
        })
        .await
        .unwrap();
        let local = hook.state().data().unwrap();
        assert!(!local.synced);

        let mut remote = local.clone();
        remote.current_cash = Decimal::from(999);
        remote.synced = true;
        hook.ctx.bus.emit(&BusEvent::Sync {
            event: SyncEvent::CashierUpdated { shift: remote },
            origin: Origin::Remote,
        });

        // optimistic version stays visible
        assert_eq!(hook.state().data().unwrap().current_cash, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_replay_confirmation_settles_unsynced_state() {
        let (hook, _, _) = make_hook(false);
        hook.open_shift(ShiftOpen {
            operator_id: "emp_1".into(),
            operator_name: "Ana".into(),
            starting_cash: Decimal::from(100),
            note: None,
        })
        .await
        .unwrap();
        let local = hook.state().data().unwrap();
        assert!(!local.synced);

        // the replay broadcasts the confirmed state after draining
        let mut confirmed = local.clone();
        confirmed.synced = true;
        hook.ctx.bus.emit(&BusEvent::Sync {
            event: SyncEvent::CashierUpdated {
                shift: confirmed.clone(),
            },
            origin: Origin::Local,
        });
        assert!(hook.state().data().unwrap().synced);

        // with the copy settled, cross-terminal updates land again
        let mut remote = confirmed;
        remote.current_cash = Decimal::from(150);
        hook.ctx.bus.emit(&BusEvent::Sync {
            event: SyncEvent::CashierUpdated { shift: remote },
            origin: Origin::Remote,
        });
        assert_eq!(hook.state().data().unwrap().current_cash, Decimal::from(150));
    }
}
