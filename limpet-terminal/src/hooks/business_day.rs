//! Business day hook
//!
//! Open/close of the trading day. Closing is deliberately conservative:
//! it refuses while the cashier still has an open shift recorded
//! locally, so a flaky connection cannot produce a day closed under an
//! open drawer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::ServiceError;
use shared::models::{
    BusinessDay, BusinessDayPatch, BusinessDayStatus, CashierShift, EntityKind, OfflineMutation,
};
use shared::sync::SyncEvent;

use super::{HookContext, HookState, MutationGuard, MutationOutcome};
use crate::bus::{BusEvent, Origin, Subscription};
use crate::error::{MutationError, MutationResult};
use crate::services::BusinessDayService;
use crate::store::collections;

/// Cache key for the current-day read
pub const CURRENT_DAY_KEY: &str = "business_day:current";

pub struct BusinessDayHook {
    ctx: HookContext,
    service: Arc<dyn BusinessDayService>,
    state: Arc<HookState<BusinessDay>>,
    cache_ttl: Duration,
    _sync_sub: Subscription,
}

impl BusinessDayHook {
    pub fn new(
        ctx: HookContext,
        service: Arc<dyn BusinessDayService>,
        cache_ttl: Duration,
    ) -> Self {
        let state = Arc::new(HookState::<BusinessDay>::new());

        let sync_state = state.clone();
        let sync_sub = ctx.bus.subscribe("sync:business_day:*", move |event| {
            let BusEvent::Sync {
                event: SyncEvent::BusinessDayUpdated { day },
                origin,
            } = event
            else {
                return;
            };
            sync_state.update(|value| {
                let ours = value.data.as_ref().is_some_and(|local| local.id == day.id);
                let unsynced = value.data.as_ref().is_some_and(|local| !local.synced);
                match origin {
                    // server confirmation of our own change (mutation
                    // or replay); settle it
                    Origin::Local if ours => value.data = Some(day.clone()),
                    Origin::Local => {}
                    // unsynced local close wins until replay settles it
                    Origin::Remote if ours && unsynced => {}
                    Origin::Remote => value.data = Some(day.clone()),
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

    pub fn state(&self) -> &HookState<BusinessDay> {
        &self.state
    }

    /// Restore the locally persisted day after a restart
    pub async fn load_local(&self) {
        match crate::store::get_all_as::<BusinessDay>(&self.ctx.store, collections::BUSINESS_DAYS)
            .await
        {
            Ok(days) => {
                if let Some(open) = days.into_iter().find(|d| d.is_open()) {
                    self.state.set_data(Some(open));
                }
            }
            Err(e) => tracing::warn!(error = %e, "Could not load local business day"),
        }
    }

    /// Fetch the current day, de-duplicated and memoized
    pub async fn refresh(&self) -> Result<Option<BusinessDay>, Arc<ServiceError>> {
        if !self.ctx.connectivity.is_online() {
            return Ok(self.state.data());
        }

        self.state.set_loading(true);
        let service = self.service.clone();
        let result = self
            .ctx
            .cache
            .execute_as::<Option<BusinessDay>, _, _>(CURRENT_DAY_KEY, self.cache_ttl, move || {
                async move {
                    let day = service.current_day().await?;
                    serde_json::to_value(day).map_err(|e| ServiceError::Decode(e.to_string()))
                }
            })
            .await;
        self.state.set_loading(false);

        match result {
            Ok(day) => {
                self.state.set_data(day.clone());
                if let Some(day) = &day {
                    self.ctx.persist(collections::BUSINESS_DAYS, day).await;
                }
                Ok(day)
            }
            Err(e) => {
                self.state.set_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Open a new business day
    pub async fn open_day(&self) -> MutationResult<MutationOutcome> {
        if self.state.data().is_some_and(|d| d.is_open()) {
            return Err(MutationError::Invalid {
                operation: "open day",
                reason: "a business day is already open".into(),
            });
        }

        let guard = MutationGuard::begin(&self.state);
        let mut optimistic = BusinessDay {
            id: format!("day_{}", Uuid::new_v4()),
            status: BusinessDayStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            total_sales: Decimal::ZERO,
            order_count: 0,
            synced: true,
        };
        self.state.set_data(Some(optimistic.clone()));

        if !self.ctx.connectivity.is_online() {
            optimistic.synced = false;
            return self.park_offline(guard, optimistic, None, "open day").await;
        }

        match self.service.open_day().await {
            Ok(day) => self.confirm(guard, day).await,
            Err(error) => self.fail(guard, optimistic, "open day", error).await,
        }
    }

    /// Close the current business day
    pub async fn close_day(&self) -> MutationResult<MutationOutcome> {
        let Some(current) = self.state.data().filter(|d| d.is_open()) else {
            return Err(MutationError::NoActive("business day"));
        };

        // an open shift in the local store blocks the close
        if let Ok(shifts) =
            crate::store::get_all_as::<CashierShift>(&self.ctx.store, collections::SHIFTS).await
        {
            if shifts.iter().any(|s| s.is_open()) {
                return Err(MutationError::Invalid {
                    operation: "close day",
                    reason: "a cashier shift is still open".into(),
                });
            }
        }

        let patch = BusinessDayPatch {
            status: Some(BusinessDayStatus::Closed),
            closed_at: Some(Utc::now()),
            ..Default::default()
        };
        let guard = MutationGuard::begin(&self.state);
        let mut optimistic = current.clone();
        patch.apply(&mut optimistic);
        self.state.set_data(Some(optimistic.clone()));

        if !self.ctx.connectivity.is_online() {
            optimistic.synced = false;
            return self
                .park_offline(guard, optimistic, Some(current), "close day")
                .await;
        }

        match self.service.close_day(&current.id).await {
            Ok(day) => self.confirm(guard, day).await,
            Err(error) => self.fail(guard, optimistic, "close day", error).await,
        }
    }

    async fn confirm(
        &self,
        guard: MutationGuard<'_, BusinessDay>,
        mut day: BusinessDay,
    ) -> MutationResult<MutationOutcome> {
        day.synced = true;
        self.state.set_data(Some(day.clone()));
        guard.commit();

        self.ctx.persist(collections::BUSINESS_DAYS, &day).await;
        self.ctx.cache.invalidate(CURRENT_DAY_KEY);
        self.ctx.bus.emit(&BusEvent::Sync {
            event: SyncEvent::BusinessDayUpdated { day },
            origin: Origin::Local,
        });
        Ok(MutationOutcome::Confirmed)
    }

    async fn park_offline(
        &self,
        guard: MutationGuard<'_, BusinessDay>,
        day: BusinessDay,
        previous: Option<BusinessDay>,
        operation: &'static str,
    ) -> MutationResult<MutationOutcome> {
        self.state.set_data(Some(day.clone()));
        guard.queued();

        self.ctx.persist(collections::BUSINESS_DAYS, &day).await;
        let snapshot = previous
            .map(|p| serde_json::to_value(p).unwrap_or(serde_json::Value::Null))
            .unwrap_or(serde_json::Value::Null);
        let state = serde_json::to_value(&day).unwrap_or(serde_json::Value::Null);
        let mutation = OfflineMutation::new(EntityKind::BusinessDay, day.id.clone(), state, snapshot);
        self.ctx
            .persist(collections::OFFLINE_MUTATIONS, &mutation)
            .await;
        tracing::info!(day_id = %day.id, operation = operation, "Mutation queued offline");
        Ok(MutationOutcome::Queued)
    }

    async fn fail(
        &self,
        guard: MutationGuard<'_, BusinessDay>,
        optimistic: BusinessDay,
        operation: &'static str,
        error: ServiceError,
    ) -> MutationResult<MutationOutcome> {
        let snapshot = guard
            .snapshot()
            .map(|s| serde_json::to_value(s).unwrap_or(serde_json::Value::Null))
            .unwrap_or(serde_json::Value::Null);
        guard.rollback();

        if error.is_transient() {
            let state = serde_json::to_value(&optimistic).unwrap_or(serde_json::Value::Null);
            let mutation =
                OfflineMutation::new(EntityKind::BusinessDay, optimistic.id.clone(), state, snapshot);
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
            "business day",
            optimistic.id,
            operation,
            error,
        ))
    }
}
