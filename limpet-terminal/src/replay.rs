//! Offline mutation replay
//!
//! Drains the persisted offline queue against the backend whenever a
//! network path exists. Replays are full-state PUTs in queue order per
//! entity, so a retry after a half-finished drain converges on the
//! same server state instead of double-applying deltas.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shared::ServiceError;
use shared::models::{BusinessDay, CashierShift, EntityKind, OfflineMutation, Order};
use shared::sync::SyncEvent;

use crate::bus::{BusEvent, EventBus, Origin};
use crate::cache::RequestCache;
use crate::connectivity::ConnectivitySignal;
use crate::hooks::business_day::CURRENT_DAY_KEY;
use crate::hooks::cashier::ACTIVE_SHIFT_KEY;
use crate::hooks::orders::ACTIVE_ORDERS_KEY;
use crate::notify::Notifier;
use crate::services::{BusinessDayService, CashierService, OrderService};
use crate::store::{LocalStore, collections};

/// Wakes the replay loop outside its regular cadence
#[derive(Debug, Clone)]
pub struct ReplayHandle {
    tx: mpsc::Sender<()>,
}

impl ReplayHandle {
    /// Request an immediate drain attempt (non-blocking; coalesces)
    pub fn kick(&self) {
        let _ = self.tx.try_send(());
    }
}

/// What one drain pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub replayed: usize,
    pub dropped: usize,
    pub deferred: usize,
}

pub struct OfflineReplay {
    store: Arc<dyn LocalStore>,
    cache: Arc<RequestCache>,
    bus: EventBus,
    connectivity: ConnectivitySignal,
    notifier: Notifier,
    cashier: Arc<dyn CashierService>,
    orders: Arc<dyn OrderService>,
    days: Arc<dyn BusinessDayService>,
    interval: Duration,
    kick_rx: mpsc::Receiver<()>,
}

impl OfflineReplay {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn LocalStore>,
        cache: Arc<RequestCache>,
        bus: EventBus,
        connectivity: ConnectivitySignal,
        notifier: Notifier,
        cashier: Arc<dyn CashierService>,
        orders: Arc<dyn OrderService>,
        days: Arc<dyn BusinessDayService>,
        interval: Duration,
    ) -> (Self, ReplayHandle) {
        let (tx, kick_rx) = mpsc::channel(1);
        (
            Self {
                store,
                cache,
                bus,
                connectivity,
                notifier,
                cashier,
                orders,
                days,
                interval,
                kick_rx,
            },
            ReplayHandle { tx },
        )
    }

    /// Drive the queue until cancelled
    ///
    /// A drain is attempted on every offline-to-online transition, on
    /// every `ReplayHandle::kick`, and on a steady interval as a
    /// backstop for drains that deferred work.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut online = self.connectivity.watch();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !*online.borrow_and_update() {
                        continue;
                    }
                    tracing::info!("Connectivity restored, draining offline queue");
                }
                Some(()) = self.kick_rx.recv() => {}
            }

            if !self.connectivity.is_online() {
                continue;
            }
            match self.drain().await {
                Ok(report) if report.replayed + report.dropped > 0 => {
                    tracing::info!(
                        replayed = report.replayed,
                        dropped = report.dropped,
                        deferred = report.deferred,
                        "Offline queue drain finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Offline queue drain failed"),
            }
        }
        tracing::debug!("Replay loop stopped");
    }

    /// One drain pass over the whole queue
    ///
    /// Mutations replay oldest-first within each entity; a transient
    /// failure parks only that entity's remaining queue, other
    /// entities keep draining.
    pub async fn drain(&self) -> Result<DrainReport, shared::StoreError> {
        let mut queue: Vec<OfflineMutation> =
            crate::store::get_all_as(&self.store, collections::OFFLINE_MUTATIONS).await?;
        if queue.is_empty() {
            return Ok(DrainReport::default());
        }
        queue.sort_by(|a, b| a.queued_at.cmp(&b.queued_at));

        let mut report = DrainReport::default();
        // entities whose queue hit a transient failure this pass
        let mut parked: Vec<String> = Vec::new();

        for mutation in queue {
            if parked.contains(&mutation.entity_id) {
                report.deferred += 1;
                continue;
            }

            match self.replay_one(&mutation).await {
                Ok(()) => {
                    self.store
                        .delete(collections::OFFLINE_MUTATIONS, &mutation.id)
                        .await?;
                    report.replayed += 1;
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(
                        mutation_id = %mutation.id,
                        entity_id = %mutation.entity_id,
                        error = %error,
                        "Replay deferred, will retry"
                    );
                    parked.push(mutation.entity_id.clone());
                    report.deferred += 1;
                }
                Err(error) => {
                    // the server will never accept this record; keep
                    // retrying would wedge the queue behind it
                    tracing::error!(
                        mutation_id = %mutation.id,
                        entity_id = %mutation.entity_id,
                        error = %error,
                        "Replay rejected, dropping mutation"
                    );
                    self.store
                        .delete(collections::OFFLINE_MUTATIONS, &mutation.id)
                        .await?;
                    self.notifier.error(
                        "Offline change rejected",
                        format!(
                            "A queued change to {} {} was rejected by the server: {error}",
                            mutation.entity.as_str(),
                            mutation.entity_id
                        ),
                    );
                    report.dropped += 1;
                }
            }
        }
        Ok(report)
    }

    async fn replay_one(&self, mutation: &OfflineMutation) -> Result<(), ServiceError> {
        match mutation.entity {
            EntityKind::Shift => {
                let shift: CashierShift = serde_json::from_value(mutation.state.clone())
                    .map_err(|e| ServiceError::Decode(e.to_string()))?;
                let mut confirmed = self.cashier.put_shift(&shift).await?;
                confirmed.synced = true;
                if let Err(e) =
                    crate::store::put_as(&self.store, collections::SHIFTS, &confirmed).await
                {
                    tracing::warn!(error = %e, "Could not persist replayed shift");
                }
                self.cache.invalidate(ACTIVE_SHIFT_KEY);
                self.bus.emit(&BusEvent::Sync {
                    event: SyncEvent::CashierUpdated { shift: confirmed },
                    origin: Origin::Local,
                });
            }
            EntityKind::Order => {
                let order: Order = serde_json::from_value(mutation.state.clone())
                    .map_err(|e| ServiceError::Decode(e.to_string()))?;
                let mut confirmed = self.orders.put_order(&order).await?;
                confirmed.synced = true;
                if let Err(e) =
                    crate::store::put_as(&self.store, collections::ORDERS, &confirmed).await
                {
                    tracing::warn!(error = %e, "Could not persist replayed order");
                }
                self.cache.invalidate(ACTIVE_ORDERS_KEY);
                self.cache.invalidate(&format!("order:{}", confirmed.id));
                self.bus.emit(&BusEvent::Sync {
                    event: SyncEvent::OrderUpdated { order: confirmed },
                    origin: Origin::Local,
                });
            }
            EntityKind::BusinessDay => {
                let day: BusinessDay = serde_json::from_value(mutation.state.clone())
                    .map_err(|e| ServiceError::Decode(e.to_string()))?;
                let mut confirmed = self.days.put_day(&day).await?;
                confirmed.synced = true;
                if let Err(e) =
                    crate::store::put_as(&self.store, collections::BUSINESS_DAYS, &confirmed).await
                {
                    tracing::warn!(error = %e, "Could not persist replayed business day");
                }
                self.cache.invalidate(CURRENT_DAY_KEY);
                self.bus.emit(&BusEvent::Sync {
                    event: SyncEvent::BusinessDayUpdated { day: confirmed },
                    origin: Origin::Local,
                });
            }
        }
        Ok(())
    }
}
