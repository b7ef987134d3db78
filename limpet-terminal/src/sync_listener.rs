//! Inbound sync listener
//!
//! Consumes change notifications pushed by the backend, validates them
//! at the boundary, mirrors them into the local store and republishes
//! them on the event bus tagged `Origin::Remote`. The origin tag is
//! what keeps a terminal from treating its own replayed writes as
//! fresh remote changes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shared::sync::{SyncEnvelope, SyncEvent};

use crate::bus::{BusEvent, EventBus, Origin};
use crate::cache::RequestCache;
use crate::hooks::business_day::CURRENT_DAY_KEY;
use crate::hooks::cashier::ACTIVE_SHIFT_KEY;
use crate::hooks::orders::ACTIVE_ORDERS_KEY;
use crate::store::{LocalStore, collections};

pub struct SyncListener {
    store: Arc<dyn LocalStore>,
    cache: Arc<RequestCache>,
    bus: EventBus,
    inbound: mpsc::Receiver<SyncEnvelope>,
}

impl SyncListener {
    pub fn new(
        store: Arc<dyn LocalStore>,
        cache: Arc<RequestCache>,
        bus: EventBus,
        inbound: mpsc::Receiver<SyncEnvelope>,
    ) -> Self {
        Self {
            store,
            cache,
            bus,
            inbound,
        }
    }

    /// Consume envelopes until cancelled or the producer hangs up
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let envelope = tokio::select! {
                _ = cancel.cancelled() => break,
                envelope = self.inbound.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            // malformed envelopes never reach the bus
            let event = match SyncEvent::from_envelope(&envelope) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(
                        resource = %envelope.resource,
                        action = %envelope.action,
                        error = %e,
                        "Dropping invalid sync envelope"
                    );
                    continue;
                }
            };

            self.apply(&event).await;
            self.bus.emit(&BusEvent::Sync {
                event,
                origin: Origin::Remote,
            });
        }
        tracing::debug!("Sync listener stopped");
    }

    /// Mirror the remote change into the store and drop stale cache
    ///
    /// Store writes are last-write-wins: the hooks decide separately
    /// whether their in-memory state adopts the change (they hold it
    /// back while a local unsynced edit is pending).
    async fn apply(&self, event: &SyncEvent) {
        match event {
            SyncEvent::CashierUpdated { shift } => {
                self.persist(collections::SHIFTS, shift).await;
                self.cache.invalidate(ACTIVE_SHIFT_KEY);
            }
            SyncEvent::CashierOperation { shift_id, .. } => {
                // the movement itself is server-applied; a shift update
                // with the new balance follows on its own envelope
                tracing::debug!(shift_id = %shift_id, "Cash movement observed on another terminal");
                self.cache.invalidate(ACTIVE_SHIFT_KEY);
            }
            SyncEvent::OrderUpdated { order } => {
                self.persist(collections::ORDERS, order).await;
                self.cache.invalidate(ACTIVE_ORDERS_KEY);
                self.cache.invalidate(&format!("order:{}", order.id));
            }
            SyncEvent::OrderDeleted { order_id } => {
                if let Err(e) = self.store.delete(collections::ORDERS, order_id).await {
                    tracing::warn!(order_id = %order_id, error = %e, "Could not delete synced order");
                }
                self.cache.invalidate(ACTIVE_ORDERS_KEY);
                self.cache.invalidate(&format!("order:{order_id}"));
            }
            SyncEvent::BusinessDayUpdated { day } => {
                self.persist(collections::BUSINESS_DAYS, day).await;
                self.cache.invalidate(CURRENT_DAY_KEY);
            }
        }
    }

    async fn persist<R: serde::Serialize>(&self, collection: &str, record: &R) {
        if let Err(e) = crate::store::put_as(&self.store, collection, record).await {
            tracing::warn!(collection = %collection, error = %e, "Could not mirror synced record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use shared::models::{CashierShift, ItemStatus, Order, OrderItem, OrderStatus, ShiftStatus};
    use std::sync::Mutex;
    use std::time::Duration;

    fn sample_order(id: &str) -> Order {
        Order {
            id: id.to_string(),
            receipt_number: "R-002".into(),
            status: OrderStatus::Active,
            items: vec![OrderItem {
                id: "i1".into(),
                product_id: "p1".into(),
                name: "Espresso".into(),
                quantity: 1,
                unit_price: Decimal::new(250, 2),
                status: ItemStatus::Pending,
            }],
            total: Decimal::new(250, 2),
            created_at: Utc::now(),
            updated_at: None,
            synced: true,
        }
    }

    fn sample_shift(id: &str) -> CashierShift {
        CashierShift {
            id: id.to_string(),
            operator_id: "op_1".into(),
            operator_name: "Dana".into(),
            status: ShiftStatus::Open,
            starting_cash: Decimal::from(100),
            current_cash: Decimal::from(130),
            counted_cash: None,
            opened_at: Utc::now(),
            closed_at: None,
            synced: true,
            note: None,
        }
    }

    struct Fixture {
        tx: mpsc::Sender<SyncEnvelope>,
        store: Arc<dyn LocalStore>,
        bus: EventBus,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_listener() -> Fixture {
        let bus = EventBus::new();
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let listener =
            SyncListener::new(store.clone(), Arc::new(RequestCache::new()), bus.clone(), rx);
        let handle = tokio::spawn(listener.run(cancel.clone()));
        Fixture {
            tx,
            store,
            bus,
            cancel,
            handle,
        }
    }

    async fn settle(fixture: Fixture) {
        // closing the channel lets the listener finish its backlog
        drop(fixture.tx);
        fixture.cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), fixture.handle).await;
    }

    #[tokio::test]
    async fn test_valid_envelope_reaches_store_and_bus() {
        let fixture = spawn_listener();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = fixture.bus.subscribe("sync:cashier:update", move |event| {
            if let BusEvent::Sync { origin, .. } = event {
                seen_clone.lock().unwrap().push(*origin);
            }
        });

        let shift = sample_shift("shift_7");
        fixture
            .tx
            .send(SyncEnvelope {
                resource: "shift".into(),
                action: "updated".into(),
                id: shift.id.clone(),
                data: Some(serde_json::to_value(&shift).unwrap()),
            })
            .await
            .unwrap();

        // the bus emit happens after the store write, so once the
        // event is visible the mirror must be too
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while seen.lock().unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "bus emit timed out");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(seen.lock().unwrap().as_slice(), [Origin::Remote]);
        assert!(
            fixture
                .store
                .get(collections::SHIFTS, "shift_7")
                .await
                .unwrap()
                .is_some()
        );
        settle(fixture).await;
    }

    #[tokio::test]
    async fn test_invalid_envelope_is_dropped() {
        let fixture = spawn_listener();

        let seen = Arc::new(Mutex::new(0usize));
        let seen_clone = seen.clone();
        let _sub = fixture.bus.subscribe("sync:*", move |_| {
            *seen_clone.lock().unwrap() += 1;
        });

        fixture
            .tx
            .send(SyncEnvelope {
                resource: "printer".into(),
                action: "updated".into(),
                id: "p1".into(),
                data: None,
            })
            .await
            .unwrap();
        // a valid one after it proves the loop survived
        fixture
            .tx
            .send(SyncEnvelope {
                resource: "order".into(),
                action: "deleted".into(),
                id: "order_9".into(),
                data: None,
            })
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while *seen.lock().unwrap() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "bus emit timed out");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*seen.lock().unwrap(), 1);
        settle(fixture).await;
    }

    #[tokio::test]
    async fn test_order_delete_removes_local_record() {
        let fixture = spawn_listener();

        let order = sample_order("order_3");
        crate::store::put_as(&fixture.store, collections::ORDERS, &order)
            .await
            .unwrap();

        fixture
            .tx
            .send(SyncEnvelope {
                resource: "order".into(),
                action: "deleted".into(),
                id: "order_3".into(),
                data: None,
            })
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            if fixture
                .store
                .get(collections::ORDERS, "order_3")
                .await
                .unwrap()
                .is_none()
            {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "delete timed out");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        settle(fixture).await;
    }
}
