//! Orders hook
//!
//! Terminal view of the active order list (POS and kitchen display).
//! Status changes are patch-based: only the supplied fields move,
//! everything else on the order is server-owned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use shared::ServiceError;
use shared::models::{EntityKind, ItemStatus, OfflineMutation, Order, OrderPatch, OrderStatus};
use shared::sync::SyncEvent;

use super::{HookContext, HookState, MutationGuard, MutationOutcome};
use crate::bus::{BusEvent, Origin, Subscription};
use crate::error::{MutationError, MutationResult};
use crate::services::OrderService;
use crate::store::collections;

/// Cache key for the active-orders read
pub const ACTIVE_ORDERS_KEY: &str = "orders:active";

pub struct OrderHook {
    ctx: HookContext,
    service: Arc<dyn OrderService>,
    state: Arc<HookState<Vec<Order>>>,
    cache_ttl: Duration,
    _sync_sub: Subscription,
}

impl OrderHook {
    pub fn new(ctx: HookContext, service: Arc<dyn OrderService>, cache_ttl: Duration) -> Self {
        let state = Arc::new(HookState::<Vec<Order>>::new());

        let sync_state = state.clone();
        let sync_sub = ctx.bus.subscribe("sync:order:*", move |event| {
            let BusEvent::Sync { event, origin } = event else {
                return;
            };
            match event {
                SyncEvent::OrderUpdated { order } => {
                    sync_state.update(|value| {
                        let orders = value.data.get_or_insert_with(Vec::new);
                        match (origin, orders.iter_mut().find(|o| o.id == order.id)) {
                            // server confirmation of our own change
                            // (mutation or replay); settle it
                            (Origin::Local, Some(local)) => *local = order.clone(),
                            (Origin::Local, None) => {}
                            // unsynced local edits stay on screen
                            (Origin::Remote, Some(local)) if !local.synced => {}
                            (Origin::Remote, Some(local)) => *local = order.clone(),
                            (Origin::Remote, None) => orders.push(order.clone()),
                        }
                    });
                }
                SyncEvent::OrderDeleted { order_id } if *origin == Origin::Remote => {
                    sync_state.update(|value| {
                        if let Some(orders) = value.data.as_mut() {
                            orders.retain(|o| &o.id != order_id);
                        }
                    });
                }
                _ => {}
            }
        });

        Self {
            ctx,
            service,
            state,
            cache_ttl,
            _sync_sub: sync_sub,
        }
    }

    pub fn state(&self) -> &HookState<Vec<Order>> {
        &self.state
    }

    /// Restore locally persisted orders after a restart
    pub async fn load_local(&self) {
        match crate::store::get_all_as::<Order>(&self.ctx.store, collections::ORDERS).await {
            Ok(orders) if !orders.is_empty() => self.state.set_data(Some(orders)),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Could not load local orders"),
        }
    }

    /// Fetch active orders, de-duplicated and memoized
    pub async fn refresh(&self) -> Result<Vec<Order>, Arc<ServiceError>> {
        if !self.ctx.connectivity.is_online() {
            return Ok(self.state.data().unwrap_or_default());
        }

        self.state.set_loading(true);
        let service = self.service.clone();
        let result = self
            .ctx
            .cache
            .execute_as::<Vec<Order>, _, _>(ACTIVE_ORDERS_KEY, self.cache_ttl, move || async move {
                let orders = service.active_orders().await?;
                serde_json::to_value(orders).map_err(|e| ServiceError::Decode(e.to_string()))
            })
            .await;
        self.state.set_loading(false);

        match result {
            Ok(orders) => {
                self.state.set_data(Some(orders.clone()));
                for order in &orders {
                    self.ctx.persist(collections::ORDERS, order).await;
                }
                Ok(orders)
            }
            Err(e) => {
                self.state.set_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Move a whole order to a new status
    pub async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> MutationResult<MutationOutcome> {
        let patch = OrderPatch {
            status: Some(status),
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        self.apply_patch(order_id, patch, "update order status").await
    }

    /// Move one order item to a new status (kitchen display)
    pub async fn update_item_status(
        &self,
        order_id: &str,
        item_id: &str,
        status: ItemStatus,
    ) -> MutationResult<MutationOutcome> {
        let patch = OrderPatch {
            item_status: vec![(item_id.to_string(), status)],
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        self.apply_patch(order_id, patch, "update item status").await
    }

    async fn apply_patch(
        &self,
        order_id: &str,
        patch: OrderPatch,
        operation: &'static str,
    ) -> MutationResult<MutationOutcome> {
        let orders = self.state.data().unwrap_or_default();
        let Some(current) = orders.iter().find(|o| o.id == order_id).cloned() else {
            return Err(MutationError::Invalid {
                operation,
                reason: format!("order {order_id} is not on this terminal"),
            });
        };

        let guard = MutationGuard::begin(&self.state);
        let mut optimistic = current.clone();
        patch.apply(&mut optimistic);
        self.replace(optimistic.clone());

        if !self.ctx.connectivity.is_online() {
            optimistic.synced = false;
            self.replace(optimistic.clone());

            let snapshot = serde_json::to_value(&current).unwrap_or(serde_json::Value::Null);
            let state = serde_json::to_value(&optimistic).unwrap_or(serde_json::Value::Null);
            guard.queued();

            self.ctx.persist(collections::ORDERS, &optimistic).await;
            let mutation =
                OfflineMutation::new(EntityKind::Order, optimistic.id.clone(), state, snapshot);
            self.ctx
                .persist(collections::OFFLINE_MUTATIONS, &mutation)
                .await;
            tracing::info!(order_id = %optimistic.id, operation = operation, "Mutation queued offline");
            return Ok(MutationOutcome::Queued);
        }

        match self.service.update_order(order_id, &patch).await {
            Ok(mut order) => {
                order.synced = true;
                self.replace(order.clone());
                guard.commit();

                self.ctx.persist(collections::ORDERS, &order).await;
                self.ctx.cache.invalidate(ACTIVE_ORDERS_KEY);
                self.ctx
                    .cache
                    .invalidate(&format!("order:{}", order.id));
                self.ctx.bus.emit(&BusEvent::Sync {
                    event: SyncEvent::OrderUpdated { order },
                    origin: Origin::Local,
                });
                Ok(MutationOutcome::Confirmed)
            }
            Err(error) => {
                guard.rollback();
                if error.is_transient() {
                    let snapshot =
                        serde_json::to_value(&current).unwrap_or(serde_json::Value::Null);
                    let state =
                        serde_json::to_value(&optimistic).unwrap_or(serde_json::Value::Null);
                    let mutation = OfflineMutation::new(
                        EntityKind::Order,
                        optimistic.id.clone(),
                        state,
                        snapshot,
                    );
                    self.ctx
                        .persist(collections::OFFLINE_MUTATIONS, &mutation)
                        .await;
                    self.ctx.notifier.warning(
                        "Connection problem",
                        format!(
                            "Could not reach the server; {operation} was saved and will be retried"
                        ),
                    );
                } else {
                    self.ctx.notifier.error(
                        "Operation rejected",
                        format!("{operation} was rejected by the server: {error}"),
                    );
                }
                Err(MutationError::remote(
                    "order",
                    order_id.to_string(),
                    operation,
                    error,
                ))
            }
        }
    }

    /// Swap one order in the list, keeping the rest untouched
    fn replace(&self, order: Order) {
        self.state.update(|value| {
            let orders = value.data.get_or_insert_with(Vec::new);
            match orders.iter_mut().find(|o| o.id == order.id) {
                Some(slot) => *slot = order,
                None => orders.push(order),
            }
        });
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
    use rust_decimal::Decimal;
    use shared::models::OrderItem;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeOrderService {
        fail_next: Mutex<Option<ServiceError>>,
    }

    #[async_trait]
    impl OrderService for FakeOrderService {
        async fn update_order(
            &self,
            order_id: &str,
            patch: &OrderPatch,
        ) -> Result<Order, ServiceError> {
            if let Some(e) = self.fail_next.lock().unwrap().take() {
                return Err(e);
            }
            let mut order = sample_order(order_id);
            patch.apply(&mut order);
            Ok(order)
        }

        async fn get_order(&self, order_id: &str) -> Result<Order, ServiceError> {
            Ok(sample_order(order_id))
        }

        async fn active_orders(&self) -> Result<Vec<Order>, ServiceError> {
            Ok(vec![sample_order("order_1")])
        }

        async fn put_order(&self, order: &Order) -> Result<Order, ServiceError> {
            Ok(order.clone())
        }
    }

    fn sample_order(id: &str) -> Order {
        Order {
            id: id.to_string(),
            receipt_number: "R-001".into(),
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

    fn make_hook(online: bool) -> (OrderHook, Arc<FakeOrderService>, Arc<dyn LocalStore>) {
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
        let service = Arc::new(FakeOrderService::default());
        let hook = OrderHook::new(ctx, service.clone(), Duration::from_secs(5));
        (hook, service, store)
    }

    #[tokio::test]
    async fn test_item_status_update_is_optimistic_then_confirmed() {
        let (hook, _, _) = make_hook(true);
        hook.refresh().await.unwrap();

        let outcome = hook
            .update_item_status("order_1", "i1", ItemStatus::Ready)
            .await
            .unwrap();
        assert_eq!(outcome, MutationOutcome::Confirmed);

        let orders = hook.state().data().unwrap();
        assert_eq!(orders[0].items[0].status, ItemStatus::Ready);
        assert!(orders[0].synced);
    }

    #[tokio::test]
    async fn test_offline_patch_queues_mutation() {
        let (hook, _, store) = make_hook(true);
        hook.refresh().await.unwrap();
        hook.ctx.connectivity.set_online(false);

        let outcome = hook
            .update_order_status("order_1", OrderStatus::Completed)
            .await
            .unwrap();
        assert_eq!(outcome, MutationOutcome::Queued);

        let orders = hook.state().data().unwrap();
        assert_eq!(orders[0].status, OrderStatus::Completed);
        assert!(!orders[0].synced);

        let queued = store.get_all(collections::OFFLINE_MUTATIONS).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0]["entity"], "order");
    }

    #[tokio::test]
    async fn test_transient_failure_restores_previous_item_status() {
        let (hook, service, _) = make_hook(true);
        hook.refresh().await.unwrap();

        *service.fail_next.lock().unwrap() =
            Some(ServiceError::Connection("refused".into()));
        let err = hook
            .update_item_status("order_1", "i1", ItemStatus::Ready)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let orders = hook.state().data().unwrap();
        assert_eq!(orders[0].items[0].status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_remote_delete_removes_order() {
        let (hook, _, _) = make_hook(true);
        hook.refresh().await.unwrap();

        hook.ctx.bus.emit(&BusEvent::Sync {
            event: SyncEvent::OrderDeleted {
                order_id: "order_1".into(),
            },
            origin: Origin::Remote,
        });

        assert!(hook.state().data().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_confirmation_settles_unsynced_order() {
        let (hook, _, _) = make_hook(true);
        hook.refresh().await.unwrap();
        hook.ctx.connectivity.set_online(false);
        hook.update_order_status("order_1", OrderStatus::Completed)
            .await
            .unwrap();
        assert!(!hook.state().data().unwrap()[0].synced);

        // the replay broadcasts the confirmed order after draining
        let mut confirmed = hook.state().data().unwrap()[0].clone();
        confirmed.synced = true;
        hook.ctx.bus.emit(&BusEvent::Sync {
            event: SyncEvent::OrderUpdated {
                order: confirmed.clone(),
            },
            origin: Origin::Local,
        });
        assert!(hook.state().data().unwrap()[0].synced);

        // with the copy settled, cross-terminal updates land again
        let mut remote = confirmed;
        remote.items[0].status = ItemStatus::Served;
        hook.ctx.bus.emit(&BusEvent::Sync {
            event: SyncEvent::OrderUpdated { order: remote },
            origin: Origin::Remote,
        });
        assert_eq!(
            hook.state().data().unwrap()[0].items[0].status,
            ItemStatus::Served
        );
    }
}
