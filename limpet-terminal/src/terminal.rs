//! Terminal assembly
//!
//! Builds the whole runtime out of its parts, wires them together and
//! owns the background tasks. Nothing here is a global: every
//! collaborator is constructed once and handed to whoever needs it,
//! so tests can assemble the same graph around fakes.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shared::sync::SyncEnvelope;

use crate::bus::EventBus;
use crate::cache::RequestCache;
use crate::config::TerminalConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivitySignal, HttpProber};
use crate::hooks::{BusinessDayHook, CashierHook, HookContext, OrderHook};
use crate::logging::{DualTransport, HttpBatchTransport, LogPipeline, LogTransport, Logger, TcpLogTransport};
use crate::notify::Notifier;
use crate::replay::{OfflineReplay, ReplayHandle};
use crate::services::HttpServices;
use crate::store::{JsonFileStore, LocalStore};
use crate::sync_listener::SyncListener;

pub struct Terminal {
    pub cashier: CashierHook,
    pub orders: OrderHook,
    pub business_day: BusinessDayHook,
    pub bus: EventBus,
    pub connectivity: ConnectivitySignal,
    pub logger: Logger,
    pub replay: ReplayHandle,
    store: Arc<dyn LocalStore>,
    sync_tx: mpsc::Sender<SyncEnvelope>,
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Terminal {
    /// Assemble and start a terminal against the given backend
    pub async fn start(config: TerminalConfig) -> anyhow::Result<Self> {
        let bus = EventBus::new();
        let cache = Arc::new(RequestCache::new());
        let store: Arc<dyn LocalStore> = Arc::new(JsonFileStore::new(&config.data_dir));
        let connectivity = ConnectivitySignal::new(bus.clone());
        let notifier = Notifier::new(bus.clone());
        let cancel = CancellationToken::new();

        let mut services = HttpServices::new(config.base_url.as_str(), config.timeout)
            .context("building backend client")?;
        if let Some(token) = &config.token {
            services = services.with_token(token);
        }
        let services = Arc::new(services);

        let ctx = HookContext {
            store: store.clone(),
            cache: cache.clone(),
            bus: bus.clone(),
            connectivity: connectivity.clone(),
            notifier: notifier.clone(),
        };
        let cashier = CashierHook::new(ctx.clone(), services.clone(), config.cache_ttl);
        let orders = OrderHook::new(ctx.clone(), services.clone(), config.cache_ttl);
        let business_day = BusinessDayHook::new(ctx, services.clone(), config.cache_ttl);

        let mut tasks = Vec::new();

        let prober = HttpProber::new(&config.base_url, config.timeout)
            .context("building health prober")?;
        let monitor =
            ConnectivityMonitor::new(connectivity.clone(), Arc::new(prober), config.probe_interval);
        tasks.push(tokio::spawn(monitor.run(cancel.clone())));

        let (replay, replay_handle) = OfflineReplay::new(
            store.clone(),
            cache.clone(),
            bus.clone(),
            connectivity.clone(),
            notifier,
            services.clone(),
            services.clone(),
            services.clone(),
            config.replay_interval,
        );
        tasks.push(tokio::spawn(replay.run(cancel.clone())));

        let (sync_tx, sync_rx) = mpsc::channel(64);
        let listener = SyncListener::new(store.clone(), cache, bus.clone(), sync_rx);
        tasks.push(tokio::spawn(listener.run(cancel.clone())));

        let http_transport = Arc::new(HttpBatchTransport::new(services));
        let transport: Arc<dyn LogTransport> = match &config.log_tcp_addr {
            Some(addr) => Arc::new(DualTransport::new(
                Arc::new(TcpLogTransport::new(addr)),
                http_transport,
            )),
            None => http_transport,
        };
        let (pipeline, logger) = LogPipeline::new(
            store.clone(),
            transport,
            config.source.clone(),
            config.device_id.clone(),
            config.log_batch_size,
            config.log_flush_interval,
            config.log_max_retries,
        );
        tasks.push(tokio::spawn(pipeline.run(cancel.clone())));

        let terminal = Self {
            cashier,
            orders,
            business_day,
            bus,
            connectivity,
            logger,
            replay: replay_handle,
            store,
            sync_tx,
            cancel,
            tasks,
        };
        terminal.load_local().await;
        Ok(terminal)
    }

    /// Rehydrate in-memory state from the local store (restart path)
    pub async fn load_local(&self) {
        self.cashier.load_local().await;
        self.orders.load_local().await;
        self.business_day.load_local().await;
    }

    /// Where inbound change notifications are fed
    pub fn sync_sender(&self) -> mpsc::Sender<SyncEnvelope> {
        self.sync_tx.clone()
    }

    /// The local store, mostly for diagnostics
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Stop background tasks; the log pipeline flushes on the way out
    pub async fn shutdown(self) {
        self.logger.flush().await;
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}
