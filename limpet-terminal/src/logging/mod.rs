//! Telemetry logging pipeline
//!
//! Business/audit logging, separate from process tracing: entries are
//! buffered on the terminal and shipped off-device in batches. A batch
//! leaves when it is full or when the flush interval elapses; critical
//! entries are written to the local store before any network attempt,
//! so a crash between "logged" and "delivered" cannot lose them.

pub mod transport;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shared::models::{LogEntry, LogLevel};

use crate::store::{LocalStore, collections};
pub use transport::{DualTransport, HttpBatchTransport, LogTransport, TcpLogTransport};

/// A batch parked in the local store until delivery succeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedBatch {
    id: String,
    entries: Vec<LogEntry>,
    persisted_at: DateTime<Utc>,
}

impl PersistedBatch {
    fn new(entries: Vec<LogEntry>) -> Self {
        Self {
            id: format!("batch_{}", Uuid::new_v4()),
            entries,
            persisted_at: Utc::now(),
        }
    }
}

enum LogCommand {
    Entry(LogEntry),
    Flush(oneshot::Sender<()>),
}

/// Clone-able logging handle
///
/// Cheap to pass around; every call is a non-blocking channel send.
/// When the pipeline is gone (shutdown) entries are dropped silently,
/// logging must never take the terminal down with it.
#[derive(Debug, Clone)]
pub struct Logger {
    tx: mpsc::Sender<LogCommand>,
    source: String,
    device_id: String,
    shift_id: Arc<std::sync::Mutex<Option<String>>>,
}

impl Logger {
    /// Tag subsequent entries with the active shift
    pub fn set_shift(&self, shift_id: Option<String>) {
        *self.shift_id.lock().expect("shift id lock") = shift_id;
    }

    pub fn debug(&self, module: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, module, message, None);
    }

    pub fn info(&self, module: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, module, message, None);
    }

    pub fn warn(&self, module: &str, message: impl Into<String>) {
        self.log(LogLevel::Warning, module, message, None);
    }

    pub fn error(&self, module: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, module, message, None);
    }

    pub fn critical(&self, module: &str, message: impl Into<String>) {
        self.log(LogLevel::Critical, module, message, None);
    }

    pub fn log(
        &self,
        level: LogLevel,
        module: &str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        let mut entry = LogEntry::new(level, self.source.clone(), module, message);
        entry.device_id = self.device_id.clone();
        entry.shift_id = self.shift_id.lock().expect("shift id lock").clone();
        entry.details = details;
        if self.tx.try_send(LogCommand::Entry(entry)).is_err() {
            tracing::debug!("Log pipeline unavailable, entry dropped");
        }
    }

    /// Force a flush and wait for it to complete
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(LogCommand::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Batching/retry loop behind [`Logger`]
pub struct LogPipeline {
    store: Arc<dyn LocalStore>,
    transport: Arc<dyn LogTransport>,
    batch_size: usize,
    flush_interval: Duration,
    max_retries: u32,
    rx: mpsc::Receiver<LogCommand>,
    buffer: VecDeque<LogEntry>,
    retry_count: u32,
}

impl LogPipeline {
    pub fn new(
        store: Arc<dyn LocalStore>,
        transport: Arc<dyn LogTransport>,
        source: impl Into<String>,
        device_id: impl Into<String>,
        batch_size: usize,
        flush_interval: Duration,
        max_retries: u32,
    ) -> (Self, Logger) {
        let (tx, rx) = mpsc::channel(1024);
        let pipeline = Self {
            store,
            transport,
            batch_size: batch_size.max(1),
            flush_interval,
            max_retries,
            rx,
            buffer: VecDeque::new(),
            retry_count: 0,
        };
        let logger = Logger {
            tx,
            source: source.into(),
            device_id: device_id.into(),
            shift_id: Arc::new(std::sync::Mutex::new(None)),
        };
        (pipeline, logger)
    }

    /// Run until cancelled; ends with a best-effort final flush
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.buffer.is_empty() {
                        self.flush().await;
                    }
                }
                command = self.rx.recv() => match command {
                    Some(LogCommand::Entry(entry)) => self.ingest(entry).await,
                    Some(LogCommand::Flush(ack)) => {
                        self.flush().await;
                        let _ = ack.send(());
                    }
                    None => break,
                },
            }
        }

        // best-effort shutdown flush; anything undeliverable is
        // parked so the next session can ship it
        if !self.buffer.is_empty() {
            self.flush().await;
        }
        if !self.buffer.is_empty() {
            let record = PersistedBatch::new(self.buffer.drain(..).collect());
            if let Err(e) =
                crate::store::put_as(&self.store, collections::LOG_BATCHES, &record).await
            {
                tracing::error!(error = %e, "Could not park final log batch");
            }
        }
        tracing::debug!("Log pipeline stopped");
    }

    async fn ingest(&mut self, entry: LogEntry) {
        let critical = entry.level >= LogLevel::Critical;
        if critical {
            // durable before any network attempt
            let record = PersistedBatch::new(vec![entry.clone()]);
            if let Err(e) =
                crate::store::put_as(&self.store, collections::LOG_BATCHES, &record).await
            {
                tracing::warn!(error = %e, "Could not persist critical log entry");
            }
        }
        self.buffer.push_back(entry);

        if critical || self.buffer.len() >= self.batch_size {
            self.flush().await;
        }
    }

    /// Ship the buffer, then any batches parked in the store
    async fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let batch: Vec<LogEntry> = self.buffer.drain(..).collect();
            match self.transport.send_batch(&batch).await {
                Ok(()) => {
                    self.retry_count = 0;
                    self.purge_delivered(&batch).await;
                }
                Err(e) => {
                    self.retry_count += 1;
                    if self.retry_count > self.max_retries {
                        tracing::warn!(
                            error = %e,
                            entries = batch.len(),
                            "Log delivery retries exhausted, parking batch locally"
                        );
                        let record = PersistedBatch::new(batch);
                        if let Err(e) = crate::store::put_as(
                            &self.store,
                            collections::LOG_BATCHES,
                            &record,
                        )
                        .await
                        {
                            tracing::error!(error = %e, "Could not park log batch, entries lost");
                        }
                        self.retry_count = 0;
                    } else {
                        tracing::debug!(error = %e, attempt = self.retry_count, "Log delivery failed, will retry");
                        for entry in batch.into_iter().rev() {
                            self.buffer.push_front(entry);
                        }
                    }
                    return;
                }
            }
        }
        self.redeliver_parked().await;
    }

    /// Critical entries are stored as single-entry batches before the
    /// send; once their batch is acknowledged the copies can go.
    async fn purge_delivered(&self, batch: &[LogEntry]) {
        let parked: Vec<PersistedBatch> =
            match crate::store::get_all_as(&self.store, collections::LOG_BATCHES).await {
                Ok(parked) => parked,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not scan parked log batches");
                    return;
                }
            };
        for record in parked {
            let delivered = record
                .entries
                .iter()
                .all(|e| batch.iter().any(|sent| sent.id == e.id));
            if delivered {
                if let Err(e) = self.store.delete(collections::LOG_BATCHES, &record.id).await {
                    tracing::warn!(batch_id = %record.id, error = %e, "Could not purge delivered batch");
                }
            }
        }
    }

    async fn redeliver_parked(&mut self) {
        let parked: Vec<PersistedBatch> =
            match crate::store::get_all_as(&self.store, collections::LOG_BATCHES).await {
                Ok(parked) => parked,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not scan parked log batches");
                    return;
                }
            };

        for record in parked {
            match self.transport.send_batch(&record.entries).await {
                Ok(()) => {
                    if let Err(e) = self.store.delete(collections::LOG_BATCHES, &record.id).await {
                        tracing::warn!(batch_id = %record.id, error = %e, "Could not purge delivered batch");
                    }
                }
                // transport is down again; later flushes will retry
                Err(_) => return,
            }
        }
    }
}
