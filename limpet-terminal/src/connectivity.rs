//! Connectivity signal and monitor
//!
//! The signal is the single source of truth for "is this device
//! online": readable synchronously at mutation time, observable for
//! transition events by the replay loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusEvent, EventBus};

/// Shared online/offline flag with transition watching
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    tx: Arc<watch::Sender<bool>>,
    bus: EventBus,
}

impl ConnectivitySignal {
    /// Create the signal; terminals start pessimistically offline
    /// until the first successful probe
    pub fn new(bus: EventBus) -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx), bus }
    }

    /// Synchronous read, no await
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Flip the state; transitions are broadcast on the bus
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!(online = online, "Connectivity changed");
            self.bus.emit(&BusEvent::Connectivity { online });
        }
    }

    /// Watch for transitions (replay loop, UI indicator)
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Health probe used by the monitor
#[async_trait]
pub trait Prober: Send + Sync {
    /// True when the backend answered
    async fn probe(&self) -> bool;
}

/// HTTP health-check prober
#[derive(Debug)]
pub struct HttpProber {
    client: reqwest::Client,
    health_url: String,
}

impl HttpProber {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            health_url: format!("{}/api/health", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Health probe failed");
                false
            }
        }
    }
}

/// Consecutive failed probes before the signal flips offline
const OFFLINE_THRESHOLD: u32 = 3;

/// Periodic connectivity monitor
///
/// A single successful probe flips the signal online immediately;
/// going offline requires OFFLINE_THRESHOLD consecutive failures so
/// one dropped health check does not park the terminal in offline
/// mode.
pub struct ConnectivityMonitor {
    signal: ConnectivitySignal,
    prober: Arc<dyn Prober>,
    check_interval: Duration,
}

impl ConnectivityMonitor {
    pub fn new(
        signal: ConnectivitySignal,
        prober: Arc<dyn Prober>,
        check_interval: Duration,
    ) -> Self {
        Self {
            signal,
            prober,
            check_interval,
        }
    }

    /// Run until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.check_interval);
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Connectivity monitor stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if self.prober.probe().await {
                consecutive_failures = 0;
                self.signal.set_online(true);
            } else {
                consecutive_failures += 1;
                tracing::warn!(
                    "Health probe failed ({}/{})",
                    consecutive_failures,
                    OFFLINE_THRESHOLD
                );
                if consecutive_failures >= OFFLINE_THRESHOLD {
                    self.signal.set_online(false);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagProber(AtomicBool);

    #[async_trait]
    impl Prober for FlagProber {
        async fn probe(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_transition_emits_bus_event() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = bus.subscribe("connectivity", move |event| {
            if let BusEvent::Connectivity { online } = event {
                seen_clone.lock().unwrap().push(*online);
            }
        });

        let signal = ConnectivitySignal::new(bus);
        signal.set_online(true);
        signal.set_online(true); // no transition, no event
        signal.set_online(false);

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_watch_sees_transitions() {
        let signal = ConnectivitySignal::new(EventBus::new());
        let mut rx = signal.watch();
        assert!(!*rx.borrow());

        signal.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_needs_consecutive_failures_to_go_offline() {
        let bus = EventBus::new();
        let signal = ConnectivitySignal::new(bus);
        let prober = Arc::new(FlagProber(AtomicBool::new(true)));

        let monitor = ConnectivityMonitor::new(
            signal.clone(),
            prober.clone(),
            Duration::from_secs(1),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(cancel.clone()));

        tokio::time::advance(Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;
        assert!(signal.is_online());

        prober.0.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        // one failure is not enough
        assert!(signal.is_online());

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(!signal.is_online());

        cancel.cancel();
        let _ = handle.await;
    }
}
