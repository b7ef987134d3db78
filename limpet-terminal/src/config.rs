//! Terminal configuration

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one terminal instance
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Backend base URL (e.g., "http://localhost:8080")
    pub base_url: String,

    /// Identifier of this device in sync and telemetry traffic
    pub device_id: String,

    /// Origin tag for telemetry entries (e.g., "pos", "kitchen")
    pub source: String,

    /// Bearer token for authenticated calls
    pub token: Option<String>,

    /// Request timeout for backend calls
    pub timeout: Duration,

    /// Directory for the local JSON store
    pub data_dir: PathBuf,

    /// How long memoized reads stay fresh
    pub cache_ttl: Duration,

    /// Health probe cadence
    pub probe_interval: Duration,

    /// Backstop cadence for offline queue drains
    pub replay_interval: Duration,

    /// Entries per telemetry batch
    pub log_batch_size: usize,

    /// Maximum time an entry waits before a batch ships anyway
    pub log_flush_interval: Duration,

    /// Failed deliveries before a batch is parked locally
    pub log_max_retries: u32,

    /// TCP log collector address; None keeps HTTP-only shipping
    pub log_tcp_addr: Option<String>,
}

impl TerminalConfig {
    pub fn new(base_url: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            device_id: device_id.into(),
            source: "pos".into(),
            token: None,
            timeout: Duration::from_secs(10),
            data_dir: PathBuf::from("./data"),
            cache_ttl: Duration::from_secs(5),
            probe_interval: Duration::from_secs(5),
            replay_interval: Duration::from_secs(30),
            log_batch_size: 50,
            log_flush_interval: Duration::from_secs(10),
            log_max_retries: 3,
            log_tcp_addr: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_replay_interval(mut self, interval: Duration) -> Self {
        self.replay_interval = interval;
        self
    }

    pub fn with_log_batching(
        mut self,
        batch_size: usize,
        flush_interval: Duration,
        max_retries: u32,
    ) -> Self {
        self.log_batch_size = batch_size;
        self.log_flush_interval = flush_interval;
        self.log_max_retries = max_retries;
        self
    }

    pub fn with_log_tcp_addr(mut self, addr: impl Into<String>) -> Self {
        self.log_tcp_addr = Some(addr.into());
        self
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080", "terminal_1")
    }
}
