//! Log shipping transports
//!
//! The pipeline ships batches over a raw TCP collector socket when one
//! is reachable and falls back to the HTTP batch endpoint otherwise.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use shared::ServiceError;
use shared::models::LogEntry;

use crate::services::LogService;

/// Byte the collector answers with when a frame was accepted
const ACK: u8 = 0x06;

/// One-way batch shipper
#[async_trait]
pub trait LogTransport: Send + Sync + std::fmt::Debug {
    /// Deliver a batch; Ok means the receiver acknowledged it
    async fn send_batch(&self, entries: &[LogEntry]) -> Result<(), ServiceError>;
}

/// TCP collector transport
///
/// Frames are a 4-byte little-endian payload length followed by the
/// JSON-encoded batch; the collector answers each frame with a single
/// ACK byte. The connection is dialed lazily and dropped on any error
/// so the next attempt starts clean.
#[derive(Debug)]
pub struct TcpLogTransport {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpLogTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: Mutex::new(None),
        }
    }

    async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
        stream
            .write_all(&(payload.len() as u32).to_le_bytes())
            .await?;
        stream.write_all(payload).await?;
        stream.flush().await?;

        let mut ack = [0u8; 1];
        stream.read_exact(&mut ack).await?;
        if ack[0] != ACK {
            return Err(std::io::Error::other("collector rejected frame"));
        }
        Ok(())
    }
}

#[async_trait]
impl LogTransport for TcpLogTransport {
    async fn send_batch(&self, entries: &[LogEntry]) -> Result<(), ServiceError> {
        let payload =
            serde_json::to_vec(entries).map_err(|e| ServiceError::Decode(e.to_string()))?;

        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| ServiceError::Connection(e.to_string()))?;
            *guard = Some(stream);
        }
        let stream = guard.as_mut().expect("connected above");

        match Self::write_frame(stream, &payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // a half-dead connection must not poison later sends
                *guard = None;
                Err(ServiceError::Connection(e.to_string()))
            }
        }
    }
}

/// HTTP fallback transport over the batch ingestion endpoint
#[derive(Clone)]
pub struct HttpBatchTransport {
    service: Arc<dyn LogService>,
}

impl HttpBatchTransport {
    pub fn new(service: Arc<dyn LogService>) -> Self {
        Self { service }
    }
}

impl std::fmt::Debug for HttpBatchTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBatchTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl LogTransport for HttpBatchTransport {
    async fn send_batch(&self, entries: &[LogEntry]) -> Result<(), ServiceError> {
        self.service.post_batch(entries).await
    }
}

/// Primary/fallback pair
///
/// Every attempt tries the primary first; the fallback only runs when
/// the primary fails, and its result decides the attempt.
#[derive(Debug)]
pub struct DualTransport {
    primary: Arc<dyn LogTransport>,
    fallback: Arc<dyn LogTransport>,
}

impl DualTransport {
    pub fn new(primary: Arc<dyn LogTransport>, fallback: Arc<dyn LogTransport>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl LogTransport for DualTransport {
    async fn send_batch(&self, entries: &[LogEntry]) -> Result<(), ServiceError> {
        match self.primary.send_batch(entries).await {
            Ok(()) => Ok(()),
            Err(primary_error) => {
                tracing::debug!(error = %primary_error, "Primary log transport failed, using fallback");
                self.fallback.send_batch(entries).await
            }
        }
    }
}
