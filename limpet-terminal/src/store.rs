//! Persistent local store
//!
//! Durable keyed storage that survives process restarts: open shifts,
//! the business day, orders, queued offline mutations and pending log
//! batches all live here. One JSON file per collection, loaded into
//! memory on first touch and written through on every change.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use shared::StoreError;

/// Collection names used by the terminal core
pub mod collections {
    pub const SHIFTS: &str = "shifts";
    pub const BUSINESS_DAYS: &str = "business_days";
    pub const ORDERS: &str = "orders";
    pub const OFFLINE_MUTATIONS: &str = "offline_mutations";
    pub const LOG_BATCHES: &str = "log_batches";
}

/// Keyed persistent storage, one logical record per (collection, id)
#[async_trait]
pub trait LocalStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;
    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, StoreError>;
    async fn put(&self, collection: &str, record: Value) -> Result<(), StoreError>;
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;
}

fn record_id(record: &Value) -> Result<String, StoreError> {
    record
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(StoreError::MissingId)
}

/// Typed read helper
pub async fn get_as<T: DeserializeOwned>(
    store: &Arc<dyn LocalStore>,
    collection: &str,
    id: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(collection, id).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Typed scan helper; records that no longer deserialize are skipped
/// with a warning rather than failing the whole scan
pub async fn get_all_as<T: DeserializeOwned>(
    store: &Arc<dyn LocalStore>,
    collection: &str,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for value in store.get_all(collection).await? {
        match serde_json::from_value(value) {
            Ok(record) => out.push(record),
            Err(e) => {
                tracing::warn!(collection = %collection, error = %e, "Skipping undecodable record");
            }
        }
    }
    Ok(out)
}

/// Typed write helper
pub async fn put_as<T: Serialize>(
    store: &Arc<dyn LocalStore>,
    collection: &str,
    record: &T,
) -> Result<(), StoreError> {
    store.put(collection, serde_json::to_value(record)?).await
}

/// JSON-file-backed store: `{data_dir}/{collection}.json`
///
/// Collections are ordered maps so `get_all` iteration is stable
/// across restarts. The collection table lock is held across every
/// read-modify-write, so two tasks can never interleave between a
/// read and the write that follows it.
#[derive(Debug)]
pub struct JsonFileStore {
    data_dir: PathBuf,
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            collections: Mutex::new(HashMap::new()),
        }
    }

    fn file_path(&self, collection: &str) -> PathBuf {
        self.data_dir.join(format!("{collection}.json"))
    }

    /// Load a collection from disk on first touch
    async fn ensure_loaded(
        &self,
        collections: &mut HashMap<String, BTreeMap<String, Value>>,
        collection: &str,
    ) -> Result<(), StoreError> {
        if collections.contains_key(collection) {
            return Ok(());
        }
        let path = self.file_path(collection);
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        collections.insert(collection.to_string(), records);
        Ok(())
    }

    async fn save(
        &self,
        collection: &str,
        records: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let content = serde_json::to_string_pretty(records)?;
        tokio::fs::write(self.file_path(collection), content).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for JsonFileStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let mut collections = self.collections.lock().await;
        self.ensure_loaded(&mut collections, collection).await?;
        Ok(collections[collection].get(id).cloned())
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let mut collections = self.collections.lock().await;
        self.ensure_loaded(&mut collections, collection).await?;
        Ok(collections[collection].values().cloned().collect())
    }

    async fn put(&self, collection: &str, record: Value) -> Result<(), StoreError> {
        let id = record_id(&record)?;
        let mut collections = self.collections.lock().await;
        self.ensure_loaded(&mut collections, collection).await?;
        let records = collections
            .get_mut(collection)
            .expect("collection loaded above");
        records.insert(id, record);
        self.save(collection, records).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().await;
        self.ensure_loaded(&mut collections, collection).await?;
        let records = collections
            .get_mut(collection)
            .expect("collection loaded above");
        if records.remove(id).is_some() {
            self.save(collection, records).await?;
        }
        Ok(())
    }
}

/// In-memory store for in-process use and tests
///
/// Also the degraded-mode fallback when persistent storage is
/// unavailable: same contract, nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.lock().await;
        Ok(collections
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned())
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.lock().await;
        Ok(collections
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put(&self, collection: &str, record: Value) -> Result<(), StoreError> {
        let id = record_id(&record)?;
        let mut collections = self.collections.lock().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, record);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().await;
        if let Some(records) = collections.get_mut(collection) {
            records.remove(id);
        }
        Ok(())
    }
}
