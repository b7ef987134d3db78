//! Request cache
//!
//! Short-TTL memoization plus de-duplication for read requests: a
//! burst of components asking the same question within one render
//! pass shares a single in-flight call instead of hammering the
//! service. Entries live for the process lifetime at most and are
//! never persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

use shared::ServiceError;

type SharedResult = Result<Value, Arc<ServiceError>>;
type SharedFuture = Shared<BoxFuture<'static, SharedResult>>;

struct CacheEntry {
    future: SharedFuture,
    expires_at: Instant,
}

/// In-memory request cache keyed by opaque string keys
///
/// Keys follow a `domain:detail` convention (`cashier:active`,
/// `order:order_123`) so whole domains can be invalidated by prefix.
#[derive(Default)]
pub struct RequestCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live entry for `key`, or run `producer` and cache it
    ///
    /// Concurrent callers with the same key during the in-flight
    /// window await the same underlying future; the producer runs
    /// exactly once. A producer error is handed to every waiter but
    /// not kept, so the next call re-fetches.
    pub async fn execute<F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> SharedResult
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, ServiceError>> + Send + 'static,
    {
        let future = {
            let mut entries = self.entries.lock().expect("cache lock poisoned");
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => entry.future.clone(),
                _ => {
                    let future: SharedFuture =
                        producer().map(|r| r.map_err(Arc::new)).boxed().shared();
                    entries.insert(
                        key.to_string(),
                        CacheEntry {
                            future: future.clone(),
                            expires_at: Instant::now() + ttl,
                        },
                    );
                    future
                }
            }
        };

        let result = future.clone().await;
        if result.is_err() {
            // Drop the failed entry unless a newer one replaced it
            let mut entries = self.entries.lock().expect("cache lock poisoned");
            if let Some(entry) = entries.get(key) {
                if entry.future.ptr_eq(&future) {
                    entries.remove(key);
                }
            }
        }
        result
    }

    /// Typed variant of [`execute`](Self::execute)
    pub async fn execute_as<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<T, Arc<ServiceError>>
    where
        T: DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, ServiceError>> + Send + 'static,
    {
        let value = self.execute(key, ttl, producer).await?;
        serde_json::from_value(value)
            .map_err(|e| Arc::new(ServiceError::Decode(format!("cached value for {key}: {e}"))))
    }

    /// Remove one entry, forcing the next `execute` to re-fetch
    pub fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.remove(key);
    }

    /// Remove every entry whose key starts with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.retain(|key, _| !key.starts_with(prefix));
    }

    /// Drop everything (used on teardown and full re-sync)
    pub fn clear(&self) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.clear();
    }
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.entries.lock().map(|e| e.len()).unwrap_or(0);
        f.debug_struct("RequestCache").field("entries", &len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_producer(
        counter: Arc<AtomicUsize>,
        value: Value,
    ) -> impl std::future::Future<Output = Result<Value, ServiceError>> + Send + 'static {
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(value)
        }
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_producer_invocation() {
        let cache = Arc::new(RequestCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .execute("cashier:active", Duration::from_secs(5), || {
                        counting_producer(calls, serde_json::json!({"id": "shift_1"}))
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result["id"], "shift_1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_refetches() {
        let cache = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let _ = cache
            .execute("cashier:active", Duration::from_millis(100), || {
                counting_producer(calls.clone(), Value::Null)
            })
            .await;
        tokio::time::advance(Duration::from_millis(150)).await;
        let _ = cache
            .execute("cashier:active", Duration::from_millis(100), || {
                counting_producer(calls.clone(), Value::Null)
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_live_entry_skips_producer() {
        let cache = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let _ = cache
                .execute("order:order_1", Duration::from_secs(60), || {
                    counting_producer(calls.clone(), Value::Null)
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let _ = cache
            .execute("order:order_1", Duration::from_secs(60), || {
                counting_producer(calls.clone(), Value::Null)
            })
            .await;
        cache.invalidate("order:order_1");
        let _ = cache
            .execute("order:order_1", Duration::from_secs(60), || {
                counting_producer(calls.clone(), Value::Null)
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_prefix_only_hits_matching_keys() {
        let cache = RequestCache::new();
        let order_calls = Arc::new(AtomicUsize::new(0));
        let shift_calls = Arc::new(AtomicUsize::new(0));

        let _ = cache
            .execute("order:order_1", Duration::from_secs(60), || {
                counting_producer(order_calls.clone(), Value::Null)
            })
            .await;
        let _ = cache
            .execute("cashier:active", Duration::from_secs(60), || {
                counting_producer(shift_calls.clone(), Value::Null)
            })
            .await;

        cache.invalidate_prefix("order:");

        let _ = cache
            .execute("order:order_1", Duration::from_secs(60), || {
                counting_producer(order_calls.clone(), Value::Null)
            })
            .await;
        let _ = cache
            .execute("cashier:active", Duration::from_secs(60), || {
                counting_producer(shift_calls.clone(), Value::Null)
            })
            .await;

        assert_eq!(order_calls.load(Ordering::SeqCst), 2);
        assert_eq!(shift_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_producer_error_is_not_cached() {
        let cache = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<Value, _>(ServiceError::Connection("refused".into()))
        };

        let first = cache
            .execute("cashier:active", Duration::from_secs(60), || {
                failing(calls.clone())
            })
            .await;
        assert!(first.is_err());

        let _ = cache
            .execute("cashier:active", Duration::from_secs(60), || {
                counting_producer(calls.clone(), Value::Null)
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
