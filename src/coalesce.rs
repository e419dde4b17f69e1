//! Request coalescing (singleflight pattern) for upstream fetches.
//!
//! When multiple tasks request the same upstream key concurrently — the same
//! project index or the same distribution file — this module ensures only one
//! actual upstream request is made. Other tasks wait for the result and share
//! it. Duplicate concurrent fetches for an identical key waste upstream
//! bandwidth and can race on cache writes, so they are treated as a
//! correctness bug, not an inefficiency.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// Result shared between the fetching task and any coalesced waiters.
///
/// Errors are flattened to their classification plus message because
/// [`AppError`] is not `Clone`; the two kinds that matter to waiters are
/// preserved exactly.
#[derive(Clone)]
enum FlightResult<T: Clone> {
    Success(T),
    NotFound(String),
    Unavailable(String),
}

impl<T: Clone> From<&AppResult<T>> for FlightResult<T> {
    fn from(result: &AppResult<T>) -> Self {
        match result {
            Ok(value) => FlightResult::Success(value.clone()),
            Err(AppError::NotFound(msg)) => FlightResult::NotFound(msg.clone()),
            Err(e) => FlightResult::Unavailable(e.to_string()),
        }
    }
}

impl<T: Clone> FlightResult<T> {
    fn into_result(self) -> AppResult<T> {
        match self {
            FlightResult::Success(value) => Ok(value),
            FlightResult::NotFound(msg) => Err(AppError::NotFound(msg)),
            FlightResult::Unavailable(msg) => Err(AppError::UpstreamUnavailable(msg)),
        }
    }
}

/// Single-flight coalescer keyed by string.
///
/// If a fetch for a key is in progress, subsequent requests for the same key
/// wait for the in-flight request rather than issuing duplicate upstream
/// calls. The lock is scoped to the key, so unrelated keys fetch
/// independently.
pub struct Coalescer<T: Clone> {
    /// In-flight requests (key -> broadcast sender)
    inflight: DashMap<String, broadcast::Sender<FlightResult<T>>>,
    /// Count of coalesced (deduplicated) requests
    coalesced_count: AtomicU64,
}

impl<T: Clone + Send + 'static> Coalescer<T> {
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
            coalesced_count: AtomicU64::new(0),
        }
    }

    /// Coalesce concurrent requests for the same key.
    ///
    /// If another task is already fetching this key, wait for that result.
    /// Otherwise execute `fetch` and broadcast the outcome to any waiting
    /// tasks.
    pub async fn coalesce<F, Fut>(&self, key: &str, fetch: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        if let Some(sender) = self.inflight.get(key) {
            let mut rx = sender.subscribe();
            drop(sender); // Release the map entry before awaiting

            debug!(key = %key, "Coalescing upstream request");
            self.coalesced_count.fetch_add(1, Ordering::Relaxed);

            if let Ok(result) = rx.recv().await {
                return result.into_result();
            }
            // Sender dropped without sending - fall through and fetch
            debug!(key = %key, "Coalesced request sender dropped, fetching directly");
        }

        let (tx, _rx) = broadcast::channel::<FlightResult<T>>(1);
        self.inflight.insert(key.to_string(), tx.clone());

        let result = fetch().await;

        // Broadcast to any waiters (ignore errors if none), then clear the
        // in-flight entry.
        let _ = tx.send(FlightResult::from(&result));
        self.inflight.remove(key);

        result
    }

    /// Count of requests that were answered by an in-flight fetch.
    pub fn coalesced_count(&self) -> u64 {
        self.coalesced_count.load(Ordering::Relaxed)
    }

    /// Number of currently in-flight requests.
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }
}

impl<T: Clone + Send + 'static> Default for Coalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_single_request() {
        let coalescer = Coalescer::new();

        let result = coalescer
            .coalesce("widget", || async { Ok(vec![1u8, 2, 3]) })
            .await;

        assert_eq!(result.unwrap(), vec![1, 2, 3]);
        assert_eq!(coalescer.coalesced_count(), 0);
    }

    #[tokio::test]
    async fn test_coalesced_requests() {
        let coalescer = Arc::new(Coalescer::new());
        let call_count = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coalescer = Arc::clone(&coalescer);
            let call_count = Arc::clone(&call_count);

            handles.push(tokio::spawn(async move {
                coalescer
                    .coalesce("shared-key", || {
                        let count = Arc::clone(&call_count);
                        async move {
                            // Simulate slow fetch
                            sleep(Duration::from_millis(100)).await;
                            count.fetch_add(1, Ordering::SeqCst);
                            Ok(vec![42u8])
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.unwrap(), vec![42]);
        }

        // Only one actual fetch should have happened (may be slightly more
        // due to timing, but significantly fewer than 5).
        assert!(call_count.load(Ordering::SeqCst) < 3);
        assert!(coalescer.coalesced_count() > 0);
    }

    #[tokio::test]
    async fn test_different_keys_not_coalesced() {
        let coalescer = Coalescer::new();

        let result1 = coalescer.coalesce("a", || async { Ok(1u32) }).await.unwrap();
        let result2 = coalescer.coalesce("b", || async { Ok(2u32) }).await.unwrap();

        assert_eq!(result1, 1);
        assert_eq!(result2, 2);
        assert_eq!(coalescer.coalesced_count(), 0);
    }

    #[tokio::test]
    async fn test_error_classification_survives_coalescing() {
        let coalescer: Coalescer<u32> = Coalescer::new();

        let not_found = coalescer
            .coalesce("missing", || async {
                Err(AppError::NotFound("no such project".to_string()))
            })
            .await;
        assert!(matches!(not_found, Err(AppError::NotFound(_))));

        let unavailable = coalescer
            .coalesce("down", || async {
                Err(AppError::UpstreamUnavailable("timed out".to_string()))
            })
            .await;
        assert!(matches!(unavailable, Err(AppError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_inflight_cleanup() {
        let coalescer = Coalescer::new();

        assert_eq!(coalescer.inflight_count(), 0);
        let _ = coalescer.coalesce("key", || async { Ok(1u8) }).await;
        assert_eq!(coalescer.inflight_count(), 0);
    }
}
