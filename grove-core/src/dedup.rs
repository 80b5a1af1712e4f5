//! In-flight request deduplication.
//!
//! Concurrent asynchronous operations that share a caller-supplied key are
//! coalesced: the first call invokes the operation, every overlapping call
//! awaits the same shared future, and all of them observe the identical
//! settled result or failure. The entry is removed when the operation
//! settles either way, so a failed call never blocks later attempts under
//! the same key.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::debug;

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Coalesces concurrent identical operations under one key.
///
/// `T` and `E` must be `Clone` because every coalesced caller receives its
/// own copy of the one settled result.
pub struct Deduplicator<T, E> {
    in_flight: Arc<Mutex<HashMap<String, SharedResult<T, E>>>>,
}

impl<T, E> Deduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `op` under `key`, or join an operation already in flight for it.
    ///
    /// `op` is only invoked when no entry exists for `key` at call time.
    pub async fn execute<F, Fut>(&self, key: &str, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(existing) = in_flight.get(key) {
                debug!(key, "Joining in-flight request");
                existing.clone()
            } else {
                let map = Arc::clone(&self.in_flight);
                let owned_key = key.to_string();
                let fut = op();
                let wrapped = async move {
                    let result = fut.await;
                    // Settled (success or failure): release the key.
                    map.lock().unwrap().remove(&owned_key);
                    result
                }
                .boxed()
                .shared();
                in_flight.insert(key.to_string(), wrapped.clone());
                wrapped
            }
        };

        shared.await
    }

    /// Number of operations currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Drop every tracked entry. In-flight operations keep running; their
    /// settled results are simply no longer joinable.
    pub fn clear(&self) {
        self.in_flight.lock().unwrap().clear();
    }
}

impl<T, E> Default for Deduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_calls_invoke_operation_once() {
        let dedup: Deduplicator<u32, String> = Deduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let op = |calls: Arc<AtomicUsize>, value: u32| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<u32, String>(value)
            }
        };

        let (a, b) = tokio::join!(
            dedup.execute("profile:get", op(Arc::clone(&calls), 7)),
            // The second closure would return a different value if invoked.
            dedup.execute("profile:get", op(Arc::clone(&calls), 99)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let dedup: Deduplicator<u32, String> = Deduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let op = |calls: Arc<AtomicUsize>, value: u32| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, String>(value)
            }
        };

        let (a, b) = tokio::join!(
            dedup.execute("logs:1", op(Arc::clone(&calls), 1)),
            dedup.execute("logs:2", op(Arc::clone(&calls), 2)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failure_shared_then_entry_released() {
        let dedup: Deduplicator<u32, String> = Deduplicator::new();

        let (a, b) = tokio::join!(
            dedup.execute("key", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<u32, String>("boom".to_string())
            }),
            dedup.execute("key", || async { Ok::<u32, String>(1) }),
        );

        // Both callers observe the identical failure.
        assert_eq!(a.unwrap_err(), "boom");
        assert_eq!(b.unwrap_err(), "boom");

        // The failed entry does not poison the key.
        assert_eq!(dedup.in_flight_count(), 0);
        let again = dedup.execute("key", || async { Ok::<u32, String>(5) }).await;
        assert_eq!(again.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_entry_removed_after_success() {
        let dedup: Deduplicator<u32, String> = Deduplicator::new();

        let result = dedup.execute("key", || async { Ok::<u32, String>(3) }).await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(dedup.in_flight_count(), 0);
    }
}
