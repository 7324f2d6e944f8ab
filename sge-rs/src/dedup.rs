//! Coalescing of identical concurrent requests.
//!
//! [`RequestDeduplicator::run`] starts the request for a key only when none
//! is in flight; later callers for the same key await the same shared future
//! and observe the same outcome, success or failure.  The entry is removed
//! when the request completes, so the next call starts afresh.
//!
//! Each request is also driven by its own task, so it runs to completion
//! even when every caller stops waiting for it.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

type InFlight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

pub struct RequestDeduplicator<K, T, E> {
    in_flight: Arc<Mutex<HashMap<K, InFlight<T, E>>>>,
}

impl<K, T, E> Default for RequestDeduplicator<K, T, E> {
    fn default() -> Self {
        Self { in_flight: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<K, T, E> RequestDeduplicator<K, T, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start()` for `key` unless a request for it is already pending.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = {
            let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match map.get(&key) {
                Some(pending) => {
                    debug!(?key, "joining in-flight request");
                    pending.clone()
                }
                None => {
                    let request = start();
                    let registry: Weak<_> = Arc::downgrade(&self.in_flight);
                    let done_key = key.clone();
                    let shared = async move {
                        let outcome = request.await;
                        if let Some(registry) = registry.upgrade() {
                            registry
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .remove(&done_key);
                        }
                        outcome
                    }
                    .boxed()
                    .shared();
                    map.insert(key, shared.clone());
                    tokio::spawn(shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    /// Number of keys with a request pending.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Dedup = RequestDeduplicator<u32, String, String>;

    #[tokio::test]
    async fn concurrent_calls_share_one_execution() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let request = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, String>("done".to_string())
            }
        };

        let (a, b) = tokio::join!(
            dedup.run(500, request(calls.clone())),
            dedup.run(500, request(calls.clone())),
        );
        assert_eq!(a, Ok("done".into()));
        assert_eq!(b, Ok("done".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn failures_are_shared_too() {
        let dedup = Dedup::new();
        let (a, b) = tokio::join!(
            dedup.run(1, || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<String, _>("nope".to_string())
            }),
            dedup.run(1, || async { Ok("never runs".to_string()) }),
        );
        assert_eq!(a, Err("nope".into()));
        assert_eq!(b, Err("nope".into()));
    }

    #[tokio::test]
    async fn different_keys_run_independently() {
        let dedup = Dedup::new();
        let (a, b) = tokio::join!(
            dedup.run(1, || async { Ok("one".to_string()) }),
            dedup.run(2, || async { Ok("two".to_string()) }),
        );
        assert_eq!((a.unwrap(), b.unwrap()), ("one".into(), "two".into()));
    }

    #[tokio::test]
    async fn abandoned_request_still_completes() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let finished = calls.clone();

        let waited = tokio::time::timeout(
            Duration::from_millis(10),
            dedup.run(4, move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("late".to_string())
            }),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(dedup.in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn completed_key_starts_fresh() {
        let dedup = Dedup::new();
        assert_eq!(dedup.run(3, || async { Ok("first".to_string()) }).await, Ok("first".into()));
        assert_eq!(dedup.run(3, || async { Ok("second".to_string()) }).await, Ok("second".into()));
    }
}
