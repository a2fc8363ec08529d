// Coalesces concurrent identical calls into a single execution.

use std::{collections::HashMap, future::Future, sync::Arc};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::ApiError;

type Pending<T> = Shared<BoxFuture<'static, Result<T, ApiError>>>;

/// Registry of in-flight executions keyed by deduplication key.
///
/// The first caller for a key spawns the execution; later callers for the same
/// key await the same shared outcome. The execution runs on its own task, so it
/// completes (and deregisters itself) even if every caller is dropped.
pub struct RequestDeduplicator<T> {
    pending: Arc<Mutex<HashMap<String, Pending<T>>>>,
}

impl<T> Default for RequestDeduplicator<T> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deduplicate<F, Fut>(&self, key: &str, f: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let shared = {
            let mut pending = self.pending.lock();
            match pending.get(key) {
                Some(existing) => {
                    tracing::debug!(key, "joining in-flight request");
                    existing.clone()
                }
                None => {
                    let registry = Arc::clone(&self.pending);
                    let owned_key = key.to_string();
                    let execution = f();

                    // Registration happens under this lock, so the task's removal
                    // cannot run before the insert below.
                    let handle = tokio::spawn(async move {
                        let result = execution.await;
                        registry.lock().remove(&owned_key);
                        result
                    });

                    let shared = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(err) => Err(ApiError::Internal(format!(
                                "deduplicated execution failed: {err}"
                            ))),
                        }
                    }
                    .boxed()
                    .shared();

                    pending.insert(key.to_string(), shared.clone());
                    shared
                }
            }
        };

        shared.await
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_execution() {
        let dedup = Arc::new(RequestDeduplicator::<String>::new());
        let calls = Arc::new(AtomicU32::new(0));
        let release = Arc::new(Notify::new());

        let spawn_caller = || {
            let dedup = dedup.clone();
            let calls = calls.clone();
            let release = release.clone();
            tokio::spawn(async move {
                dedup
                    .deduplicate("options:42", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok("option-A".to_string())
                    })
                    .await
            })
        };

        let first = spawn_caller();
        let second = spawn_caller();

        while dedup.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();

        assert_eq!(first.await.unwrap(), Ok("option-A".to_string()));
        assert_eq!(second.await.unwrap(), Ok("option-A".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_coalesced_failure_reaches_every_caller() {
        let dedup = RequestDeduplicator::<u32>::new();
        let calls = Arc::new(AtomicU32::new(0));

        let make = || {
            let calls = calls.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(ApiError::ApiResponseError {
                    status_code: 503,
                    message: "Service temporarily unavailable".to_string(),
                })
            }
        };

        let (a, b) = tokio::join!(
            dedup.deduplicate("price:1", make()),
            dedup.deduplicate("price:1", make())
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(a.is_err());
        assert_eq!(a, b);
        assert!(!dedup.is_pending("price:1"));
    }

    #[tokio::test]
    async fn test_settled_key_runs_again() {
        let dedup = RequestDeduplicator::<u32>::new();
        let calls = Arc::new(AtomicU32::new(0));

        for expected in 1..=2 {
            let calls = calls.clone();
            let value = dedup
                .deduplicate("dates:7", move || async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await;
            assert_eq!(value, Ok(expected));
        }
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_coalesce() {
        let dedup = RequestDeduplicator::<&'static str>::new();
        let (a, b) = tokio::join!(
            dedup.deduplicate("a", || async { Ok("a") }),
            dedup.deduplicate("b", || async { Ok("b") })
        );
        assert_eq!((a, b), (Ok("a"), Ok("b")));
    }

    #[tokio::test]
    async fn test_execution_survives_dropped_caller() {
        let dedup = Arc::new(RequestDeduplicator::<u32>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let leader = {
            let dedup = dedup.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                dedup
                    .deduplicate("detail:9", move || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(9)
                    })
                    .await
            })
        };

        while !dedup.is_pending("detail:9") {
            tokio::task::yield_now().await;
        }
        leader.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!dedup.is_pending("detail:9"));
    }
}
