//! Collapses concurrent identical collections onto one in-flight future

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};

type SharedFuture<T> = Shared<BoxFuture<'static, T>>;

/// Keyed set of in-flight futures
///
/// The first caller for a key starts the work; callers arriving while it
/// runs await the same result. The entry is removed by whichever awaiter
/// observes completion first, so a later call starts a fresh collection.
pub struct Inflight<T: Clone> {
    pending: DashMap<String, SharedFuture<T>>,
}

impl<T> Default for Inflight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Inflight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    pub async fn run<F>(&self, key: &str, start: F) -> T
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        // The entry guard must be released before awaiting
        let fut = match self.pending.entry(key.to_string()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                let fut = start().shared();
                e.insert(fut.clone());
                fut
            }
        };

        let out = fut.clone().await;
        self.pending.remove_if(key, |_, current| current.ptr_eq(&fut));
        out
    }

    /// Number of keys with a collection in flight
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_execution() {
        let inflight = Arc::new(Inflight::<usize>::new());
        let started = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let inflight = inflight.clone();
            let started = started.clone();
            handles.push(tokio::spawn(async move {
                inflight
                    .run("node-a", || {
                        async move {
                            let n = started.fetch_add(1, Ordering::SeqCst) + 1;
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            n
                        }
                        .boxed()
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_calls_start_fresh() {
        let inflight = Inflight::<u32>::new();
        let first = inflight.run("k", || async { 1 }.boxed()).await;
        let second = inflight.run("k", || async { 2 }.boxed()).await;
        assert_eq!((first, second), (1, 2));
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let inflight = Arc::new(Inflight::<&'static str>::new());

        let slow = {
            let inflight = inflight.clone();
            tokio::spawn(async move {
                inflight
                    .run("slow", || {
                        async {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            "slow"
                        }
                        .boxed()
                    })
                    .await
            })
        };

        let fast = tokio::time::timeout(
            Duration::from_millis(500),
            inflight.run("fast", || async { "fast" }.boxed()),
        )
        .await
        .unwrap();
        assert_eq!(fast, "fast");
        slow.abort();
    }
}
