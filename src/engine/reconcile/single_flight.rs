//! Per-key request deduplication.
//!
//! The first caller for a key becomes the leader: its work runs on a
//! spawned task, so a cancelled or timed-out caller never strands the
//! entry. Later callers for the same key subscribe to the leader's result
//! instead of starting their own work. The entry is removed when the work
//! settles, whether it produced a value or panicked.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::warn;

type Inflight<K, V> = Arc<Mutex<HashMap<K, watch::Receiver<Option<V>>>>>;

fn lock<K, V>(map: &Inflight<K, V>) -> MutexGuard<'_, HashMap<K, watch::Receiver<Option<V>>>> {
    // Nothing runs under this lock that can panic halfway through.
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Result of [`SingleFlight::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flight<V> {
    /// `None` if the leader's work panicked.
    pub value: Option<V>,
    /// Whether this caller joined another caller's work.
    pub shared: bool,
}

/// Removes the key when the leader task ends, including by panic.
struct Release<K: Eq + Hash, V> {
    key: Option<K>,
    inflight: Inflight<K, V>,
}

impl<K: Eq + Hash, V> Drop for Release<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            lock(&self.inflight).remove(&key);
        }
    }
}

#[derive(Debug)]
pub struct SingleFlight<K, V> {
    inflight: Inflight<K, V>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys with work currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.inflight).contains_key(key)
    }

    /// Run `work` for `key`, or join the run already in flight.
    ///
    /// `work` is only called by the leader. Bound it with a timeout
    /// yourself; the entry lives exactly as long as the work does.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Flight<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (mut rx, shared) = {
            let mut inflight = lock(&self.inflight);
            match inflight.get(&key) {
                Some(rx) => (rx.clone(), true),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.clone(), rx.clone());
                    let release = Release {
                        key: Some(key),
                        inflight: Arc::clone(&self.inflight),
                    };
                    let fut = work();
                    tokio::spawn(async move {
                        let value = fut.await;
                        // Unregister before publishing so a caller that
                        // sees the value and retries starts fresh work.
                        drop(release);
                        let _ = tx.send(Some(value));
                    });
                    (rx, false)
                }
            }
        };

        let value = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => {
                warn!("In-flight work ended without a result");
                None
            }
        };
        Flight { value, shared }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flights: Arc<SingleFlight<u8, usize>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let flights = Arc::clone(&flights);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flights
                    .run(1, move || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        calls.fetch_add(1, Ordering::SeqCst) + 41
                    })
                    .await
            }));
        }

        let mut shared = 0;
        for handle in handles {
            let flight = handle.await.unwrap();
            assert_eq!(flight.value, Some(41));
            shared += usize::from(flight.shared);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(shared, 9);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share() {
        let flights: SingleFlight<u8, u8> = SingleFlight::new();
        let (a, b) = tokio::join!(
            flights.run(1, || async { 1 }),
            flights.run(2, || async { 2 })
        );
        assert_eq!(a.value, Some(1));
        assert_eq!(b.value, Some(2));
        assert!(!a.shared && !b.shared);
    }

    #[tokio::test]
    async fn test_panicking_work_releases_key() {
        let flights: SingleFlight<u8, u8> = SingleFlight::new();
        let flight = flights
            .run(7, || async {
                if true {
                    panic!("boom");
                }
                0
            })
            .await;
        assert_eq!(flight.value, None);
        assert!(!flights.is_in_flight(&7));

        let flight = flights.run(7, || async { 3 }).await;
        assert_eq!(flight.value, Some(3));
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_strand_key() {
        let flights: SingleFlight<u8, u8> = SingleFlight::new();
        let attempt = tokio::time::timeout(
            Duration::from_millis(10),
            flights.run(5, || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                5
            }),
        )
        .await;
        assert!(attempt.is_err());
        assert!(flights.is_in_flight(&5));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!flights.is_in_flight(&5));
    }
}
