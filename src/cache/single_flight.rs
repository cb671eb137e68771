use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;

/// Coalesces concurrent calls for the same key into a single execution of
/// the underlying work, broadcasting its result to every waiter. Named so
/// the discipline has one call site rather than being reimplemented per key.
#[derive(Debug)]
pub struct SingleFlight<K, V> {
    in_flight: DashMap<K, Arc<Slot<V>>>,
}

#[derive(Debug)]
struct Slot<V> {
    notify: Notify,
    result: std::sync::Mutex<Option<Result<V, SingleFlightError>>>,
}

/// A placeholder marking that the leader's work failed; followers observe
/// this and re-run the work themselves rather than share a non-`Clone`
/// error type across tasks.
#[derive(Debug, Clone)]
pub struct SingleFlightError;

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self { in_flight: DashMap::new() }
    }

    /// Runs `work` for `key` if no other caller is already doing so;
    /// otherwise waits for the in-flight call to finish and reuses its
    /// result. On a shared failure, the caller re-runs `work` itself so
    /// each distinct error type still propagates to its own caller.
    pub async fn run<F, Fut, E>(&self, key: K, work: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        loop {
            if let Some(slot) = self.in_flight.get(&key).map(|s| s.clone()) {
                slot.notify.notified().await;
                match slot.result.lock().unwrap().clone() {
                    Some(Ok(value)) => return Ok(value),
                    Some(Err(SingleFlightError)) => continue,
                    None => continue,
                }
            }

            let slot = Arc::new(Slot { notify: Notify::new(), result: std::sync::Mutex::new(None) });
            match self.in_flight.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(slot.clone());
                }
            }

            let result = work().await;
            *slot.result.lock().unwrap() = Some(result.as_ref().map(|v| v.clone()).map_err(|_| SingleFlightError));
            self.in_flight.remove(&key);
            slot.notify.notify_waiters();

            return result;
        }
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn single_caller_runs_and_returns_work() {
        let sf: SingleFlight<&str, i32> = SingleFlight::new();
        let result = sf.run("k", || async { Ok::<_, String>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let sf = Arc::new(SingleFlight::<&str, i32>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let sf = sf.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                sf.run("shared", move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(15)).await;
                        Ok::<_, String>(7)
                    }
                })
                .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_calls_after_completion_do_not_reuse_stale_slot() {
        let sf: SingleFlight<&str, i32> = SingleFlight::new();
        assert_eq!(sf.run("k", || async { Ok::<_, String>(1) }).await.unwrap(), 1);
        assert_eq!(sf.run("k", || async { Ok::<_, String>(2) }).await.unwrap(), 2);
    }

    #[test]
    fn single_flight_drives_under_a_bare_block_on_executor() {
        let sf: SingleFlight<&str, i32> = SingleFlight::new();
        let result = tokio_test::block_on(sf.run("k", || async { Ok::<_, String>(9) }));
        assert_eq!(result.unwrap(), 9);
    }
}
