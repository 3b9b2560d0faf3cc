//! Single-flight deduplication of concurrent loader calls.
//!
//! The first caller for a key becomes the leader and runs the supplied
//! closure outside every lock; callers arriving while the call is in
//! flight block on a condvar and clone the leader's outcome. The entry is
//! removed once the leader finishes, so a later caller re-enters the
//! loader if the key is still missing.

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::CacheError;

struct Call<V> {
    outcome: Mutex<Option<Result<V, CacheError>>>,
    done: Condvar,
}

impl<V> Call<V> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }
}

/// Deduplicates in-flight calls keyed by the cache key.
pub(crate) struct Group<K, V> {
    calls: Mutex<FxHashMap<K, Arc<Call<V>>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> Group<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(FxHashMap::default()),
        }
    }

    /// Runs `f` for `key`, or joins a call already in flight.
    ///
    /// Returns the shared outcome and whether this caller was a follower.
    pub(crate) fn work(
        &self,
        key: &K,
        f: impl FnOnce() -> Result<V, CacheError>,
    ) -> (Result<V, CacheError>, bool) {
        let call = {
            let mut calls = self.calls.lock();
            if let Some(existing) = calls.get(key) {
                let existing = Arc::clone(existing);
                drop(calls);
                return (Self::wait(&existing), true);
            }
            let call = Arc::new(Call::new());
            calls.insert(key.clone(), Arc::clone(&call));
            call
        };

        // Leader: the in-flight map is unlocked while the closure runs, so
        // the loader can block without holding up unrelated keys.
        let result = f();
        {
            let mut outcome = call.outcome.lock();
            *outcome = Some(result.clone());
            call.done.notify_all();
        }
        self.calls.lock().remove(key);

        (result, false)
    }

    fn wait(call: &Call<V>) -> Result<V, CacheError> {
        let mut outcome = call.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            call.done.wait(&mut outcome);
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn single_caller_runs_the_closure() {
        let group: Group<&str, u32> = Group::new();
        let (result, shared) = group.work(&"k", || Ok(7));
        assert_eq!(result.unwrap(), 7);
        assert!(!shared);
        assert_eq!(group.in_flight(), 0);
    }

    #[test]
    fn concurrent_callers_share_one_invocation() {
        let group: Arc<Group<String, u32>> = Arc::new(Group::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let group = Arc::clone(&group);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    group.work(&"key".to_string(), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(42)
                    })
                })
            })
            .collect();

        let mut followers = 0;
        for handle in handles {
            let (result, shared) = handle.join().unwrap();
            assert_eq!(result.unwrap(), 42);
            if shared {
                followers += 1;
            }
        }
        // Every thread that raced into the in-flight window shared the
        // leader's outcome; late arrivals may have led a fresh call.
        assert_eq!(calls.load(Ordering::SeqCst) + followers, 8);
        assert_eq!(group.in_flight(), 0);
    }

    #[test]
    fn errors_are_broadcast_to_followers() {
        let group: Arc<Group<String, u32>> = Arc::new(Group::new());
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let group = Arc::clone(&group);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    group.work(&"bad".to_string(), || {
                        thread::sleep(Duration::from_millis(50));
                        Err(CacheError::Cancelled)
                    })
                })
            })
            .collect();

        for handle in handles {
            let (result, _) = handle.join().unwrap();
            assert!(matches!(result, Err(CacheError::Cancelled)));
        }
    }

    #[test]
    fn completed_keys_re_enter_the_closure() {
        let group: Group<&str, u32> = Group::new();
        let (first, _) = group.work(&"k", || Ok(1));
        let (second, shared) = group.work(&"k", || Ok(2));
        assert_eq!(first.unwrap(), 1);
        assert_eq!(second.unwrap(), 2);
        assert!(!shared);
    }
}
