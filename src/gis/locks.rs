//! Keyed mutual exclusion with an optional bounded wait.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub struct KeyedLocks<K> {
    held: Mutex<HashSet<K>>,
    released: Condvar,
}

/// Releases its key and wakes waiters on drop.
pub struct KeyGuard<'a, K: Eq + Hash> {
    locks: &'a KeyedLocks<K>,
    key: Option<K>,
}

impl<K: Eq + Hash> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
            held.remove(&key);
            drop(held);
            self.locks.released.notify_all();
        }
    }
}

pub enum WaitOutcome<'a, K: Eq + Hash> {
    /// Caller holds the key exclusively.
    Acquired(KeyGuard<'a, K>),
    /// The readiness check passed while waiting; no lock is held.
    Ready,
    /// The wait budget ran out; caller proceeds without exclusivity.
    TimedOut,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        KeyedLocks {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }

    fn held(&self) -> MutexGuard<'_, HashSet<K>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self, key: K) -> KeyGuard<'_, K> {
        KeyGuard {
            locks: self,
            key: Some(key),
        }
    }

    /// Blocks until `key` is free.
    pub fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let mut held = self.held();
        while held.contains(&key) {
            held = self.released.wait(held).unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key.clone());
        drop(held);
        self.guard(key)
    }

    pub fn try_lock(&self, key: K) -> Option<KeyGuard<'_, K>> {
        let mut held = self.held();
        if held.contains(&key) {
            return None;
        }
        held.insert(key.clone());
        drop(held);
        Some(self.guard(key))
    }

    /// Takes `key` if free. Otherwise re-checks `ready` every `poll` (and on
    /// every release) until it passes, the key frees up, or `timeout` elapses.
    pub fn acquire_or_wait<F>(&self, key: K, timeout: Duration, poll: Duration, mut ready: F) -> WaitOutcome<'_, K>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_lock(key.clone()) {
                return WaitOutcome::Acquired(guard);
            }
            if ready() {
                return WaitOutcome::Ready;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }

            let held = self.held();
            if held.contains(&key) {
                let wait = poll.min(deadline - now);
                let _ = self
                    .released
                    .wait_timeout(held, wait)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn second_try_lock_fails_until_release() {
        let locks: KeyedLocks<&str> = KeyedLocks::new();
        let g = locks.try_lock("m1").unwrap();
        assert!(locks.try_lock("m1").is_none());
        assert!(locks.try_lock("m2").is_some());
        drop(g);
        assert!(locks.try_lock("m1").is_some());
    }

    #[test]
    fn waiter_times_out_without_deadlock() {
        let locks: KeyedLocks<String> = KeyedLocks::new();
        let _held = locks.lock("k".to_string());
        let start = Instant::now();
        let out = locks.acquire_or_wait("k".to_string(), Duration::from_millis(120), Duration::from_millis(20), || false);
        assert!(matches!(out, WaitOutcome::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(120));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn waiter_sees_ready_cache() {
        let locks = Arc::new(KeyedLocks::<String>::new());
        let filled = Arc::new(AtomicBool::new(false));
        let guard = locks.lock("k".to_string());

        let (l2, f2) = (Arc::clone(&locks), Arc::clone(&filled));
        let waiter = thread::spawn(move || {
            let out = l2.acquire_or_wait("k".to_string(), Duration::from_secs(5), Duration::from_millis(10), || {
                f2.load(Ordering::SeqCst)
            });
            matches!(out, WaitOutcome::Ready)
        });

        thread::sleep(Duration::from_millis(50));
        filled.store(true, Ordering::SeqCst);
        let saw_ready = waiter.join().unwrap();
        drop(guard);
        assert!(saw_ready);
    }

    #[test]
    fn waiter_acquires_after_release() {
        let locks = Arc::new(KeyedLocks::<u32>::new());
        let guard = locks.lock(7);
        let l2 = Arc::clone(&locks);
        let waiter = thread::spawn(move || {
            matches!(
                l2.acquire_or_wait(7, Duration::from_secs(5), Duration::from_millis(500), || false),
                WaitOutcome::Acquired(_)
            )
        });
        thread::sleep(Duration::from_millis(30));
        drop(guard);
        assert!(waiter.join().unwrap());
    }
}
