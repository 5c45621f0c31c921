//! In-process collaborators.
//!
//! Each type is a cheap handle around shared state: clone it to hand the
//! same cache, lock table, or counter to several allocators, which is how
//! tests and the simulator model multiple processes sharing one deployment.
//! Every collaborator can be switched offline to simulate an outage.

use crate::{BackendError, DistributedLock, DurableCounter, LeaseToken, SharedCache};
use core::{pin::pin, time::Duration};
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};
use std::{collections::HashMap, sync::Arc};
use tokio::{sync::Notify, time::Instant};

/// A [`SharedCache`] backed by a process-local map.
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: Mutex<HashMap<String, String>>,
    offline: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the cache going away (`false`) or coming back (`true`).
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.offline.store(!reachable, Ordering::SeqCst);
    }

    /// Raw view of an entry, bypassing reachability.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.inner.entries.lock().get(key).cloned()
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(BackendError::new("memory cache is unreachable"));
        }
        Ok(())
    }
}

impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check()?;
        Ok(self.inner.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), BackendError> {
        self.check()?;
        self.inner.entries.lock().insert(key.to_owned(), value);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: String) -> Result<bool, BackendError> {
        self.check()?;
        let mut entries = self.inner.entries.lock();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_owned(), value);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        self.check()?;
        Ok(self.inner.entries.lock().remove(key).is_some())
    }

    async fn is_reachable(&self) -> bool {
        !self.inner.offline.load(Ordering::SeqCst)
    }
}

/// A [`DistributedLock`] with real lease expiry, keyed by lock name.
///
/// Waiters park on a [`Notify`] and wake either on release or when the
/// current lease runs out, whichever comes first, never past their own
/// wait deadline.
#[derive(Clone, Default)]
pub struct MemoryLock {
    inner: Arc<LockInner>,
}

#[derive(Default)]
struct LockInner {
    leases: Mutex<HashMap<String, Lease>>,
    next_token: AtomicU64,
    released: Notify,
    offline: AtomicBool,
}

struct Lease {
    token: LeaseToken,
    expires_at: Instant,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.offline.store(!reachable, Ordering::SeqCst);
    }

    /// The token of the live lease on `name`, if one is held.
    pub fn holder(&self, name: &str) -> Option<LeaseToken> {
        let now = Instant::now();
        self.inner
            .leases
            .lock()
            .get(name)
            .filter(|lease| lease.expires_at > now)
            .map(|lease| lease.token)
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(BackendError::new("memory lock service is unreachable"));
        }
        Ok(())
    }

    /// Grants the lease if `name` is free or its lease has expired. On
    /// contention returns when the current lease runs out.
    fn grab(&self, name: &str, lease: Duration) -> Result<LeaseToken, Instant> {
        let now = Instant::now();
        let mut leases = self.inner.leases.lock();
        match leases.get(name) {
            Some(held) if held.expires_at > now => Err(held.expires_at),
            _ => {
                let token = LeaseToken::new(self.inner.next_token.fetch_add(1, Ordering::Relaxed) + 1);
                leases.insert(
                    name.to_owned(),
                    Lease {
                        token,
                        expires_at: now + lease,
                    },
                );
                Ok(token)
            }
        }
    }
}

impl DistributedLock for MemoryLock {
    async fn try_acquire(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LeaseToken>, BackendError> {
        self.check()?;
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before checking so a release between the
            // check and the await is not missed.
            let mut notified = pin!(self.inner.released.notified());
            notified.as_mut().enable();

            let held_until = match self.grab(name, lease) {
                Ok(token) => return Ok(Some(token)),
                Err(expires_at) => expires_at,
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            let _ = tokio::time::timeout_at(deadline.min(held_until), notified).await;
        }
    }

    async fn release(&self, name: &str, token: LeaseToken) -> Result<bool, BackendError> {
        self.check()?;
        let released = {
            let mut leases = self.inner.leases.lock();
            match leases.get(name) {
                Some(held) if held.token == token && held.expires_at > Instant::now() => {
                    leases.remove(name);
                    true
                }
                _ => false,
            }
        };

        if released {
            self.inner.released.notify_waiters();
        }
        Ok(released)
    }
}

/// A [`DurableCounter`] backed by an atomic integer.
#[derive(Clone, Default)]
pub struct MemoryCounter {
    inner: Arc<CounterInner>,
}

#[derive(Default)]
struct CounterInner {
    value: AtomicU64,
    offline: AtomicBool,
}

impl MemoryCounter {
    pub fn new(initial: u64) -> Self {
        Self {
            inner: Arc::new(CounterInner {
                value: AtomicU64::new(initial),
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// Current value, bypassing reachability.
    pub fn value(&self) -> u64 {
        self.inner.value.load(Ordering::SeqCst)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.offline.store(!reachable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(BackendError::new("memory counter store is unreachable"));
        }
        Ok(())
    }
}

impl DurableCounter for MemoryCounter {
    async fn read(&self) -> Result<u64, BackendError> {
        self.check()?;
        Ok(self.inner.value.load(Ordering::SeqCst))
    }

    async fn fetch_and_add(&self, n: u64) -> Result<u64, BackendError> {
        self.check()?;
        self.inner
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| value.checked_add(n))
            .map_err(|value| {
                BackendError::new(format!(
                    "memory counter at {value} cannot advance by {n} without overflowing"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK: &str = "test-KEY-GEN-LOCK";

    #[tokio::test]
    async fn set_if_absent_only_first_writer_wins() {
        let cache = MemoryCache::new();
        assert!(cache.set_if_absent("k", "a".into()).await.unwrap());
        assert!(!cache.set_if_absent("k", "b".into()).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("a"));

        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert!(cache.set_if_absent("k", "c".into()).await.unwrap());
    }

    #[tokio::test]
    async fn offline_cache_fails_round_trips_but_not_probe() {
        let cache = MemoryCache::new();
        cache.set_reachable(false);
        assert!(!cache.is_reachable().await);
        assert!(cache.get("k").await.is_err());
        assert!(cache.set("k", "v".into()).await.is_err());

        cache.set_reachable(true);
        assert!(cache.is_reachable().await);
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let lock = MemoryLock::new();
        let held = lock
            .try_acquire(LOCK, Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(held.is_some());

        let start = Instant::now();
        let second = lock
            .try_acquire(LOCK, Duration::from_millis(30), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(second, None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn release_wakes_a_waiter() {
        let lock = MemoryLock::new();
        let first = lock
            .try_acquire(LOCK, Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move {
                lock.try_acquire(LOCK, Duration::from_secs(5), Duration::from_secs(30))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(lock.release(LOCK, first).await.unwrap());

        let second = waiter.await.unwrap().unwrap().unwrap();
        assert!(second > first);
        assert_eq!(lock.holder(LOCK), Some(second));
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let lock = MemoryLock::new();
        let crashed = lock
            .try_acquire(LOCK, Duration::ZERO, Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();

        let next = lock
            .try_acquire(LOCK, Duration::from_secs(2), Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(next, crashed);

        // The crashed holder's late release must not free the new lease.
        assert!(!lock.release(LOCK, crashed).await.unwrap());
        assert_eq!(lock.holder(LOCK), Some(next));
    }

    #[tokio::test]
    async fn counter_fetch_and_add_returns_previous() {
        let counter = MemoryCounter::new(500);
        assert_eq!(counter.fetch_and_add(100).await.unwrap(), 500);
        assert_eq!(counter.read().await.unwrap(), 600);

        counter.set_reachable(false);
        assert!(counter.fetch_and_add(100).await.is_err());
        assert_eq!(counter.value(), 600);
    }

    #[tokio::test]
    async fn counter_never_wraps() {
        let counter = MemoryCounter::new(u64::MAX - 5);
        let err = counter.fetch_and_add(10).await.unwrap_err();
        assert!(err.to_string().contains("overflow"));
        assert_eq!(counter.value(), u64::MAX - 5);

        assert_eq!(counter.fetch_and_add(5).await.unwrap(), u64::MAX - 5);
        assert_eq!(counter.value(), u64::MAX);
    }
}
