use crate::BackendError;
use core::{fmt, future::Future, time::Duration};

/// A shared key-value cache reachable from every allocator instance.
///
/// Values are opaque strings. Keys are expected to already carry the
/// application namespace (see [`AllocatorConfig::window_key`]).
///
/// [`AllocatorConfig::window_key`]: crate::AllocatorConfig::window_key
pub trait SharedCache: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, BackendError>> + Send;

    /// Unconditionally stores `value` under `key`.
    fn set(&self, key: &str, value: String) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Stores `value` only if `key` is absent. Returns `true` if this call
    /// created the entry.
    fn set_if_absent(
        &self,
        key: &str,
        value: String,
    ) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Removes `key`. Returns `true` if an entry was removed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Liveness probe. Must not fail; an unreachable cache reports `false`.
    fn is_reachable(&self) -> impl Future<Output = bool> + Send;
}

/// Fencing token identifying one granted lease.
///
/// Tokens increase monotonically per lock service, so a stale holder can be
/// told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeaseToken(u64);

impl LeaseToken {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeaseToken({})", self.0)
    }
}

/// A distributed mutual-exclusion service with self-expiring leases.
pub trait DistributedLock: Send + Sync {
    /// Tries to acquire `name`, waiting at most `wait`. A granted lease is
    /// force-released by the service after `lease` even if never released.
    ///
    /// Returns `Ok(None)` when the wait elapsed without a grant.
    fn try_acquire(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> impl Future<Output = Result<Option<LeaseToken>, BackendError>> + Send;

    /// Releases the lease identified by `token`. Returns `false` if the lease
    /// had already expired or belongs to someone else.
    fn release(
        &self,
        name: &str,
        token: LeaseToken,
    ) -> impl Future<Output = Result<bool, BackendError>> + Send;
}

/// The durable, monotonically increasing source of truth for ids.
pub trait DurableCounter: Send + Sync {
    /// Reads the current counter value.
    fn read(&self) -> impl Future<Output = Result<u64, BackendError>> + Send;

    /// Atomically adds `n` and returns the value before the increment.
    fn fetch_and_add(&self, n: u64) -> impl Future<Output = Result<u64, BackendError>> + Send;
}
