//! Allocator configuration.
//!
//! Property keys and their defaults. All durations are configured in
//! milliseconds.

mod allocator;
mod source;

pub use allocator::*;
pub use source::*;

use core::time::Duration;

/// Namespace for cache keys and the lock name.
pub const APP_NAME: &str = "app.name";
/// Ids reserved from the durable counter per refill.
pub const POOL_SIZE: &str = "keygen.pool.size";
/// Distributed allocation toggle.
pub const ENABLED: &str = "keygen.enabled";
/// Upper bound on waiting for the lock.
pub const LOCK_WAIT_MS: &str = "keygen.lock.wait.ms";
/// Lease after which a held lock self-expires.
pub const LOCK_LEASE_MS: &str = "keygen.lock.lease.ms";
/// Upper bound on the cache liveness probe.
pub const CACHE_PROBE_MS: &str = "keygen.cache.probe.ms";

pub const DEFAULT_APP_NAME: &str = "poolseq";
pub const DEFAULT_POOL_SIZE: u64 = 100;
pub const DEFAULT_ENABLED: bool = false;
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(10);
pub const DEFAULT_CACHE_PROBE: Duration = Duration::from_millis(500);
