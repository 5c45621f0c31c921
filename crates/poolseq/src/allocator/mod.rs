//! The distributed sequence allocator.
//!
//! Every allocator instance in a deployment shares one pool window in the
//! shared cache, one named distributed lock, and one durable counter. The
//! durable counter is only touched when a window is reserved (at
//! reconciliation and on reset), never per id.

mod lease;
mod retry;

pub use retry::*;

use crate::{
    AllocatorConfig, DistributedLock, DurableCounter, Error, PoolWindow, Result, SharedCache,
    WindowStatus, compute_window,
};
use lease::LeaseGuard;
use parking_lot::RwLock;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, error, info, instrument, trace, warn};

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// This instance created the pool window and reserved it in the durable
    /// counter. `window` is the range the counter actually handed out.
    Initialized { window: PoolWindow },
    /// Another instance had already created the window; it is authoritative
    /// and the durable counter was left alone.
    AlreadyInitialized { window: PoolWindow },
    /// Allocation is disabled and the window was deleted so a later re-enable
    /// starts from the durable counter.
    Cleared {
        /// Whether a window was present to delete.
        existed: bool,
    },
    /// The shared cache did not answer the liveness probe. Allocation stays
    /// disabled.
    CacheUnreachable,
}

/// Hands out globally unique, monotonically increasing ids to many
/// cooperating processes.
///
/// Construct one per process at startup, call [`Self::reconcile`], then
/// share it (typically behind an [`Arc`]) with every caller of
/// [`Self::next_id`]. All mutation of the shared window happens under the
/// distributed lock, which serializes callers within and across processes,
/// so no in-process mutex is involved. The lock is released even when a
/// call is cancelled mid-flight.
///
/// # Example
///
/// ```
/// use poolseq::{AllocatorConfig, MemoryCache, MemoryCounter, MemoryLock, SequenceAllocator};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let config = AllocatorConfig::new("orders", 100).unwrap().with_enabled(true);
/// let allocator = SequenceAllocator::new(
///     config,
///     MemoryCache::new(),
///     MemoryLock::new(),
///     MemoryCounter::new(500),
/// );
///
/// allocator.reconcile().await.unwrap();
/// assert_eq!(allocator.next_id().await.unwrap(), 500);
/// assert_eq!(allocator.next_id().await.unwrap(), 501);
/// # });
/// ```
pub struct SequenceAllocator<C, L, D> {
    config: RwLock<Arc<AllocatorConfig>>,
    cache: C,
    lock: Arc<L>,
    counter: D,
    active: AtomicBool,
}

impl<C, L, D> SequenceAllocator<C, L, D>
where
    C: SharedCache,
    L: DistributedLock + 'static,
    D: DurableCounter,
{
    /// Creates an inactive allocator. Nothing is read or written until
    /// [`Self::reconcile`] runs.
    pub fn new(config: AllocatorConfig, cache: C, lock: L, counter: D) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            cache,
            lock: Arc::new(lock),
            counter,
            active: AtomicBool::new(false),
        }
    }

    /// Snapshot of the configuration in effect.
    pub fn config(&self) -> Arc<AllocatorConfig> {
        Arc::clone(&self.config.read())
    }

    /// Whether the last reconciliation left distributed allocation usable.
    /// When `false`, [`Self::next_id`] fails with [`Error::Disabled`] and the
    /// host should fall back to its alternative allocation path.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Synchronizes the shared pool window with the durable counter.
    ///
    /// - Cache unreachable: allocation stays disabled.
    /// - Enabled: under the allocation lock, reserves `[C, C + pool_size)`
    ///   from a fresh counter read unless another instance already created
    ///   the window (first writer wins).
    /// - Disabled: deletes the window.
    ///
    /// # Errors
    ///
    /// Collaborator failures are logged, leave the allocator inactive, and
    /// are returned as [`Error::Reconciliation`]. They are never fatal to
    /// the host; a later call may succeed.
    #[instrument(level = "debug", skip(self))]
    pub async fn reconcile(&self) -> Result<Reconciliation> {
        let config = self.config();

        if !config.is_cache_reachable(&self.cache).await {
            self.active.store(false, Ordering::SeqCst);
            error!(
                app = config.app_name(),
                "shared cache unreachable; distributed sequence allocation disabled"
            );
            return Ok(Reconciliation::CacheUnreachable);
        }

        let outcome = if config.is_enabled() {
            self.initialize(&config).await
        } else {
            self.clear(&config).await
        };

        match outcome {
            Ok(outcome) => {
                let active = matches!(
                    outcome,
                    Reconciliation::Initialized { .. } | Reconciliation::AlreadyInitialized { .. }
                );
                self.active.store(active, Ordering::SeqCst);
                Ok(outcome)
            }
            Err(source) => {
                self.active.store(false, Ordering::SeqCst);
                error!(
                    app = config.app_name(),
                    error = %source,
                    "reconciliation failed; distributed sequence allocation disabled"
                );
                Err(Error::Reconciliation {
                    source: Box::new(source),
                })
            }
        }
    }

    /// Replaces the configuration and reconciles against it.
    pub async fn reconfigure(&self, config: AllocatorConfig) -> Result<Reconciliation> {
        *self.config.write() = Arc::new(config);
        self.reconcile().await
    }

    async fn initialize(&self, config: &AllocatorConfig) -> Result<Reconciliation> {
        let lease = self.acquire(config).await?;
        let outcome = self.install_window(config).await;
        lease.release().await;
        outcome
    }

    /// Runs with the lock held.
    async fn install_window(&self, config: &AllocatorConfig) -> Result<Reconciliation> {
        let key = config.window_key();
        let low = self.counter.read().await.map_err(Error::Store)?;
        let window = compute_window(low, config.pool_size_nonzero())?;

        let created = self
            .cache
            .set_if_absent(&key, window.encode()?)
            .await
            .map_err(Error::Cache)?;

        if !created {
            let existing = self.load_window(&key).await?;
            existing.status()?;
            info!(
                current_id = existing.current_id,
                reset_on_id = existing.reset_on_id,
                "pool window already initialized by another instance"
            );
            return Ok(Reconciliation::AlreadyInitialized { window: existing });
        }

        let previous = match self.counter.fetch_and_add(config.pool_size()).await {
            Ok(previous) => previous,
            Err(e) => {
                // The window is not reserved; leaving it would let a later
                // reset hand the same ids out again.
                self.roll_back(&key).await;
                return Err(Error::Store(e));
            }
        };

        let window = if previous == low {
            window
        } else {
            // [low, low + pool_size) may belong to someone else; only the
            // range the counter just handed out is ours.
            warn!(
                expected = low,
                previous,
                "durable counter moved between read and reservation; installing the reserved range"
            );
            match self.replace_window(&key, previous, config).await {
                Ok(reserved) => reserved,
                Err(e) => {
                    self.roll_back(&key).await;
                    return Err(e);
                }
            }
        };

        info!(
            current_id = window.current_id,
            reset_on_id = window.reset_on_id,
            lock = %config.lock_name(),
            "pool window initialized"
        );
        Ok(Reconciliation::Initialized { window })
    }

    async fn replace_window(
        &self,
        key: &str,
        low: u64,
        config: &AllocatorConfig,
    ) -> Result<PoolWindow> {
        let window = compute_window(low, config.pool_size_nonzero())?;
        self.cache
            .set(key, window.encode()?)
            .await
            .map_err(Error::Cache)?;
        Ok(window)
    }

    async fn roll_back(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            error!(key = %key, error = %e, "failed to roll back unreserved pool window");
        }
    }

    async fn clear(&self, config: &AllocatorConfig) -> Result<Reconciliation> {
        let key = config.window_key();
        let existed = self.cache.delete(&key).await.map_err(Error::Cache)?;
        info!(
            key = %key,
            existed,
            "distributed sequence allocation disabled; pool window cleared"
        );
        Ok(Reconciliation::Cleared { existed })
    }

    /// Issues the next id.
    ///
    /// Acquires the distributed lock (bounded by the configured wait),
    /// reads the window, refills it from the durable counter when exhausted,
    /// advances it, and releases the lock on every exit path.
    ///
    /// # Errors
    ///
    /// - [`Error::Disabled`] if the allocator is not active.
    /// - [`Error::LockAcquisition`] if the lock was not granted in time.
    /// - Collaborator, decoding, or invariant errors from inside the
    ///   critical section, after the lock has been released.
    ///
    /// Dropping the returned future while it holds the lock releases the
    /// lock in the background.
    ///
    /// Use [`Error::is_retryable`] (or [`Self::next_id_with_retry`]) to
    /// decide whether to try again.
    #[instrument(level = "trace", skip(self))]
    pub async fn next_id(&self) -> Result<u64> {
        if !self.is_active() {
            return Err(Error::Disabled);
        }

        let config = self.config();
        let lease = self.acquire(&config).await?;
        let issued = self.issue(&config).await;
        lease.release().await;

        match &issued {
            Ok(id) => trace!(id = *id, "issued id"),
            Err(e) => error!(error = %e, "failed to issue id"),
        }
        issued
    }

    async fn acquire(&self, config: &AllocatorConfig) -> Result<LeaseGuard<L>> {
        let name = config.lock_name();
        let token = self
            .lock
            .try_acquire(&name, config.lock_wait(), config.lock_lease())
            .await
            .map_err(Error::Lock)?
            .ok_or_else(|| Error::LockAcquisition {
                name: name.clone(),
                waited: config.lock_wait(),
            })?;
        Ok(LeaseGuard::new(Arc::clone(&self.lock), name, token))
    }

    /// The critical section. Runs with the lock held.
    async fn issue(&self, config: &AllocatorConfig) -> Result<u64> {
        let key = config.window_key();
        let mut window = self.load_window(&key).await?;

        if let WindowStatus::Exhausted = window.status()? {
            debug!(current_id = window.current_id, "pool window exhausted");
            window = self.reset(config, &key).await?;
        }

        let id = window.current_id;
        self.cache
            .set(&key, window.advance().encode()?)
            .await
            .map_err(Error::Cache)?;
        Ok(id)
    }

    /// Refills the window from the durable counter.
    ///
    /// The counter is advanced first and its pre-increment value becomes the
    /// new low bound, so a failure after this point can skip ids but never
    /// reissue them.
    async fn reset(&self, config: &AllocatorConfig, key: &str) -> Result<PoolWindow> {
        let low = self
            .counter
            .fetch_and_add(config.pool_size())
            .await
            .map_err(Error::Store)?;
        let window = compute_window(low, config.pool_size_nonzero())?;

        self.cache
            .set(key, window.encode()?)
            .await
            .map_err(Error::Cache)?;

        debug!(
            current_id = window.current_id,
            reset_on_id = window.reset_on_id,
            "pool window reset"
        );
        Ok(window)
    }

    /// The last id issued from the shared window (`current_id - 1`).
    ///
    /// A point-in-time read without the lock; it may already be stale when
    /// it returns. `None` when the window starts at zero and nothing was
    /// issued below it.
    pub async fn current_allocated_id(&self) -> Result<Option<u64>> {
        Ok(self.window().await?.last_issued())
    }

    /// The shared pool window as currently stored. Unlocked read.
    pub async fn window(&self) -> Result<PoolWindow> {
        let key = self.config().window_key();
        self.load_window(&key).await
    }

    async fn load_window(&self, key: &str) -> Result<PoolWindow> {
        let raw = self
            .cache
            .get(key)
            .await
            .map_err(Error::Cache)?
            .ok_or_else(|| Error::WindowMissing {
                key: key.to_owned(),
            })?;
        PoolWindow::decode(key, &raw)
    }
}
