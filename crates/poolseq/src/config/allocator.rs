use super::{
    APP_NAME, CACHE_PROBE_MS, DEFAULT_APP_NAME, DEFAULT_CACHE_PROBE, DEFAULT_ENABLED,
    DEFAULT_LOCK_LEASE, DEFAULT_LOCK_WAIT, DEFAULT_POOL_SIZE, ENABLED, LOCK_LEASE_MS, LOCK_WAIT_MS,
    POOL_SIZE, source::ConfigSource,
};
use crate::{Error, Result, SharedCache};
use core::{num::NonZeroU64, time::Duration};

/// Effective tuning for a [`SequenceAllocator`].
///
/// Values are parsed once, up front. Anything present but malformed is
/// rejected at construction instead of being replaced by a default: a
/// silently wrong pool size would corrupt the windows every instance
/// reserves.
///
/// [`SequenceAllocator`]: crate::SequenceAllocator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    app_name: String,
    pool_size: NonZeroU64,
    enabled: bool,
    lock_wait: Duration,
    lock_lease: Duration,
    probe_timeout: Duration,
}

impl AllocatorConfig {
    /// Creates a configuration with the documented defaults for everything
    /// but the namespace and pool size. Distributed allocation starts
    /// disabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `app_name` is empty or
    /// `pool_size` is zero.
    pub fn new(app_name: impl Into<String>, pool_size: u64) -> Result<Self> {
        let app_name = app_name.into();
        if app_name.trim().is_empty() {
            return Err(Error::invalid_config(APP_NAME, "must not be empty"));
        }
        let pool_size = NonZeroU64::new(pool_size)
            .ok_or_else(|| Error::invalid_config(POOL_SIZE, "must be greater than 0"))?;

        Ok(Self {
            app_name,
            pool_size,
            enabled: DEFAULT_ENABLED,
            lock_wait: DEFAULT_LOCK_WAIT,
            lock_lease: DEFAULT_LOCK_LEASE,
            probe_timeout: DEFAULT_CACHE_PROBE,
        })
    }

    /// Reads every setting from `source`, falling back to defaults only for
    /// keys that are absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first malformed key.
    pub fn from_source<S: ConfigSource + ?Sized>(source: &S) -> Result<Self> {
        let app_name = source
            .property(APP_NAME)
            .unwrap_or_else(|| DEFAULT_APP_NAME.to_owned());
        let pool_size = parse_or(source, POOL_SIZE, DEFAULT_POOL_SIZE, parse_u64)?;

        let config = Self::new(app_name, pool_size)?
            .with_enabled(parse_or(source, ENABLED, DEFAULT_ENABLED, parse_bool)?)
            .with_lock_wait(parse_or(source, LOCK_WAIT_MS, DEFAULT_LOCK_WAIT, parse_millis)?)
            .with_probe_timeout(parse_or(
                source,
                CACHE_PROBE_MS,
                DEFAULT_CACHE_PROBE,
                parse_millis,
            )?)
            .with_lock_lease(parse_or(
                source,
                LOCK_LEASE_MS,
                DEFAULT_LOCK_LEASE,
                parse_millis,
            )?)?;

        Ok(config)
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// # Errors
    ///
    /// A zero lease would expire before the critical section starts.
    pub fn with_lock_lease(mut self, lease: Duration) -> Result<Self> {
        if lease.is_zero() {
            return Err(Error::invalid_config(LOCK_LEASE_MS, "must be greater than 0"));
        }
        self.lock_lease = lease;
        Ok(self)
    }

    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Number of ids reserved from the durable counter per refill.
    pub const fn pool_size(&self) -> u64 {
        self.pool_size.get()
    }

    pub const fn pool_size_nonzero(&self) -> NonZeroU64 {
        self.pool_size
    }

    /// Whether distributed allocation should be used at all.
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub const fn lock_wait(&self) -> Duration {
        self.lock_wait
    }

    pub const fn lock_lease(&self) -> Duration {
        self.lock_lease
    }

    pub const fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Cache key holding this application's pool window.
    pub fn window_key(&self) -> String {
        format!("{}:keygen:window", self.app_name)
    }

    /// Name of the distributed lock guarding this application's sequence.
    pub fn lock_name(&self) -> String {
        format!("{}-KEY-GEN-LOCK", self.app_name)
    }

    /// Probes `cache`, treating a probe slower than
    /// [`Self::probe_timeout`] as unreachable.
    pub async fn is_cache_reachable<C: SharedCache>(&self, cache: &C) -> bool {
        tokio::time::timeout(self.probe_timeout, cache.is_reachable())
            .await
            .unwrap_or(false)
    }
}

fn parse_or<S, T>(
    source: &S,
    key: &str,
    default: T,
    parse: impl FnOnce(&str, &str) -> Result<T>,
) -> Result<T>
where
    S: ConfigSource + ?Sized,
{
    match source.property(key) {
        Some(raw) => parse(key, raw.trim()),
        None => Ok(default),
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|e| Error::invalid_config(key, format!("'{raw}' is not an unsigned integer: {e}")))
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration> {
    parse_u64(key, raw).map(Duration::from_millis)
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::invalid_config(
            key,
            format!("'{raw}' is not a boolean"),
        )),
    }
}
