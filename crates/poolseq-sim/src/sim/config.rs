use anyhow::{Context, bail};
use clap::Parser;
use poolseq::{
    AllocatorConfig, RetryPolicy,
    config::{APP_NAME, CACHE_PROBE_MS, ENABLED, LOCK_LEASE_MS, LOCK_WAIT_MS, POOL_SIZE},
};
use std::{collections::HashMap, time::Duration};

/// Runtime configuration for the `poolseq-sim` binary.
///
/// The allocator settings mirror the library's property keys and use the
/// same environment variable names as [`poolseq::EnvSource`], so one `.env`
/// file drives both. They are passed through unparsed and validated by
/// [`AllocatorConfig::from_source`]; anything left unset takes the library
/// default.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "poolseq-sim",
    version,
    about = "Runs several sequence allocator instances against one shared cache, lock and counter"
)]
pub struct CliArgs {
    /// Namespace for the pool window key and the lock name.
    ///
    /// Environment variable: `POOLSEQ_APP_NAME`
    #[arg(long, env = "POOLSEQ_APP_NAME")]
    pub app_name: Option<String>,

    /// Ids reserved from the durable counter per refill.
    ///
    /// Environment variable: `POOLSEQ_KEYGEN_POOL_SIZE`
    #[arg(long, env = "POOLSEQ_KEYGEN_POOL_SIZE")]
    pub pool_size: Option<String>,

    /// Distributed allocation toggle. Allocation is off unless this is set.
    ///
    /// Environment variable: `POOLSEQ_KEYGEN_ENABLED`
    #[arg(long, env = "POOLSEQ_KEYGEN_ENABLED")]
    pub enabled: Option<String>,

    /// Upper bound, in milliseconds, on waiting for the allocation lock.
    ///
    /// Environment variable: `POOLSEQ_KEYGEN_LOCK_WAIT_MS`
    #[arg(long, env = "POOLSEQ_KEYGEN_LOCK_WAIT_MS")]
    pub lock_wait_ms: Option<String>,

    /// Lease, in milliseconds, after which a held lock self-expires.
    ///
    /// Environment variable: `POOLSEQ_KEYGEN_LOCK_LEASE_MS`
    #[arg(long, env = "POOLSEQ_KEYGEN_LOCK_LEASE_MS")]
    pub lock_lease_ms: Option<String>,

    /// Upper bound, in milliseconds, on the cache liveness probe.
    ///
    /// Environment variable: `POOLSEQ_KEYGEN_CACHE_PROBE_MS`
    #[arg(long, env = "POOLSEQ_KEYGEN_CACHE_PROBE_MS")]
    pub cache_probe_ms: Option<String>,

    /// Number of allocator instances, each standing in for one process.
    ///
    /// Environment variable: `SIM_INSTANCES`
    #[arg(long, env = "SIM_INSTANCES", default_value_t = 3)]
    pub instances: usize,

    /// Tasks drawing ids from each instance.
    ///
    /// Environment variable: `SIM_TASKS`
    #[arg(long, env = "SIM_TASKS", default_value_t = num_cpus::get())]
    pub tasks: usize,

    /// Ids each task draws before it stops.
    ///
    /// Environment variable: `SIM_IDS_PER_TASK`
    #[arg(long, env = "SIM_IDS_PER_TASK", default_value_t = 1_000)]
    pub ids_per_task: usize,

    /// Initial value of the durable counter.
    ///
    /// Environment variable: `SIM_START`
    #[arg(long, env = "SIM_START", default_value_t = 0)]
    pub start: u64,

    /// Attempts per id, including the first, before a task gives up.
    ///
    /// Environment variable: `SIM_MAX_ATTEMPTS`
    #[arg(long, env = "SIM_MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub allocator: AllocatorConfig,
    pub instances: usize,
    pub tasks: usize,
    pub ids_per_task: usize,
    pub start: u64,
    pub retry: RetryPolicy,
}

impl SimConfig {
    /// Ids the whole run draws when nothing fails or is cancelled.
    pub const fn total_ids(&self) -> usize {
        self.instances * self.tasks * self.ids_per_task
    }
}

impl TryFrom<CliArgs> for SimConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.instances == 0 {
            bail!("SIM_INSTANCES must be greater than 0");
        }
        if args.tasks == 0 {
            bail!("SIM_TASKS must be greater than 0");
        }
        if args.max_attempts == 0 {
            bail!("SIM_MAX_ATTEMPTS must be greater than 0");
        }
        args.instances
            .checked_mul(args.tasks)
            .and_then(|n| n.checked_mul(args.ids_per_task))
            .ok_or_else(|| anyhow::anyhow!("Overflow in total id count"))?;

        let properties: HashMap<String, String> = [
            (APP_NAME, args.app_name),
            (POOL_SIZE, args.pool_size),
            (ENABLED, args.enabled),
            (LOCK_WAIT_MS, args.lock_wait_ms),
            (LOCK_LEASE_MS, args.lock_lease_ms),
            (CACHE_PROBE_MS, args.cache_probe_ms),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_owned(), v)))
        .collect();

        let allocator =
            AllocatorConfig::from_source(&properties).context("invalid allocator configuration")?;

        let retry = RetryPolicy::new(
            args.max_attempts,
            Duration::from_millis(5),
            allocator.lock_lease().min(Duration::from_secs(1)),
        );

        Ok(Self {
            allocator,
            instances: args.instances,
            tasks: args.tasks,
            ids_per_task: args.ids_per_task,
            start: args.start,
            retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<SimConfig> {
        let args = CliArgs::try_parse_from(core::iter::once("poolseq-sim").chain(args.iter().copied()))?;
        SimConfig::try_from(args)
    }

    #[test]
    fn allocator_settings_flow_through_the_library_parser() {
        let config = parse(&[
            "--app-name",
            "orders",
            "--pool-size",
            "250",
            "--enabled",
            "yes",
            "--lock-wait-ms",
            "100",
            "--instances",
            "2",
            "--tasks",
            "3",
            "--ids-per-task",
            "10",
        ])
        .unwrap();

        assert_eq!(config.allocator.app_name(), "orders");
        assert_eq!(config.allocator.pool_size(), 250);
        assert!(config.allocator.is_enabled());
        assert_eq!(config.allocator.lock_wait(), Duration::from_millis(100));
        assert_eq!(config.total_ids(), 60);
    }

    #[test]
    fn malformed_allocator_setting_is_rejected() {
        let err = parse(&["--pool-size", "lots", "--instances", "1", "--tasks", "1"]).unwrap_err();
        assert!(format!("{err:#}").contains("keygen.pool.size"));
    }

    #[test]
    fn zero_instances_is_rejected() {
        assert!(parse(&["--instances", "0", "--tasks", "1"]).is_err());
    }
}
