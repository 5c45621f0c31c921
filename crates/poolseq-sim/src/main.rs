#![doc = include_str!("../README.md")]

mod sim;

use anyhow::bail;
use clap::Parser;
use futures::future::try_join_all;
use poolseq::{MemoryCache, MemoryCounter, MemoryLock, Reconciliation, SequenceAllocator};
use sim::config::{CliArgs, SimConfig};
use sim::telemetry::init_telemetry;
use sim::workers::{Batch, SimAllocator, verify, worker_loop};
use std::{sync::Arc, time::Instant};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = SimConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    // One cache, lock service and counter shared by every instance, the way
    // separate processes would share the real ones.
    let cache = MemoryCache::new();
    let lock = MemoryLock::new();
    let counter = MemoryCounter::new(config.start);

    let mut allocators: Vec<Arc<SimAllocator>> = Vec::with_capacity(config.instances);
    for instance in 0..config.instances {
        let allocator = SequenceAllocator::new(
            config.allocator.clone(),
            cache.clone(),
            lock.clone(),
            counter.clone(),
        );
        match allocator.reconcile().await? {
            Reconciliation::Initialized { window } => tracing::info!(
                instance,
                current_id = window.current_id,
                reset_on_id = window.reset_on_id,
                "instance created the pool window"
            ),
            Reconciliation::AlreadyInitialized { window } => tracing::info!(
                instance,
                current_id = window.current_id,
                "instance joined an existing pool window"
            ),
            Reconciliation::Cleared { .. } => {
                bail!(
                    "distributed allocation is disabled; pass --enabled true or set POOLSEQ_KEYGEN_ENABLED=true"
                );
            }
            Reconciliation::CacheUnreachable => bail!("shared cache is unreachable"),
        }
        allocators.push(Arc::new(allocator));
    }

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(shutdown_signal(shutdown.clone()));

    let started = Instant::now();
    let mut tasks = Vec::with_capacity(config.instances * config.tasks);
    for (instance, allocator) in allocators.iter().enumerate() {
        for task in 0..config.tasks {
            tasks.push(tokio::spawn(worker_loop(
                instance,
                task,
                Arc::clone(allocator),
                config.ids_per_task,
                config.retry,
                shutdown.clone(),
            )));
        }
    }

    let batches = try_join_all(tasks)
        .await?
        .into_iter()
        .collect::<anyhow::Result<Vec<Batch>>>()?;
    let elapsed = started.elapsed();

    let interrupted = shutdown.is_cancelled();
    shutdown.cancel();
    let _ = signals.await;

    let summary = verify(&batches)?;
    let window = allocators[0].window().await?;
    let rate = summary.issued as f64 / elapsed.as_secs_f64().max(f64::EPSILON);

    tracing::info!(
        issued = summary.issued,
        expected = config.total_ids(),
        lowest = ?summary.lowest,
        highest = ?summary.highest,
        gaps = summary.gaps(),
        durable = counter.value(),
        window_current_id = window.current_id,
        window_reset_on_id = window.reset_on_id,
        ?elapsed,
        ids_per_sec = rate as u64,
        "all ids unique"
    );

    if interrupted {
        tracing::info!("Run interrupted before every task finished");
    }
    Ok(())
}

fn log_startup_info(config: &SimConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting simulation with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting simulation: {} instances x {} tasks x {} ids (pool size {})",
            config.instances,
            config.tasks,
            config.ids_per_task,
            config.allocator.pool_size()
        );
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
        () = shutdown.cancelled() => return,
    }

    tracing::info!("Shutdown signal received, cancelling workers...");
    shutdown.cancel();
}
