//! Id-drawing tasks and the uniqueness check run over their output.

use anyhow::{Context, bail};
use poolseq::{MemoryCache, MemoryCounter, MemoryLock, RetryPolicy, SequenceAllocator};
use std::{collections::HashSet, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Every simulated process runs one of these over the shared in-memory
/// collaborators.
pub type SimAllocator = SequenceAllocator<MemoryCache, MemoryLock, MemoryCounter>;

/// Ids drawn by one task, in the order they were issued.
#[derive(Debug)]
pub struct Batch {
    pub instance: usize,
    pub task: usize,
    pub ids: Vec<u64>,
}

/// Draws up to `count` ids, stopping early if `shutdown` is cancelled.
///
/// # Errors
///
/// Fails on the first id that could not be allocated within the retry
/// policy.
pub async fn worker_loop(
    instance: usize,
    task: usize,
    allocator: Arc<SimAllocator>,
    count: usize,
    retry: RetryPolicy,
    shutdown: CancellationToken,
) -> anyhow::Result<Batch> {
    tracing::trace!(instance, task, "worker started");

    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let id = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::debug!(instance, task, drawn = ids.len(), "worker cancelled");
                break;
            }
            id = allocator.next_id_with_retry(&retry) => id,
        };
        ids.push(id.with_context(|| format!("instance {instance} task {task}"))?);
    }

    tracing::trace!(instance, task, drawn = ids.len(), "worker stopped");
    Ok(Batch {
        instance,
        task,
        ids,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub issued: usize,
    pub lowest: Option<u64>,
    pub highest: Option<u64>,
}

impl Summary {
    /// Ids in `[lowest, highest]` that nobody received. Non-zero when a
    /// window was abandoned after its durable reservation.
    pub fn gaps(&self) -> u64 {
        match (self.lowest, self.highest) {
            (Some(lo), Some(hi)) => (hi - lo + 1).saturating_sub(self.issued as u64),
            _ => 0,
        }
    }
}

/// Checks that no id was issued twice and that each task saw strictly
/// increasing ids.
///
/// # Errors
///
/// Names the first duplicate or ordering violation found.
pub fn verify(batches: &[Batch]) -> anyhow::Result<Summary> {
    let mut seen = HashSet::new();

    for batch in batches {
        if let Some(pair) = batch.ids.windows(2).find(|pair| pair[0] >= pair[1]) {
            bail!(
                "instance {} task {} saw id {} after {}",
                batch.instance,
                batch.task,
                pair[1],
                pair[0]
            );
        }
        for &id in &batch.ids {
            if !seen.insert(id) {
                bail!(
                    "id {id} issued more than once (again to instance {} task {})",
                    batch.instance,
                    batch.task
                );
            }
        }
    }

    Ok(Summary {
        issued: seen.len(),
        lowest: seen.iter().min().copied(),
        highest: seen.iter().max().copied(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(task: usize, ids: &[u64]) -> Batch {
        Batch {
            instance: 0,
            task,
            ids: ids.to_vec(),
        }
    }

    #[test]
    fn interleaved_batches_pass() {
        let summary = verify(&[batch(0, &[500, 502, 505]), batch(1, &[501, 503, 504])]).unwrap();
        assert_eq!(summary.issued, 6);
        assert_eq!(summary.lowest, Some(500));
        assert_eq!(summary.highest, Some(505));
        assert_eq!(summary.gaps(), 0);
    }

    #[test]
    fn duplicate_across_tasks_is_caught() {
        let err = verify(&[batch(0, &[1, 2]), batch(1, &[2, 3])]).unwrap_err();
        assert!(err.to_string().contains("id 2"));
    }

    #[test]
    fn out_of_order_within_a_task_is_caught() {
        assert!(verify(&[batch(0, &[5, 4])]).is_err());
    }

    #[test]
    fn gaps_count_unissued_ids() {
        let summary = verify(&[batch(0, &[10, 11, 15])]).unwrap();
        assert_eq!(summary.gaps(), 3);
    }

    #[test]
    fn empty_run() {
        let summary = verify(&[]).unwrap();
        assert_eq!(summary.issued, 0);
        assert_eq!(summary.gaps(), 0);
    }

    #[tokio::test]
    async fn cancelled_worker_stops_early() {
        let config = poolseq::AllocatorConfig::new("sim", 10)
            .unwrap()
            .with_enabled(true);
        let allocator = Arc::new(SequenceAllocator::new(
            config,
            MemoryCache::new(),
            MemoryLock::new(),
            MemoryCounter::new(0),
        ));
        allocator.reconcile().await.unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let batch = worker_loop(0, 0, allocator, 100, RetryPolicy::default(), shutdown)
            .await
            .unwrap();
        assert!(batch.ids.is_empty());
    }
}
