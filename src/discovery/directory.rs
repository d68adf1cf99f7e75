use super::error::{DiscoveryError, Result};
use super::types::{Partition, PartitionSet};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Authoritative source of a queue's partitions.
#[async_trait]
pub trait PartitionDirectory: Send + Sync {
    /// Returns every partition currently registered for `queue`.
    ///
    /// An unknown queue yields an empty set, not an error. Implementations
    /// return either the complete set or an error, never a partial set.
    async fn fetch(&self, queue: &str) -> Result<PartitionSet>;
}

#[derive(Default)]
struct InMemoryDirectoryState {
    queues: HashMap<String, Vec<Partition>>,
    fetch_counts: HashMap<String, usize>,
    latency: Option<Duration>,
    failure: Option<DiscoveryError>,
}

/// A directory held entirely in process memory.
///
/// Backs tests and local development. Counts fetches per queue and can be told
/// to stall or fail so callers can be exercised without a metadata store.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    state: Arc<Mutex<InMemoryDirectoryState>>,
    total_fetches: Arc<AtomicUsize>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a partition, keyed by its queue and id.
    pub async fn upsert_partition(&self, partition: Partition) -> Result<()> {
        if partition.id.trim().is_empty() {
            return Err(DiscoveryError::Config(
                "partition id must not be empty".to_string(),
            ));
        }
        let mut state = self.state.lock().await;
        let partitions = state
            .queues
            .entry(partition.queue_name.clone())
            .or_default();
        match partitions.iter_mut().find(|p| p.id == partition.id) {
            Some(existing) => *existing = partition,
            None => partitions.push(partition),
        }
        Ok(())
    }

    /// Removes a partition. Returns true if it was present.
    pub async fn remove_partition(&self, queue: &str, partition_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(partitions) = state.queues.get_mut(queue) else {
            return false;
        };
        let before = partitions.len();
        partitions.retain(|p| p.id != partition_id);
        before != partitions.len()
    }

    /// Flips the draining flag of an existing partition.
    pub async fn set_draining(&self, queue: &str, partition_id: &str, draining: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let partition = state
            .queues
            .get_mut(queue)
            .and_then(|partitions| partitions.iter_mut().find(|p| p.id == partition_id))
            .ok_or_else(|| {
                DiscoveryError::Config(format!(
                    "partition '{}' is not registered for queue '{}'",
                    partition_id, queue
                ))
            })?;
        partition.is_draining = draining;
        Ok(())
    }

    /// Delays every subsequent fetch by `latency`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    /// Makes every subsequent fetch fail with `failure` until cleared with `None`.
    pub async fn set_failure(&self, failure: Option<DiscoveryError>) {
        self.state.lock().await.failure = failure;
    }

    pub async fn fetch_count(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.fetch_counts.get(queue).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.total_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PartitionDirectory for InMemoryDirectory {
    async fn fetch(&self, queue: &str) -> Result<PartitionSet> {
        self.total_fetches.fetch_add(1, Ordering::SeqCst);
        let latency = {
            let mut state = self.state.lock().await;
            *state.fetch_counts.entry(queue.to_string()).or_default() += 1;
            state.latency
        };

        // Sleep outside the lock so concurrent fetches overlap like real ones do.
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let state = self.state.lock().await;
        if let Some(failure) = state.failure.clone() {
            return Err(failure);
        }
        let partitions = state.queues.get(queue).cloned().unwrap_or_default();
        PartitionSet::new(partitions)
    }
}
