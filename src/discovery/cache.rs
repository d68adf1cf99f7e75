//! Read-through partition cache with thundering-herd suppression.
//!
//! Hits are served from a concurrent map without touching the refresh lock.
//! Misses serialize on one exclusive section shared by all queues; inside it a
//! per-queue refresh stamp lets a waiter reuse the refresh that just finished
//! instead of querying the directory again. For any queue, at most one
//! directory fetch happens per herd window.

use super::directory::PartitionDirectory;
use super::error::Result;
use super::types::PartitionSet;
use crate::metrics;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_HERD_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct CacheEntry {
    partitions: PartitionSet,
    expires_at: Instant,
}

pub struct PartitionCache {
    directory: Arc<dyn PartitionDirectory>,
    entries: DashMap<String, CacheEntry>,
    /// Last successful refresh per queue. The mutex is the miss-path exclusive section.
    herd_guard: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    herd_window: Duration,
}

impl PartitionCache {
    pub fn new(directory: Arc<dyn PartitionDirectory>) -> Self {
        Self::with_timing(directory, DEFAULT_CACHE_TTL, DEFAULT_HERD_WINDOW)
    }

    pub fn with_timing(
        directory: Arc<dyn PartitionDirectory>,
        ttl: Duration,
        herd_window: Duration,
    ) -> Self {
        Self {
            directory,
            entries: DashMap::new(),
            herd_guard: Mutex::new(HashMap::new()),
            ttl,
            herd_window,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn herd_window(&self) -> Duration {
        self.herd_window
    }

    /// Number of entries held. Expired ones count until the next refresh of any
    /// queue, or a read of their own queue, removes them.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached, unexpired partitions of `queue` without fetching.
    pub fn peek(&self, queue: &str) -> Option<PartitionSet> {
        self.lookup(queue)
    }

    /// Drops the cached entry of `queue`; the next read refreshes it.
    pub fn invalidate(&self, queue: &str) {
        self.entries.remove(queue);
    }

    /// Returns the partitions of `queue`, fetching them from the directory on a miss.
    ///
    /// Directory failures propagate unchanged and leave both the cache and the
    /// herd guard as they were.
    pub async fn get_or_fetch(&self, queue: &str) -> Result<PartitionSet> {
        if let Some(partitions) = self.lookup(queue) {
            metrics::PARTITION_CACHE_HITS.inc();
            return Ok(partitions);
        }
        metrics::PARTITION_CACHE_MISSES.inc();
        debug!(queue, "partition cache miss, fetching from directory");

        let mut herd_guard = self.herd_guard.lock().await;

        let now = Instant::now();
        let refreshed_recently = herd_guard
            .get(queue)
            .is_some_and(|last_refresh| now.duration_since(*last_refresh) < self.herd_window);
        if refreshed_recently {
            if let Some(partitions) = self.lookup(queue) {
                debug!(queue, "reusing partitions from concurrent refresh");
                return Ok(partitions);
            }
            // Entry invalidated or shorter-lived than the herd window.
            debug!(queue, "herd window open but entry is gone, refreshing");
        }

        let partitions = match self.directory.fetch(queue).await {
            Ok(partitions) => {
                metrics::DIRECTORY_FETCHES.with_label_values(&["ok"]).inc();
                partitions
            }
            Err(err) => {
                metrics::DIRECTORY_FETCHES.with_label_values(&["error"]).inc();
                error!(queue, error = %err, "error fetching queue partitions when backfilling cache");
                return Err(err);
            }
        };

        let refreshed_at = Instant::now();
        // Queue names come from clients; drop every expired entry, not just this one.
        self.entries.retain(|_, entry| refreshed_at < entry.expires_at);
        self.entries.insert(
            queue.to_string(),
            CacheEntry {
                partitions: partitions.clone(),
                expires_at: refreshed_at + self.ttl,
            },
        );
        let herd_window = self.herd_window;
        herd_guard.retain(|_, last_refresh| refreshed_at.duration_since(*last_refresh) < herd_window);
        herd_guard.insert(queue.to_string(), refreshed_at);
        debug!(queue, partitions = partitions.len(), "partition cache refreshed");

        Ok(partitions)
    }

    fn lookup(&self, queue: &str) -> Option<PartitionSet> {
        let now = Instant::now();
        let expired = match self.entries.get(queue) {
            Some(entry) if now < entry.expires_at => return Some(entry.partitions.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(queue, |_, entry| now >= entry.expires_at);
        }
        None
    }
}
