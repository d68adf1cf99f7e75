use futures::future::join_all;
use sq_router::{DiscoveryError, InMemoryDirectory, Partition, PartitionCache};
use std::sync::Arc;
use std::time::Duration;

async fn directory_with(queue: &str, ids: &[&str]) -> InMemoryDirectory {
    let directory = InMemoryDirectory::new();
    for id in ids {
        directory
            .upsert_partition(Partition::new(queue, *id, format!("http://{id}.local")))
            .await
            .unwrap();
    }
    directory
}

#[tokio::test]
async fn concurrent_misses_fetch_once() {
    let directory = directory_with("orders", &["p1", "p2"]).await;
    directory.set_latency(Some(Duration::from_millis(50))).await;
    let cache = Arc::new(PartitionCache::new(Arc::new(directory.clone())));

    let lookups = (0..32).map(|_| {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get_or_fetch("orders").await })
    });
    let results = join_all(lookups).await;

    let first = results[0].as_ref().unwrap().as_ref().unwrap().clone();
    for result in &results {
        let set = result.as_ref().unwrap().as_ref().unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.same_snapshot(&first));
    }
    assert_eq!(directory.fetch_count("orders").await, 1);
}

#[tokio::test]
async fn distinct_queues_are_fetched_separately() {
    let directory = directory_with("orders", &["p1"]).await;
    directory
        .upsert_partition(Partition::new("audit", "a1", "http://a1.local"))
        .await
        .unwrap();
    let cache = PartitionCache::new(Arc::new(directory.clone()));

    for _ in 0..3 {
        assert_eq!(cache.get_or_fetch("orders").await.unwrap().len(), 1);
        assert_eq!(cache.get_or_fetch("audit").await.unwrap().len(), 1);
    }

    assert_eq!(directory.fetch_count("orders").await, 1);
    assert_eq!(directory.fetch_count("audit").await, 1);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn concurrent_failures_leave_cache_empty() {
    let directory = directory_with("orders", &["p1"]).await;
    directory
        .set_failure(Some(DiscoveryError::Transport("connection reset".to_string())))
        .await;
    let cache = Arc::new(PartitionCache::new(Arc::new(directory.clone())));

    let lookups = (0..8).map(|_| {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get_or_fetch("orders").await })
    });
    for result in join_all(lookups).await {
        assert!(matches!(result.unwrap(), Err(DiscoveryError::Transport(_))));
    }
    assert!(cache.peek("orders").is_none());

    directory.set_failure(None).await;
    assert_eq!(cache.get_or_fetch("orders").await.unwrap().len(), 1);
}
