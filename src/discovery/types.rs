use super::error::{DiscoveryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::sync::Arc;

/// One independently addressable shard of a queue.
///
/// Field names on the wire follow the records the partition manager writes
/// into the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Partition {
    #[serde(rename = "Partition")]
    pub id: String,
    #[serde(rename = "QueueName")]
    pub queue_name: String,
    /// Base URL of the partition's HTTP endpoint, scheme included.
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "UpdatedAt", default)]
    pub updated_at: DateTime<Utc>,
    /// A draining partition takes no new traffic but still owns its in-flight records.
    #[serde(rename = "IsDraining", default)]
    pub is_draining: bool,
}

impl Partition {
    pub fn new(
        queue_name: impl Into<String>,
        id: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            queue_name: queue_name.into(),
            address: address.into(),
            updated_at: Utc::now(),
            is_draining: false,
        }
    }

    pub fn draining(mut self, is_draining: bool) -> Self {
        self.is_draining = is_draining;
        self
    }

    pub fn updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }
}

/// Immutable snapshot of the partitions currently known for one queue.
///
/// Cloning is cheap; a refresh builds a new set instead of mutating one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSet {
    partitions: Arc<[Partition]>,
}

impl PartitionSet {
    /// Builds a set, rejecting duplicate partition ids.
    pub fn new(partitions: Vec<Partition>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(partitions.len());
        for partition in &partitions {
            if !seen.insert(partition.id.as_str()) {
                return Err(DiscoveryError::DuplicatePartition {
                    queue: partition.queue_name.clone(),
                    partition: partition.id.clone(),
                });
            }
        }
        Ok(Self {
            partitions: Arc::from(partitions),
        })
    }

    pub fn empty() -> Self {
        Self {
            partitions: Arc::from(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Partition> {
        self.partitions.iter()
    }

    pub fn as_slice(&self) -> &[Partition] {
        &self.partitions
    }

    /// True when both values share the same underlying snapshot.
    pub fn same_snapshot(&self, other: &PartitionSet) -> bool {
        Arc::ptr_eq(&self.partitions, &other.partitions)
    }
}

impl Default for PartitionSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a> IntoIterator for &'a PartitionSet {
    type Item = &'a Partition;
    type IntoIter = std::slice::Iter<'a, Partition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Serialize for PartitionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.partitions.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_partition_ids() {
        let err = PartitionSet::new(vec![
            Partition::new("orders", "p1", "http://a"),
            Partition::new("orders", "p1", "http://b"),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            DiscoveryError::DuplicatePartition {
                queue: "orders".to_string(),
                partition: "p1".to_string(),
            }
        );
    }

    #[test]
    fn decodes_store_record_with_defaults() {
        let partition: Partition = serde_json::from_str(
            r#"{"QueueName":"orders","Partition":"p1","Address":"http://10.0.0.1:8080"}"#,
        )
        .unwrap();

        assert_eq!(partition.id, "p1");
        assert_eq!(partition.queue_name, "orders");
        assert!(!partition.is_draining);
        assert_eq!(partition.updated_at, DateTime::<Utc>::default());
    }

    #[test]
    fn serializes_as_plain_array() {
        let set = PartitionSet::new(vec![Partition::new("orders", "p1", "http://a").draining(true)])
            .unwrap();
        let value = serde_json::to_value(&set).unwrap();

        assert_eq!(value[0]["Partition"], "p1");
        assert_eq!(value[0]["IsDraining"], true);
    }

    #[test]
    fn clones_share_snapshot() {
        let set = PartitionSet::new(vec![Partition::new("orders", "p1", "http://a")]).unwrap();
        let copy = set.clone();
        let rebuilt = PartitionSet::new(set.as_slice().to_vec()).unwrap();

        assert!(set.same_snapshot(&copy));
        assert!(!set.same_snapshot(&rebuilt));
        assert_eq!(set, rebuilt);
    }
}
