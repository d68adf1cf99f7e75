//! Partition discovery: where a queue's partitions live and which one to use.
//!
//! [`PartitionDirectory`] is the authoritative lookup, [`PartitionCache`] sits in
//! front of it, and the selector functions pick a partition out of a snapshot.

pub mod cache;
pub mod directory;
pub mod error;
pub mod etcd;
pub mod selector;
pub mod types;

pub use cache::PartitionCache;
pub use directory::{InMemoryDirectory, PartitionDirectory};
pub use error::{DiscoveryError, Result};
pub use etcd::{DecodePolicy, EtcdDirectory, EtcdDirectoryConfig};
pub use selector::{select_by_id, select_random, select_random_with};
pub use types::{Partition, PartitionSet};
