use std::sync::Arc;

use crate::discovery::PartitionCache;
use crate::web::Forwarder;

/// Process-wide state shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub partitions: Arc<PartitionCache>,
    pub forwarder: Forwarder,
}

impl AppState {
    pub fn new(partitions: Arc<PartitionCache>, forwarder: Forwarder) -> Self {
        Self {
            partitions,
            forwarder,
        }
    }
}
