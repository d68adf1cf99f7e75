// ============================================================================
// sq-router Library
// ============================================================================

pub mod config;
pub mod discovery;
pub mod metrics;
pub mod state;
pub mod web;

pub use config::RouterConfig;
pub use discovery::{
    DecodePolicy, DiscoveryError, EtcdDirectory, EtcdDirectoryConfig, InMemoryDirectory, Partition,
    PartitionCache, PartitionDirectory, PartitionSet,
};
pub use state::AppState;
pub use web::{ForwardConfig, Forwarder, WebError, build_router};
