use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Partition lookup for queue '{queue}' timed out after {timeout:?}")]
    Timeout { queue: String, timeout: Duration },

    #[error("Metadata store transport error: {0}")]
    Transport(String),

    #[error("Failed to decode partition record '{key}': {message}")]
    Decode { key: String, message: String },

    #[error("Partition '{partition}' appears more than once in queue '{queue}'")]
    DuplicatePartition { queue: String, partition: String },

    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid discovery configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

impl From<reqwest::Error> for DiscoveryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
