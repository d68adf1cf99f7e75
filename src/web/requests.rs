//! Minimal shape checks applied to inbound requests before routing.

use super::{Result, WebError};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use serde::Deserialize;
use serde::de::IgnoredAny;
use thiserror::Error;

/// Header naming the queue a request targets.
pub const QUEUE_HEADER: &str = "sq-queue";

/// Returns the non-empty `sq-queue` header value.
pub fn queue_header(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(QUEUE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|queue| !queue.is_empty())
        .ok_or_else(|| WebError::bad_request("Invalid queue header"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordIdError {
    #[error("record id is empty")]
    Empty,
    #[error("record id has no partition prefix")]
    MissingPartitionPrefix,
    #[error("record id has an empty partition prefix")]
    EmptyPartitionPrefix,
}

impl From<RecordIdError> for WebError {
    fn from(err: RecordIdError) -> Self {
        match err {
            RecordIdError::Empty => WebError::bad_request("No record ID given"),
            RecordIdError::MissingPartitionPrefix | RecordIdError::EmptyPartitionPrefix => {
                WebError::bad_request("Bad record ID given")
            }
        }
    }
}

/// A record identifier as minted by a partition: `<partition id>_<rest>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordId<'a> {
    raw: &'a str,
    partition_id: &'a str,
}

impl<'a> RecordId<'a> {
    /// Splits off the owning partition id.
    ///
    /// An id without `_` is rejected rather than treated as a bare partition id.
    pub fn parse(raw: &'a str) -> std::result::Result<Self, RecordIdError> {
        if raw.is_empty() {
            return Err(RecordIdError::Empty);
        }
        let (partition_id, _) = raw
            .split_once('_')
            .ok_or(RecordIdError::MissingPartitionPrefix)?;
        if partition_id.is_empty() {
            return Err(RecordIdError::EmptyPartitionPrefix);
        }
        Ok(Self { raw, partition_id })
    }

    pub fn as_str(&self) -> &'a str {
        self.raw
    }

    pub fn partition_id(&self) -> &'a str {
        self.partition_id
    }
}

/// Optional body of a nack.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NackRecordRequest {
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl NackRecordRequest {
    /// An empty body is a nack without delay; anything else must be a JSON
    /// object whose `delay_ms`, when present, is a non-negative integer.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|_| WebError::bad_request("Invalid body"))?;
        if !value.is_object() {
            return Err(WebError::bad_request("Invalid body"));
        }
        serde_json::from_value(value).map_err(|_| WebError::bad_request("Invalid body"))
    }
}

/// A submitted record must carry a body, and a JSON one must parse.
pub fn validate_submit_body(headers: &HeaderMap, body: &[u8]) -> Result<()> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(WebError::bad_request("Invalid body"));
    }
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.to_ascii_lowercase().contains("json"));
    if is_json {
        serde_json::from_slice::<IgnoredAny>(body)
            .map_err(|_| WebError::bad_request("Invalid body"))?;
    }
    Ok(())
}
