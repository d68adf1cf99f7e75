//! Partition directory backed by etcd.
//!
//! Partition records live under the key prefix `q_<queue>`, one JSON value per
//! partition. The directory speaks to the etcd v3 JSON gateway, so keys and
//! values travel base64 encoded inside JSON bodies.

use super::directory::PartitionDirectory;
use super::error::{DiscoveryError, Result};
use super::types::{Partition, PartitionSet};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const QUEUE_KEY_PREFIX: &str = "q_";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// What to do when one partition record in a fetch cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// Fail the whole fetch.
    #[default]
    FailClosed,
    /// Log the bad record and return the rest.
    SkipMalformed,
}

impl FromStr for DecodePolicy {
    type Err = DiscoveryError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fail-closed" | "fail_closed" | "strict" => Ok(Self::FailClosed),
            "skip-malformed" | "skip_malformed" | "skip" => Ok(Self::SkipMalformed),
            other => Err(DiscoveryError::Config(format!(
                "decode policy must be one of: fail-closed, skip-malformed (got '{}')",
                other
            ))),
        }
    }
}

impl fmt::Display for DecodePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailClosed => f.write_str("fail-closed"),
            Self::SkipMalformed => f.write_str("skip-malformed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EtcdDirectoryConfig {
    /// Gateway endpoints, e.g. `http://10.0.0.5:2379`.
    pub endpoints: Vec<String>,
    /// Upper bound for one whole fetch, across all endpoints.
    pub fetch_timeout: Duration,
    /// Upper bound for the startup probe of each endpoint.
    pub dial_timeout: Duration,
    pub decode_policy: DecodePolicy,
}

impl EtcdDirectoryConfig {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            decode_policy: DecodePolicy::default(),
        }
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }
}

#[derive(Debug, Serialize)]
struct RangeRequest {
    key: String,
    range_end: String,
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    key: String,
    #[serde(default)]
    value: String,
}

pub struct EtcdDirectory {
    endpoints: Vec<String>,
    http_client: reqwest::Client,
    fetch_timeout: Duration,
    dial_timeout: Duration,
    decode_policy: DecodePolicy,
}

impl EtcdDirectory {
    /// Builds the directory without contacting etcd.
    pub fn new(config: EtcdDirectoryConfig) -> Result<Self> {
        let endpoints = config
            .endpoints
            .iter()
            .map(|endpoint| endpoint.trim())
            .filter(|endpoint| !endpoint.is_empty())
            .map(normalize_endpoint)
            .collect::<Vec<_>>();
        if endpoints.is_empty() {
            return Err(DiscoveryError::Config(
                "at least one etcd endpoint is required".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(config.dial_timeout)
            .build()
            .map_err(|e| {
                DiscoveryError::Config(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            endpoints,
            http_client,
            fetch_timeout: config.fetch_timeout,
            dial_timeout: config.dial_timeout,
            decode_policy: config.decode_policy,
        })
    }

    /// Builds the directory and waits until at least one endpoint answers.
    ///
    /// Fails with [`DiscoveryError::Unavailable`] when no endpoint answers
    /// within the dial timeout.
    pub async fn connect(config: EtcdDirectoryConfig) -> Result<Self> {
        let directory = Self::new(config)?;
        debug!(endpoints = ?directory.endpoints, "connecting to etcd");

        let mut failures = Vec::with_capacity(directory.endpoints.len());
        for endpoint in &directory.endpoints {
            match tokio::time::timeout(directory.dial_timeout, directory.probe(endpoint)).await {
                Ok(Ok(())) => {
                    info!(endpoint = %endpoint, "connected to etcd");
                    return Ok(directory);
                }
                Ok(Err(err)) => failures.push(format!("{}: {}", endpoint, err)),
                Err(_) => failures.push(format!(
                    "{}: no answer within {:?}",
                    endpoint, directory.dial_timeout
                )),
            }
        }

        error!(failures = ?failures, "failed to connect to etcd");
        Err(DiscoveryError::Unavailable(failures.join("; ")))
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn decode_policy(&self) -> DecodePolicy {
        self.decode_policy
    }

    async fn probe(&self, endpoint: &str) -> Result<()> {
        let url = format!("{}/v3/maintenance/status", endpoint);
        let response = self
            .http_client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Transport(format!(
                "status probe returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn range(&self, endpoint: &str, request: &RangeRequest) -> Result<RangeResponse> {
        let url = format!("{}/v3/kv/range", endpoint);
        let response = self.http_client.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Transport(format!(
                "range request to {} returned {}",
                endpoint,
                response.status()
            )));
        }
        response.json::<RangeResponse>().await.map_err(|e| {
            DiscoveryError::Transport(format!("Failed to parse range response: {}", e))
        })
    }

    async fn fetch_from_any_endpoint(&self, queue: &str) -> Result<PartitionSet> {
        let prefix = queue_key_prefix(queue);
        let request = RangeRequest {
            key: BASE64.encode(prefix.as_bytes()),
            range_end: BASE64.encode(prefix_range_end(prefix.as_bytes())),
        };

        let mut last_error = None;
        for endpoint in &self.endpoints {
            match self.range(endpoint, &request).await {
                Ok(response) => return decode_partitions(queue, response, self.decode_policy),
                Err(err) => {
                    warn!(endpoint = %endpoint, queue, error = %err, "etcd range request failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            DiscoveryError::Unavailable("no etcd endpoints configured".to_string())
        }))
    }
}

#[async_trait]
impl PartitionDirectory for EtcdDirectory {
    async fn fetch(&self, queue: &str) -> Result<PartitionSet> {
        debug!(queue, "fetching queue partitions from etcd");
        match tokio::time::timeout(self.fetch_timeout, self.fetch_from_any_endpoint(queue)).await {
            Ok(result) => result,
            Err(_) => Err(DiscoveryError::Timeout {
                queue: queue.to_string(),
                timeout: self.fetch_timeout,
            }),
        }
    }
}

pub fn queue_key_prefix(queue: &str) -> String {
    format!("{}{}", QUEUE_KEY_PREFIX, queue)
}

/// Smallest key greater than every key starting with `prefix`.
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // All bytes were 0xff: "\0" asks etcd for every key >= prefix.
    vec![0]
}

fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

fn decode_partitions(
    queue: &str,
    response: RangeResponse,
    policy: DecodePolicy,
) -> Result<PartitionSet> {
    let mut partitions = Vec::with_capacity(response.kvs.len());
    for kv in response.kvs {
        let key = BASE64
            .decode(kv.key.as_bytes())
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
            .unwrap_or(kv.key);
        debug!(queue, key = %key, "found partition key");

        // Records of a longer queue name sharing the prefix are skipped before decoding.
        if let Some(owner) = record_owner(&kv.value) {
            if owner != queue {
                debug!(queue, key = %key, owner = %owner, "skipping record of another queue");
                continue;
            }
        }

        match decode_record(&key, &kv.value) {
            Ok(partition) => partitions.push(partition),
            Err(err) => match policy {
                DecodePolicy::FailClosed => {
                    error!(queue, key = %key, error = %err, "error decoding partition record");
                    return Err(err);
                }
                DecodePolicy::SkipMalformed => {
                    warn!(queue, key = %key, error = %err, "skipping malformed partition record");
                }
            },
        }
    }
    PartitionSet::new(partitions)
}

#[derive(Deserialize)]
struct RecordOwner {
    #[serde(rename = "QueueName")]
    queue_name: String,
}

/// Queue named by a record, read even when the rest of the record is invalid.
fn record_owner(encoded_value: &str) -> Option<String> {
    let raw = BASE64.decode(encoded_value.as_bytes()).ok()?;
    serde_json::from_slice::<RecordOwner>(&raw)
        .ok()
        .map(|owner| owner.queue_name)
}

fn decode_record(key: &str, encoded_value: &str) -> Result<Partition> {
    let decode_error = |message: String| DiscoveryError::Decode {
        key: key.to_string(),
        message,
    };
    let raw = BASE64
        .decode(encoded_value.as_bytes())
        .map_err(|e| decode_error(format!("value is not base64: {}", e)))?;
    let partition: Partition =
        serde_json::from_slice(&raw).map_err(|e| decode_error(e.to_string()))?;
    if partition.id.trim().is_empty() {
        return Err(decode_error("partition id is empty".to_string()));
    }
    if partition.address.trim().is_empty() {
        return Err(decode_error("partition address is empty".to_string()));
    }
    Ok(partition)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: BASE64.encode(key),
            value: BASE64.encode(value),
        }
    }

    fn record(queue: &str, id: &str, draining: bool) -> String {
        format!(
            r#"{{"QueueName":"{}","Partition":"{}","UpdatedAt":"2024-03-01T12:00:00Z","Address":"http://{}:8080","IsDraining":{}}}"#,
            queue, id, id, draining
        )
    }

    #[test]
    fn prefix_range_end_increments_last_byte() {
        assert_eq!(prefix_range_end(b"q_orders"), b"q_ordert".to_vec());
        assert_eq!(prefix_range_end(&[b'a', 0xff]), vec![b'b']);
        assert_eq!(prefix_range_end(&[0xff, 0xff]), vec![0]);
    }

    #[test]
    fn endpoints_get_a_scheme() {
        assert_eq!(normalize_endpoint("10.0.0.1:2379/"), "http://10.0.0.1:2379");
        assert_eq!(normalize_endpoint("https://etcd:2379"), "https://etcd:2379");
    }

    #[test]
    fn decodes_all_records_of_the_queue() {
        let response = RangeResponse {
            kvs: vec![
                kv("q_orders_p1", &record("orders", "p1", false)),
                kv("q_orders_p2", &record("orders", "p2", true)),
            ],
        };
        let set = decode_partitions("orders", response, DecodePolicy::FailClosed).unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.iter().any(|p| p.id == "p2" && p.is_draining));
        assert_eq!(set.as_slice()[0].address, "http://p1:8080");
    }

    #[test]
    fn fail_closed_aborts_on_one_bad_record() {
        let response = RangeResponse {
            kvs: vec![
                kv("q_orders_p1", &record("orders", "p1", false)),
                kv("q_orders_p2", "{not json"),
            ],
        };
        let err = decode_partitions("orders", response, DecodePolicy::FailClosed).unwrap_err();

        match err {
            DiscoveryError::Decode { key, .. } => assert_eq!(key, "q_orders_p2"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn skip_malformed_keeps_good_records() {
        let response = RangeResponse {
            kvs: vec![
                kv("q_orders_p1", &record("orders", "p1", false)),
                kv("q_orders_p2", "{not json"),
                kv("q_orders_p3", r#"{"QueueName":"orders","Partition":"","Address":"x"}"#),
            ],
        };
        let set = decode_partitions("orders", response, DecodePolicy::SkipMalformed).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.as_slice()[0].id, "p1");
    }

    #[test]
    fn records_of_longer_queue_names_are_ignored() {
        let response = RangeResponse {
            kvs: vec![
                kv("q_orders_p1", &record("orders", "p1", false)),
                kv("q_orders2_p1", &record("orders2", "p1", false)),
            ],
        };
        let set = decode_partitions("orders", response, DecodePolicy::FailClosed).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.as_slice()[0].queue_name, "orders");
    }

    #[test]
    fn invalid_record_of_another_queue_does_not_fail_fetch() {
        let response = RangeResponse {
            kvs: vec![
                kv("q_orders_p1", &record("orders", "p1", false)),
                kv("q_orders2_p1", r#"{"QueueName":"orders2","Partition":"","Address":""}"#),
                kv("q_orders2_p2", r#"{"QueueName":"orders2","Partition":7}"#),
            ],
        };
        let set = decode_partitions("orders", response, DecodePolicy::FailClosed).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.as_slice()[0].id, "p1");
    }

    #[test]
    fn invalid_record_of_own_queue_still_fails_closed() {
        let response = RangeResponse {
            kvs: vec![kv("q_orders_p9", r#"{"QueueName":"orders","Partition":"p9","Address":""}"#)],
        };
        let err = decode_partitions("orders", response, DecodePolicy::FailClosed).unwrap_err();

        assert!(matches!(err, DiscoveryError::Decode { .. }));
    }

    #[test]
    fn empty_range_is_empty_set() {
        let response: RangeResponse =
            serde_json::from_str(r#"{"header":{"revision":"7"}}"#).unwrap();
        let set = decode_partitions("orders", response, DecodePolicy::FailClosed).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn decode_policy_parses_known_names() {
        assert_eq!("fail-closed".parse::<DecodePolicy>().unwrap(), DecodePolicy::FailClosed);
        assert_eq!("SKIP_MALFORMED".parse::<DecodePolicy>().unwrap(), DecodePolicy::SkipMalformed);
        assert!("lenient".parse::<DecodePolicy>().is_err());
    }

    #[test]
    fn new_requires_an_endpoint() {
        let err = EtcdDirectory::new(EtcdDirectoryConfig::new(vec![" ".to_string()]))
            .err()
            .unwrap();
        assert!(matches!(err, DiscoveryError::Config(_)));
    }
}
