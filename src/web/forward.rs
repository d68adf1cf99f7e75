//! Forwarding of client requests to a partition and relay of its answer.

use crate::discovery::Partition;
use axum::body::{Body, Bytes};
use axum::http::header::{CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to create forwarding client: {0}")]
    Client(String),
    #[error("failed to assemble forwarding request: {0}")]
    Build(String),
    #[error("failed to forward request: {0}")]
    Send(String),
    #[error("failed to read partition response: {0}")]
    Read(String),
}

#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Client-side bound on one upstream exchange.
    pub timeout: Duration,
    /// Drop hop-by-hop headers before forwarding. Off by default: every
    /// inbound header except the transport-managed ones is forwarded.
    pub strip_hop_by_hop: bool,
    /// Speak cleartext HTTP/2 (prior knowledge, no upgrade) to partitions.
    pub http2_prior_knowledge: bool,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
            strip_hop_by_hop: false,
            http2_prior_knowledge: false,
        }
    }
}

/// One request to relay to a partition.
#[derive(Debug)]
pub struct UpstreamRequest<'a> {
    partition: &'a Partition,
    method: Method,
    path: Vec<&'a str>,
    headers: &'a HeaderMap,
    body: Option<Bytes>,
    short_circuit_no_content: bool,
}

impl<'a> UpstreamRequest<'a> {
    /// `path` segments are appended to the partition address and percent-encoded.
    pub fn new(
        partition: &'a Partition,
        method: Method,
        path: Vec<&'a str>,
        headers: &'a HeaderMap,
    ) -> Self {
        Self {
            partition,
            method,
            path,
            headers,
            body: None,
            short_circuit_no_content: false,
        }
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Answer a partition `204` with an empty `204` without reading its body.
    pub fn short_circuit_no_content(mut self) -> Self {
        self.short_circuit_no_content = true;
        self
    }
}

#[derive(Clone)]
pub struct Forwarder {
    http_client: reqwest::Client,
    strip_hop_by_hop: bool,
}

impl Forwarder {
    pub fn new(config: &ForwardConfig) -> Result<Self, ForwardError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if config.http2_prior_knowledge {
            builder = builder.http2_prior_knowledge();
        }
        let http_client = builder
            .build()
            .map_err(|e| ForwardError::Client(e.to_string()))?;
        Ok(Self {
            http_client,
            strip_hop_by_hop: config.strip_hop_by_hop,
        })
    }

    pub fn strips_hop_by_hop(&self) -> bool {
        self.strip_hop_by_hop
    }

    /// Sends `request` to its partition and relays status, content type and body.
    ///
    /// No retries: a failed exchange surfaces once.
    pub async fn forward(&self, request: UpstreamRequest<'_>) -> Result<Response, ForwardError> {
        let url = upstream_url(request.partition, &request.path)?;
        let headers = upstream_headers(request.headers, self.strip_hop_by_hop);
        debug!(partition = %request.partition.id, method = %request.method, url = %url, "forwarding request");

        let mut builder = self
            .http_client
            .request(request.method, url)
            .headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            error!(partition = %request.partition.id, error = %e, "failed to forward request");
            ForwardError::Send(e.to_string())
        })?;

        let status = response.status();
        debug!(partition = %request.partition.id, status = status.as_u16(), "partition answered");
        if request.short_circuit_no_content && status == StatusCode::NO_CONTENT {
            return Ok(StatusCode::NO_CONTENT.into_response());
        }

        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(|e| {
            error!(partition = %request.partition.id, error = %e, "failed to read partition response body");
            ForwardError::Read(e.to_string())
        })?;

        let mut relayed = Response::new(Body::from(body));
        *relayed.status_mut() = status;
        if let Some(content_type) = content_type {
            relayed.headers_mut().insert(CONTENT_TYPE, content_type);
        }
        Ok(relayed)
    }
}

/// Builds `<address>/<segment>/...`, percent-encoding each segment.
pub fn upstream_url(partition: &Partition, path: &[&str]) -> Result<reqwest::Url, ForwardError> {
    let mut url = reqwest::Url::parse(&partition.address).map_err(|e| {
        ForwardError::Build(format!(
            "partition '{}' has invalid address '{}': {}",
            partition.id, partition.address, e
        ))
    })?;
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            ForwardError::Build(format!(
                "partition '{}' address '{}' cannot carry a path",
                partition.id, partition.address
            ))
        })?;
        segments.pop_if_empty().extend(path);
    }
    Ok(url)
}

/// Headers the HTTP client derives from the outgoing request itself.
fn is_transport_managed(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "host" | "content-length" | "transfer-encoding" | "trailer"
    )
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "upgrade"
    )
}

/// Copies the inbound headers that go upstream.
///
/// With `strip_hop_by_hop` set, hop-by-hop headers and any header named in
/// `Connection` are dropped as well.
pub fn upstream_headers(inbound: &HeaderMap, strip_hop_by_hop: bool) -> HeaderMap {
    let connection_listed = if strip_hop_by_hop {
        inbound
            .get_all(CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|token| token.trim().to_ascii_lowercase())
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>()
    } else {
        Vec::new()
    };

    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if is_transport_managed(name) {
            continue;
        }
        if strip_hop_by_hop
            && (is_hop_by_hop(name) || connection_listed.iter().any(|t| t == name.as_str()))
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}
