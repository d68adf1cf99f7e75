//! Prometheus metrics for the router.
//!
//! Everything registers into one custom registry prefixed with `sq_router`, so
//! names never collide with metrics of linked libraries. Registration failures
//! are logged and the metric keeps working unregistered.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder, exponential_buckets,
};
use std::time::Duration;
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry =
        Registry::new_custom(Some("sq_router".to_string()), None).unwrap_or_else(|_| Registry::new());

    pub static ref TOTAL_REQUESTS: IntCounter =
        register_int_counter(&REGISTRY, "total_reqs", "Total number of http requests");

    pub static ref HTTP_RESPONSES: IntCounterVec = register_int_counter_vec(
        &REGISTRY,
        "http_responses",
        "HTTP responses by status code and endpoint",
        &["code", "endpoint"],
    );

    pub static ref HTTP_LATENCY: HistogramVec = register_histogram_vec(
        &REGISTRY,
        "http_latency",
        "Latency of HTTP responses in milliseconds",
        &["code", "endpoint"],
        exponential_buckets(1.0, 3.0, 10).unwrap_or_default(),
    );

    pub static ref PARTITION_CACHE_HITS: IntCounter =
        register_int_counter(&REGISTRY, "partition_cache_hits", "Partition lookups served from cache");

    pub static ref PARTITION_CACHE_MISSES: IntCounter =
        register_int_counter(&REGISTRY, "partition_cache_misses", "Partition lookups that missed the cache");

    pub static ref DIRECTORY_FETCHES: IntCounterVec = register_int_counter_vec(
        &REGISTRY,
        "directory_fetches",
        "Partition directory fetches by outcome",
        &["outcome"],
    );
}

fn register_int_counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name/help should be valid");
    if let Err(e) = registry.register(Box::new(counter.clone())) {
        warn!(name, error = %e, "Failed to register IntCounter metric, using unregistered fallback");
    }
    counter
}

fn register_int_counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(Opts::new(name, help), labels).expect("metric opts should be valid");
    if let Err(e) = registry.register(Box::new(counter.clone())) {
        warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
    }
    counter
}

fn register_histogram_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    if let Err(e) = registry.register(Box::new(histogram.clone())) {
        warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
    }
    histogram
}

/// Maps a request path to a bounded endpoint label.
///
/// Record ids would explode label cardinality, so `/ack/*` and `/nack/*`
/// collapse to their prefix and unknown paths share one label.
pub fn endpoint_label(path: &str) -> &'static str {
    match path {
        "/hc" => "/hc",
        "/record" => "/record",
        "/partitions" => "/partitions",
        "/metrics" => "/metrics",
        p if p.starts_with("/ack") => "/ack",
        p if p.starts_with("/nack") => "/nack",
        _ => "other",
    }
}

/// Records one served HTTP response.
pub fn record_response(endpoint: &str, status: u16, elapsed: Duration) {
    let code = status.to_string();
    TOTAL_REQUESTS.inc();
    HTTP_RESPONSES.with_label_values(&[code.as_str(), endpoint]).inc();
    HTTP_LATENCY
        .with_label_values(&[code.as_str(), endpoint])
        .observe(elapsed.as_secs_f64() * 1000.0);
}

/// Renders every registered metric in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_and_nack_paths_collapse() {
        assert_eq!(endpoint_label("/ack/p1_42"), "/ack");
        assert_eq!(endpoint_label("/nack/p1_42"), "/nack");
        assert_eq!(endpoint_label("/record"), "/record");
        assert_eq!(endpoint_label("/wp-admin"), "other");
    }

    #[test]
    fn rendered_output_contains_recorded_response() {
        record_response("/record", 201, Duration::from_millis(4));
        let text = render().unwrap();

        assert!(text.contains("sq_router_total_reqs"));
        assert!(text.contains(r#"sq_router_http_responses{code="201",endpoint="/record"}"#));
    }
}
