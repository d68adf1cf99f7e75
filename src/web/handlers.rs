use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error};

use super::forward::UpstreamRequest;
use super::requests::{NackRecordRequest, RecordId, queue_header, validate_submit_body};
use super::{Result, WebError};
use crate::discovery::{PartitionSet, select_by_id, select_random};
use crate::metrics;
use crate::state::AppState;

pub async fn healthcheck() -> &'static str {
    "y"
}

pub async fn submit_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    validate_submit_body(&headers, &body)?;
    let queue = queue_header(&headers)?;

    let partitions = queue_partitions(&state, queue).await?;
    let partition = select_random(&partitions)
        .ok_or_else(|| WebError::not_found("No available partition for queue"))?;
    debug!(queue, partition = %partition.id, address = %partition.address, "submitting record");

    let request = UpstreamRequest::new(partition, Method::POST, vec!["record"], &headers).body(body);
    Ok(state.forwarder.forward(request).await?)
}

pub async fn fetch_record(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let queue = queue_header(&headers)?;

    let partitions = queue_partitions(&state, queue).await?;
    let partition = select_random(&partitions)
        .ok_or_else(|| WebError::not_found("No available partition for queue"))?;
    debug!(queue, partition = %partition.id, address = %partition.address, "fetching record");

    let request = UpstreamRequest::new(partition, Method::GET, vec!["record"], &headers)
        .short_circuit_no_content();
    Ok(state.forwarder.forward(request).await?)
}

pub async fn ack_record(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let queue = queue_header(&headers)?;
    let record_id = RecordId::parse(&record_id)?;

    let partitions = queue_partitions(&state, queue).await?;
    let partition = select_by_id(&partitions, record_id.partition_id())
        .ok_or_else(|| WebError::not_found("Partition not found"))?;
    debug!(queue, partition = %partition.id, record_id = record_id.as_str(), "acking record");

    let request = UpstreamRequest::new(
        partition,
        Method::POST,
        vec!["ack", record_id.as_str()],
        &headers,
    );
    Ok(state.forwarder.forward(request).await?)
}

pub async fn nack_record(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let queue = queue_header(&headers)?;
    let record_id = RecordId::parse(&record_id)?;
    let nack = NackRecordRequest::parse(&body)?;

    let partitions = queue_partitions(&state, queue).await?;
    let partition = select_by_id(&partitions, record_id.partition_id())
        .ok_or_else(|| WebError::not_found("Partition not found"))?;
    debug!(
        queue,
        partition = %partition.id,
        record_id = record_id.as_str(),
        delay_ms = ?nack.delay_ms,
        "nacking record"
    );

    let request = UpstreamRequest::new(
        partition,
        Method::POST,
        vec!["nack", record_id.as_str()],
        &headers,
    )
    .body(body);
    Ok(state.forwarder.forward(request).await?)
}

/// Routes `/ack/` and `/nack/` without an id.
pub async fn missing_record_id() -> WebError {
    WebError::bad_request("No record ID given")
}

pub async fn list_partitions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PartitionSet>> {
    let queue = queue_header(&headers)?;
    let partitions = queue_partitions(&state, queue).await?;
    Ok(Json(partitions))
}

pub async fn metrics_text() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            WebError::internal("Failed to encode metrics").into_response()
        }
    }
}

/// Resolves a queue to its current, non-empty partition set.
async fn queue_partitions(state: &AppState, queue: &str) -> Result<PartitionSet> {
    let partitions = state.partitions.get_or_fetch(queue).await.map_err(|err| {
        error!(queue, error = %err, "error getting partitions for queue");
        WebError::from(err)
    })?;
    if partitions.is_empty() {
        return Err(WebError::not_found("Queue not found"));
    }
    Ok(partitions)
}
