use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use std::time::Instant;
use tower_http::trace::TraceLayer;

use super::handlers::{
    ack_record, fetch_record, healthcheck, list_partitions, metrics_text, missing_record_id,
    nack_record, submit_record,
};
use crate::metrics;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/hc", get(healthcheck))
        .route("/record", post(submit_record).get(fetch_record))
        .route("/ack/", post(missing_record_id))
        .route("/ack/:record_id", post(ack_record))
        .route("/nack/", post(missing_record_id))
        .route("/nack/:record_id", post(nack_record))
        .route("/partitions", get(list_partitions))
        .route("/metrics", get(metrics_text))
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let endpoint = metrics::endpoint_label(request.uri().path());
    let started = Instant::now();
    let response = next.run(request).await;
    metrics::record_response(endpoint, response.status().as_u16(), started.elapsed());
    response
}
