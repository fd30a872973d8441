use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const ROWS_PARSED: &str = "inventory_producer_rows_parsed_total";
pub const BATCHES_SENT: &str = "inventory_producer_batches_sent_total";
pub const MESSAGES_SENT: &str = "inventory_producer_messages_sent_total";
pub const ENTRIES_FAILED: &str = "inventory_producer_entries_failed_total";
pub const OBJECTS_PROCESSED: &str = "inventory_producer_objects_processed_total";
pub const OBJECTS_FAILED: &str = "inventory_producer_objects_failed_total";

pub const MESSAGES_RECEIVED: &str = "inventory_consumer_messages_received_total";
pub const MESSAGES_STORED: &str = "inventory_consumer_messages_stored_total";
pub const MESSAGES_FAILED: &str = "inventory_consumer_messages_failed_total";
pub const ACK_FAILED: &str = "inventory_consumer_ack_failed_total";
pub const BATCH_DURATION: &str = "inventory_consumer_batch_duration_seconds";
pub const RECEIVE_ERRORS: &str = "inventory_consumer_receive_errors_total";

pub const MESSAGES_DEAD_LETTERED: &str = "inventory_queue_messages_dead_lettered_total";
pub const OLDEST_MESSAGE_AGE: &str = "inventory_queue_oldest_message_age_seconds";

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
/// This function is intended to take a Router as returned by `setup_metrics_routes`, potentially with more routes added by the caller.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Add the prometheus endpoint and middleware to a router, should be called last.
pub fn setup_metrics_routes(router: Router) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics)))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    // Run the rest of the request handling first, so we can measure it and get response
    // codes.
    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}

/// Records the time between creation and drop as a histogram entry, in seconds.
pub struct TimingGuard {
    name: &'static str,
    start: Instant,
}

pub fn timing_guard(name: &'static str) -> TimingGuard {
    TimingGuard {
        name,
        start: Instant::now(),
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        metrics::histogram!(self.name).record(self.start.elapsed().as_secs_f64());
    }
}
