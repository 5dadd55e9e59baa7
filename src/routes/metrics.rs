use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the pipeline's metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "upload_jobs_submitted_total",
        "Upload jobs accepted and queued, by kind"
    );
    metrics::describe_counter!(
        "upload_jobs_completed_total",
        "Upload jobs completed with at least one URL"
    );
    metrics::describe_counter!(
        "upload_jobs_failed_total",
        "Processing passes that produced no URL"
    );
    metrics::describe_counter!(
        "upload_jobs_requeued_total",
        "Deliveries returned to the queue for retry"
    );
    metrics::describe_counter!(
        "upload_jobs_dropped_total",
        "Undecodable deliveries rejected without requeue"
    );
    metrics::describe_histogram!(
        "upload_job_processing_seconds",
        "Time to compress and upload every input of a job"
    );
    metrics::describe_gauge!("upload_queue_depth", "Messages waiting in each queue");
}

/// GET /metrics renders the Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}
