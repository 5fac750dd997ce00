//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming conventions, shared by
//! every ConvoForge process.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all ConvoForge metrics
pub const METRICS_PREFIX: &str = "convoforge";

/// Register all metric descriptions
pub fn register_metrics() {
    // Ingest metrics
    describe_counter!(
        format!("{}_events_total", METRICS_PREFIX),
        Unit::Count,
        "Total gateway events processed"
    );

    describe_counter!(
        format!("{}_events_shed_total", METRICS_PREFIX),
        Unit::Count,
        "Low-priority enqueues shed under back-pressure"
    );

    // Job metrics
    describe_counter!(
        format!("{}_jobs_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Total jobs processed by outcome"
    );

    describe_histogram!(
        format!("{}_job_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Job execution latency in seconds"
    );

    describe_counter!(
        format!("{}_jobs_dead_lettered_total", METRICS_PREFIX),
        Unit::Count,
        "Jobs moved to the dead-letter bucket"
    );

    describe_gauge!(
        format!("{}_queue_depth", METRICS_PREFIX),
        Unit::Count,
        "Pending jobs in the broker"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total semantic search queries"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Search query latency in seconds"
    );

    // Consistency metrics
    describe_gauge!(
        format!("{}_sync_health_ratio", METRICS_PREFIX),
        Unit::Count,
        "Per-guild fraction of records synced to the vector namespace"
    );

    describe_counter!(
        format!("{}_reconciler_repairs_total", METRICS_PREFIX),
        Unit::Count,
        "Records re-enqueued or purged by the reconciler"
    );

    describe_counter!(
        format!("{}_tenant_violations_total", METRICS_PREFIX),
        Unit::Count,
        "Tenant-isolation failures (always alert-worthy)"
    );

    tracing::info!("Metrics registered");
}

/// Record one processed gateway event.
pub fn record_event(event_type: &str) {
    counter!(
        format!("{}_events_total", METRICS_PREFIX),
        "type" => event_type.to_string()
    )
    .increment(1);
}

/// Record a shed low-priority enqueue.
pub fn record_event_shed(event_type: &str) {
    counter!(
        format!("{}_events_shed_total", METRICS_PREFIX),
        "type" => event_type.to_string()
    )
    .increment(1);
}

/// Record a job completion by kind and outcome (ok, transient, permanent,
/// not_found, conflict).
pub fn record_job(kind: &str, outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_jobs_processed_total", METRICS_PREFIX),
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_job_duration_seconds", METRICS_PREFIX),
        "kind" => kind.to_string()
    )
    .record(duration_secs);
}

/// Record a dead-lettered job.
pub fn record_dead_letter(kind: &str) {
    counter!(
        format!("{}_jobs_dead_lettered_total", METRICS_PREFIX),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Publish the broker's pending depth.
pub fn set_queue_depth(depth: i64) {
    gauge!(format!("{}_queue_depth", METRICS_PREFIX)).set(depth as f64);
}

/// Record an embedding request.
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(batch_size.max(1) as u64);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

/// Record a semantic search.
pub fn record_search(duration_secs: f64, result_count: usize) {
    counter!(format!("{}_search_queries_total", METRICS_PREFIX)).increment(1);
    histogram!(format!("{}_search_duration_seconds", METRICS_PREFIX)).record(duration_secs);
    let _ = result_count;
}

/// Publish per-guild sync health.
pub fn set_sync_health(guild_id: i64, ratio: f64) {
    gauge!(
        format!("{}_sync_health_ratio", METRICS_PREFIX),
        "guild_id" => guild_id.to_string()
    )
    .set(ratio);
}

/// Record reconciler repair actions by drift class.
pub fn record_reconciler_repair(class: &str, count: u64) {
    if count > 0 {
        counter!(
            format!("{}_reconciler_repairs_total", METRICS_PREFIX),
            "class" => class.to_string()
        )
        .increment(count);
    }
}

/// Record a tenant-isolation failure.
pub fn record_tenant_violation(context: &str) {
    counter!(
        format!("{}_tenant_violations_total", METRICS_PREFIX),
        "context" => context.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_helpers_do_not_panic() {
        record_event("message_create");
        record_job("embed_session", "ok", 0.25);
        record_dead_letter("ingest_attachment");
        set_queue_depth(12);
        record_embedding(0.5, "mock-embedding", 8, true);
        set_sync_health(10, 0.97);
        record_tenant_violation("search");
    }
}
