//! Job executor loop
//!
//! Each executor reserves one job at a time, runs the handler under the
//! soft/hard execution timeouts, and settles the lease according to the
//! error classification: ack on success and not-found, transient nack
//! with backoff, permanent nack to the dead-letter bucket.

use convoforge_common::broker::{JobPriority, LeasedJob, NackReason};
use convoforge_common::errors::ErrorClass;
use convoforge_common::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::jobs::{self, JobContext};

const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);

pub async fn run_executor(executor_id: usize, ctx: Arc<JobContext>) {
    let worker_id = format!(
        "{}-{}",
        hostname_or_default(),
        executor_id
    );
    let visibility = Duration::from_secs(ctx.config.jobs.visibility_timeout_secs);
    let poll_interval = Duration::from_millis(ctx.config.jobs.poll_interval_ms);

    info!(worker_id = %worker_id, "Executor started");

    // Circuit breaker state
    let mut consecutive_failures: u32 = 0;

    loop {
        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            warn!(
                worker_id = %worker_id,
                failures = consecutive_failures,
                "Circuit breaker open, pausing..."
            );
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
        }

        match ctx
            .broker
            .reserve(&worker_id, &JobPriority::ALL, visibility)
            .await
        {
            Ok(Some(job)) => {
                let broker_failure = process_leased(&ctx, job).await;
                if broker_failure {
                    consecutive_failures += 1;
                } else {
                    consecutive_failures = 0;
                }
            }
            Ok(None) => {
                tokio::time::sleep(poll_interval).await;
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(worker_id = %worker_id, error = %e, "Reserve failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

/// Run one leased job to settlement. Returns true when the broker itself
/// failed (feeds the circuit breaker); handler failures do not.
async fn process_leased(ctx: &Arc<JobContext>, job: LeasedJob) -> bool {
    let kind = job.payload.kind();
    let started = Instant::now();
    let soft_timeout = Duration::from_secs(ctx.config.jobs.soft_timeout_secs);
    let hard_timeout = Duration::from_secs(ctx.config.jobs.hard_timeout_secs);

    debug!(
        job_id = %job.id,
        kind,
        attempt = job.attempt_count,
        "Job leased"
    );

    let work = jobs::dispatch(ctx, &job.payload);
    tokio::pin!(work);
    let soft = tokio::time::sleep(soft_timeout);
    tokio::pin!(soft);
    let mut warned = false;

    let outcome = loop {
        tokio::select! {
            result = &mut work => break Some(result),
            _ = &mut soft, if !warned => {
                warn!(job_id = %job.id, kind, elapsed_secs = started.elapsed().as_secs(), "Job running slow");
                warned = true;
            }
            _ = tokio::time::sleep(hard_timeout.saturating_sub(started.elapsed())), if warned => {
                break None;
            }
        }
    };

    let elapsed = started.elapsed().as_secs_f64();

    let settle = match outcome {
        None => {
            // Hard timeout: kill the execution; the broker re-leases
            // after visibility expiry of the implicit nack below.
            error!(job_id = %job.id, kind, "Job exceeded hard timeout, aborting");
            metrics::record_job(kind, "timeout", elapsed);
            ctx.broker
                .nack(job.id, NackReason::Transient("hard timeout exceeded".into()))
                .await
        }
        Some(Ok(())) => {
            metrics::record_job(kind, "ok", elapsed);
            ctx.broker.ack(job.id).await
        }
        Some(Err(e)) => match e.class() {
            ErrorClass::NotFound => {
                // The referenced record vanished between enqueue and
                // execute: no-op success.
                debug!(job_id = %job.id, kind, error = %e, "Job target gone, acking");
                metrics::record_job(kind, "not_found", elapsed);
                ctx.broker.ack(job.id).await
            }
            ErrorClass::Conflict => {
                debug!(job_id = %job.id, kind, error = %e, "CAS conflict, retrying");
                metrics::record_job(kind, "conflict", elapsed);
                ctx.broker
                    .nack(job.id, NackReason::Transient(e.to_string()))
                    .await
            }
            ErrorClass::TenantViolation => {
                // Fail closed. Dead-letter immediately and alert.
                error!(job_id = %job.id, kind, error = %e, "TENANT VIOLATION in job");
                metrics::record_tenant_violation(kind);
                metrics::record_job(kind, "tenant_violation", elapsed);
                metrics::record_dead_letter(kind);
                ctx.broker
                    .nack(job.id, NackReason::Permanent(e.to_string()))
                    .await
            }
            ErrorClass::Permanent => {
                warn!(job_id = %job.id, kind, error = %e, "Permanent job failure");
                metrics::record_job(kind, "permanent", elapsed);
                metrics::record_dead_letter(kind);
                ctx.broker
                    .nack(job.id, NackReason::Permanent(e.to_string()))
                    .await
            }
            ErrorClass::Transient => {
                warn!(job_id = %job.id, kind, error = %e, attempt = job.attempt_count, "Transient job failure");
                metrics::record_job(kind, "transient", elapsed);
                ctx.broker
                    .nack(job.id, NackReason::Transient(e.to_string()))
                    .await
            }
        },
    };

    if let Err(e) = settle {
        error!(job_id = %job.id, error = %e, "Failed to settle job lease");
        return true;
    }
    false
}

fn hostname_or_default() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string())
}
