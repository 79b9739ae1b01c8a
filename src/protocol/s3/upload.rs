//! Upload engine: plan once, then run whole-transfer attempts under retry

use super::connection::ConnectionManager;
use super::error::S3Result;
use super::progress::{ProgressEvent, ProgressReporter, ProgressTracker};
use super::recovery::{with_retry, RetryPolicy};
use super::strategy::{TransferPlan, TransferPlanner};
use super::transfer::TransferRequest;
use super::types::UploadAttributes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    /// Key that was written
    pub key: String,
    /// Plan the transfer ran with
    pub plan: TransferPlan,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Bytes uploaded
    pub bytes: u64,
    /// Wall-clock duration, backoff included
    pub elapsed: Duration,
    /// Backoff delays waited between attempts
    pub retry_delays: Vec<Duration>,
}

/// Drives transfer requests through the strategy, executor and retry policy
#[derive(Clone)]
pub struct Uploader {
    connections: Arc<ConnectionManager>,
    planner: TransferPlanner,
    policy: RetryPolicy,
}

impl Uploader {
    /// Create an uploader with default thresholds and the transfer retry preset
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            planner: TransferPlanner::default(),
            policy: RetryPolicy::transfer(),
        }
    }

    /// Override the strategy thresholds
    pub fn with_planner(mut self, planner: TransferPlanner) -> Self {
        self.planner = planner;
        self
    }

    /// Override the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Plan `request` without sending anything
    pub fn plan(&self, request: &TransferRequest) -> TransferPlan {
        self.planner.plan(request.size(), request.media_kind)
    }

    /// Upload `request`, reporting progress through `reporter`.
    ///
    /// Each attempt re-fetches the current connection; a retried chunked
    /// transfer starts over with a fresh multipart session. Progress never
    /// regresses across attempts.
    pub async fn upload(
        &self,
        request: &TransferRequest,
        reporter: ProgressReporter,
    ) -> S3Result<UploadOutcome> {
        let plan = self.plan(request);
        let total_bytes = request.size();
        let attributes = UploadAttributes {
            content_type: request.content_type.clone(),
            metadata: request.metadata.clone(),
        };
        let tracker = ProgressTracker::new(total_bytes, reporter);
        let started = Instant::now();

        info!(
            key = %request.key,
            bytes = total_bytes,
            mode = ?plan.mode,
            part_size = plan.part_size,
            concurrency = plan.max_concurrent_parts,
            media = %request.media_kind,
            "Starting upload"
        );

        let tracker_ref = &tracker;
        let plan_ref = &plan;
        let attributes_ref = &attributes;
        let result = with_retry(
            &self.policy,
            |context, error| {
                tracker_ref.event(ProgressEvent::Retrying {
                    attempt: context.attempts,
                    delay: context.next_delay.unwrap_or_default(),
                    error: error.to_string(),
                })
            },
            |attempt| async move {
                let connection = self.connections.current()?;
                tracker_ref.event(ProgressEvent::TransferStarted {
                    key: request.key.clone(),
                    total_bytes,
                    mode: plan_ref.mode,
                    attempt,
                });
                connection
                    .execute_transfer(
                        &request.key,
                        &request.payload,
                        plan_ref,
                        attributes_ref,
                        tracker_ref,
                    )
                    .await
            },
        )
        .await;

        match result {
            Ok(((), context)) => {
                let elapsed = started.elapsed();
                tracker.event(ProgressEvent::TransferCompleted {
                    key: request.key.clone(),
                    total_bytes,
                    duration: elapsed,
                });
                info!(
                    key = %request.key,
                    attempts = context.attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Upload complete"
                );
                Ok(UploadOutcome {
                    key: request.key.clone(),
                    plan,
                    attempts: context.attempts,
                    bytes: total_bytes,
                    elapsed,
                    retry_delays: context.delays,
                })
            }
            Err(error) => {
                tracker.event(ProgressEvent::TransferFailed {
                    key: request.key.clone(),
                    error: error.to_string(),
                });
                warn!(key = %request.key, error = %error, "Upload failed");
                Err(error)
            }
        }
    }
}
