//! Detect, correlate, remediate, notify.
//!
//! One upload event drives one run:
//!
//! ```text
//! Scanning -> Clean
//!          -> Correlating -> Deleting -> Notifying -> Remediated
//!                                                  -> PartiallyRemediated
//! Scanning | Deleting -> Aborted (PipelineError)
//! ```
//!
//! A run never retries. An aborted run returns its error so the caller leaves
//! the event for redelivery; deleting is idempotent and a repeated alert is
//! acceptable.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::alert::{AlertDetails, AlertDispatcher};
use crate::correlator::{IdentityCorrelator, UploadIdentity};
use crate::error::{PipelineError, Stage};
use crate::event::UploadEvent;
use crate::remediator::ObjectRemediator;
use crate::scanner::{ScanResult, Scanner};

pub const SCAN_COMPLETE_MESSAGE: &str = "Scan complete.";

const DEFAULT_CORRELATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RemediationStatus {
    Clean,
    Remediated,
    /// Object deleted but the alert was not delivered.
    PartiallyRemediated,
}

/// Terminal record of a run that was not aborted.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RemediationOutcome {
    pub status: RemediationStatus,
    pub scan_result: ScanResult,
    pub identity: Option<UploadIdentity>,
    pub notification_sent: Option<bool>,
    pub notification_error: Option<String>,
}

impl RemediationOutcome {
    pub fn response(&self) -> InvocationResponse {
        let status = if self.scan_result.is_malicious { "Malicious" } else { "Clean" };
        InvocationResponse {
            status_code: 200,
            body: serde_json::json!({
                "message": SCAN_COMPLETE_MESSAGE,
                "status": status,
            })
            .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub status_code: u16,
    pub body: String,
}

pub struct RemediationPipeline {
    scanner: Arc<dyn Scanner>,
    correlator: IdentityCorrelator,
    remediator: ObjectRemediator,
    dispatcher: AlertDispatcher,
    run_timeout: Option<Duration>,
    correlation_timeout: Duration,
}

impl RemediationPipeline {
    pub fn new(
        scanner: Arc<dyn Scanner>,
        correlator: IdentityCorrelator,
        remediator: ObjectRemediator,
        dispatcher: AlertDispatcher,
    ) -> Self {
        Self {
            scanner,
            correlator,
            remediator,
            dispatcher,
            run_timeout: None,
            correlation_timeout: DEFAULT_CORRELATION_TIMEOUT,
        }
    }

    /// Bounds every run; scanning, deleting and notifying are cut off once
    /// the deadline passes.
    pub fn with_run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    /// Bounds the uploader lookup. Time spent there is not charged to the run
    /// deadline, so a slow audit trail cannot starve the delete.
    pub fn with_correlation_timeout(mut self, correlation_timeout: Duration) -> Self {
        self.correlation_timeout = correlation_timeout;
        self
    }

    pub async fn run(&self, event: &UploadEvent) -> Result<RemediationOutcome, PipelineError> {
        let mut deadline = self
            .run_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let bucket = event.bucket.as_str();
        let key = event.key.as_str();

        tracing::info!(bucket, key, stage = %Stage::Scanning, "Scanning uploaded object");
        let scan_result = match within(deadline, self.scanner.scan(bucket, key)).await {
            Some(Ok(result)) => result,
            Some(Err(err)) => {
                tracing::error!(
                    bucket, key, stage = %Stage::Scanning,
                    "Scan failed, aborting run: {}", err
                );
                return Err(err.into());
            }
            None => return Err(deadline_exceeded(bucket, key, Stage::Scanning)),
        };

        if !scan_result.is_malicious {
            tracing::info!(bucket, key, "Object is clean: {}", scan_result.details);
            return Ok(RemediationOutcome {
                status: RemediationStatus::Clean,
                scan_result,
                identity: None,
                notification_sent: None,
                notification_error: None,
            });
        }

        tracing::warn!(bucket, key, "Malicious object detected: {}", scan_result.details);

        tracing::info!(bucket, key, stage = %Stage::Correlating, "Looking up uploader");
        let lookup_started = Instant::now();
        let lookup = self.correlator.correlate(bucket, key, event.event_time);
        let identity = match tokio::time::timeout(self.correlation_timeout, lookup).await {
            Ok(identity) => identity,
            Err(_) => {
                tracing::warn!(
                    bucket, key,
                    "Uploader lookup timed out after {:?}, continuing without identity",
                    self.correlation_timeout
                );
                UploadIdentity::not_found(event.event_time)
            }
        };
        let lookup_elapsed = lookup_started.elapsed();
        deadline = deadline.map(|at| at.checked_add(lookup_elapsed).unwrap_or(at));

        if identity.is_not_found() {
            tracing::warn!(bucket, key, "Alert will be sent without uploader identity");
        }

        tracing::info!(bucket, key, stage = %Stage::Deleting, "Deleting malicious object");
        match within(deadline, self.remediator.delete(bucket, key)).await {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                tracing::error!(
                    bucket, key, stage = %Stage::Deleting,
                    "Malicious object may still be present: {}", err
                );
                return Err(err.into());
            }
            None => return Err(deadline_exceeded(bucket, key, Stage::Deleting)),
        }

        tracing::info!(bucket, key, stage = %Stage::Notifying, "Sending alert");
        let details = AlertDetails {
            bucket,
            key,
            scan_result: &scan_result,
            identity: &identity,
        };
        let notify_error = match within(deadline, self.dispatcher.notify(&details)).await {
            Some(Ok(())) => None,
            Some(Err(err)) => Some(err.to_string()),
            None => Some(format!("run deadline exceeded while {}", Stage::Notifying)),
        };

        let status = match &notify_error {
            None => {
                tracing::info!(bucket, key, "Object remediated and alert sent");
                RemediationStatus::Remediated
            }
            Some(err) => {
                tracing::error!(
                    bucket, key, stage = %Stage::Notifying,
                    "Object deleted but alert was not delivered: {}", err
                );
                RemediationStatus::PartiallyRemediated
            }
        };

        Ok(RemediationOutcome {
            status,
            scan_result,
            identity: Some(identity),
            notification_sent: Some(notify_error.is_none()),
            notification_error: notify_error,
        })
    }
}

/// `None` when the deadline passes first.
async fn within<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

fn deadline_exceeded(bucket: &str, key: &str, stage: Stage) -> PipelineError {
    tracing::error!(bucket, key, %stage, "Run deadline exceeded, aborting run");
    PipelineError::DeadlineExceeded { stage }
}
