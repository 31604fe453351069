//! Retry policy and the retrying stage executor.
//!
//! The invoker performs single attempts; this module owns the attempt
//! budget, the exponential backoff schedule, and the audit trail: every
//! attempt is recorded as one AuditLogEntry before the runner proceeds or
//! returns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::domain::{AttemptOutcome, AuditLogEntry, Stage};
use crate::stages::{StageFailure, StageInvoker, StageOutput, StageRequest, StageService};

use super::audit_log::AuditLog;

/// Retry policy for failed stage invocations
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate the delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if another attempt fits in the budget
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A failure that ends the claim's workflow. Recorded as a Failed
/// ClaimVersion; no further stages run.
#[derive(Debug, Error)]
pub enum TerminalFailure {
    /// The stage itself failed terminally (validation, rejection, ...)
    #[error(transparent)]
    Stage(#[from] StageFailure),

    /// The retry budget ran out on a retryable failure
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The claim's overall time budget expired before this stage ran
    #[error("cancelled: {reason}")]
    Cancelled { reason: String },
}

impl TerminalFailure {
    /// Stable identifier written into Failed version payloads
    pub fn kind(&self) -> &'static str {
        match self {
            TerminalFailure::Stage(failure) => failure.kind(),
            TerminalFailure::RetriesExhausted { .. } => "retries_exhausted",
            TerminalFailure::Cancelled { .. } => "cancelled",
        }
    }
}

/// Executes one stage through the invoker with bounded retry, recording
/// one audit entry per attempt.
#[derive(Clone)]
pub struct StageRunner {
    invoker: StageInvoker,
    policy: RetryPolicy,
    audit: Arc<AuditLog>,
}

impl StageRunner {
    pub fn new(invoker: StageInvoker, policy: RetryPolicy, audit: Arc<AuditLog>) -> Self {
        Self {
            invoker,
            policy,
            audit,
        }
    }

    /// Drive a stage to a final outcome.
    ///
    /// The outer Result carries infrastructure errors (the audit log could
    /// not be written); the inner Result is the workflow outcome: stage
    /// output, or the terminal failure that ends the claim.
    pub async fn execute(
        &self,
        service: &dyn StageService,
        stage: Stage,
        request: &StageRequest,
    ) -> Result<Result<StageOutput, TerminalFailure>> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let started = Instant::now();

            let result = self.invoker.invoke(service, request).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    self.record(
                        AuditLogEntry::new(
                            &request.claim_id,
                            stage,
                            attempt,
                            AttemptOutcome::Success,
                            duration_ms,
                        ),
                        stage,
                    )
                    .await?;

                    debug!(%stage, attempt, duration_ms, "Stage attempt succeeded");
                    return Ok(Ok(output));
                }
                Err(failure) if failure.is_retryable() => {
                    self.record(
                        AuditLogEntry::new(
                            &request.claim_id,
                            stage,
                            attempt,
                            AttemptOutcome::RetryableFailure,
                            duration_ms,
                        )
                        .with_error(failure.to_string()),
                        stage,
                    )
                    .await?;

                    if self.policy.should_retry(attempt) {
                        let delay = self.policy.delay_for_attempt(attempt);
                        warn!(
                            %stage,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %failure,
                            "Stage attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    error!(%stage, attempt, error = %failure, "Retry budget exhausted");
                    return Ok(Err(TerminalFailure::RetriesExhausted {
                        attempts: attempt,
                        last_error: failure.to_string(),
                    }));
                }
                Err(failure) => {
                    self.record(
                        AuditLogEntry::new(
                            &request.claim_id,
                            stage,
                            attempt,
                            AttemptOutcome::TerminalFailure,
                            duration_ms,
                        )
                        .with_error(failure.to_string()),
                        stage,
                    )
                    .await?;

                    error!(%stage, attempt, error = %failure, "Stage failed terminally");
                    return Ok(Err(TerminalFailure::Stage(failure)));
                }
            }
        }
    }

    async fn record(&self, entry: AuditLogEntry, stage: Stage) -> Result<()> {
        self.audit
            .record(&entry)
            .await
            .with_context(|| format!("Failed to record audit entry for stage '{}'", stage))
    }
}
