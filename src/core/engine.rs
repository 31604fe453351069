//! Workflow engine for claim processing.
//!
//! Drives a claim through the staged state machine, committing each
//! stage's result as a new immutable version and recording every
//! attempt in the audit trail.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{Phase, Stage, VersionStatus, WorkflowExecution};
use crate::stages::{StageInvoker, StageOutput, StageRequest, StageService, StageSet};

use super::audit_log::AuditLog;
use super::claim_store::{validate_claim_id, ClaimStore, StoreError};
use super::retry::{RetryPolicy, StageRunner, TerminalFailure};

/// Engine tuning, suitable for embedding in the config file
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Retry behavior for transient stage failures
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Deadline for a single stage invocation
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_seconds: u64,

    /// Overall budget for one workflow run (restarts on resume)
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_seconds: u64,

    /// Largest stage payload the engine will accept
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: u64,
}

fn default_stage_timeout() -> u64 {
    60
}
fn default_claim_timeout() -> u64 {
    900
}
fn default_max_payload() -> u64 {
    1_048_576
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            stage_timeout_seconds: default_stage_timeout(),
            claim_timeout_seconds: default_claim_timeout(),
            max_payload_bytes: default_max_payload(),
        }
    }
}

impl WorkflowConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_seconds)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_seconds)
    }
}

/// Main claim workflow engine.
///
/// Cheap to clone; clones share the same store and audit log.
#[derive(Clone)]
pub struct WorkflowEngine {
    config: WorkflowConfig,
    store: Arc<ClaimStore>,
    stages: StageSet,
    runner: StageRunner,
}

impl WorkflowEngine {
    /// Create an engine over an opened store and audit log
    pub fn new(
        config: WorkflowConfig,
        store: Arc<ClaimStore>,
        audit: Arc<AuditLog>,
        stages: StageSet,
    ) -> Self {
        let invoker = StageInvoker::new(config.stage_timeout(), config.max_payload_bytes);
        let runner = StageRunner::new(invoker, config.retry, audit);

        Self {
            config,
            store,
            stages,
            runner,
        }
    }

    /// Run a claim's workflow to a terminal state.
    ///
    /// Resume-aware: the durable version history is replayed first and
    /// execution picks up after the last committed stage, so completed
    /// stages never run twice. Workflow failures are recorded as a
    /// Failed version and returned as a finished execution; `Err` is
    /// reserved for infrastructure problems (store or audit log I/O).
    #[instrument(skip(self, initial_reference), fields(claim_id = %claim_id))]
    pub async fn run_claim(
        &self,
        claim_id: &str,
        initial_reference: Value,
    ) -> Result<WorkflowExecution> {
        validate_claim_id(claim_id)?;

        let history = self.store.get_history(claim_id).await?;
        let mut exec = match WorkflowExecution::from_versions(&history) {
            Some(exec) => {
                info!(
                    latest_version = exec.latest_version,
                    "Resuming claim from durable history"
                );
                exec
            }
            None => {
                info!("Starting claim workflow");
                WorkflowExecution::new(claim_id)
            }
        }
        .with_reference(initial_reference);

        if exec.is_finished() {
            info!("Claim already terminal, nothing to do");
            return Ok(exec);
        }

        let budget = self.config.claim_timeout();
        let started = Instant::now();

        while let Some(phase) = exec.next_phase() {
            // Budget check before scheduling; in-flight stages run to
            // their own timeout and are never interrupted mid-attempt
            if started.elapsed() >= budget {
                let stage = phase.stage();
                let failure = TerminalFailure::Cancelled {
                    reason: format!(
                        "claim budget of {}s exceeded before stage '{}' ran",
                        self.config.claim_timeout_seconds, stage
                    ),
                };
                return self.fail_claim(exec, stage, failure).await;
            }

            match phase {
                Phase::Intake => {
                    match self
                        .run_stage(&exec, Stage::Intake, &self.stages.intake)
                        .await?
                    {
                        Ok(output) => {
                            self.commit_completed(&mut exec, Stage::Intake, output.payload)
                                .await?
                        }
                        Err(failure) => return self.fail_claim(exec, Stage::Intake, failure).await,
                    }
                }
                Phase::Policy => {
                    match self
                        .run_stage(&exec, Stage::Policy, &self.stages.policy)
                        .await?
                    {
                        Ok(output) => {
                            self.commit_completed(&mut exec, Stage::Policy, output.payload)
                                .await?
                        }
                        Err(failure) => return self.fail_claim(exec, Stage::Policy, failure).await,
                    }
                }
                Phase::Assessment => {
                    if let Some((stage, failure)) = self.run_assessment(&mut exec).await? {
                        return self.fail_claim(exec, stage, failure).await;
                    }

                    let combined = exec
                        .branch_results
                        .combined()
                        .context("Both branches succeeded but combined payload is missing")?;
                    self.commit_completed(&mut exec, Stage::Assessment, combined)
                        .await?;
                }
                Phase::Decision => {
                    match self
                        .run_stage(&exec, Stage::Decision, &self.stages.decision)
                        .await?
                    {
                        Ok(output) => {
                            let decision = output.payload;
                            self.commit_completed(
                                &mut exec,
                                Stage::TerminalSuccess,
                                decision.clone(),
                            )
                            .await?;

                            if exec.succeeded() {
                                self.write_report(&exec, decision).await?;
                            }
                        }
                        Err(failure) => {
                            return self.fail_claim(exec, Stage::Decision, failure).await
                        }
                    }
                }
            }
        }

        if exec.succeeded() {
            info!(
                latest_version = exec.latest_version,
                "Claim workflow completed successfully"
            );
        }

        Ok(exec)
    }

    /// Spawn the workflow as a background task. The terminal outcome is
    /// observable through the claim store even if the handle is dropped.
    pub fn start(&self, claim_id: impl Into<String>, initial_reference: Value) -> ExecutionHandle {
        let claim_id = claim_id.into();
        let engine = self.clone();
        let task_claim = claim_id.clone();

        let task =
            tokio::spawn(async move { engine.run_claim(&task_claim, initial_reference).await });

        ExecutionHandle { claim_id, task }
    }

    /// Reconstruct a claim's execution state from its version history
    pub async fn claim_status(&self, claim_id: &str) -> Result<WorkflowExecution> {
        let history = self.store.get_history(claim_id).await?;

        if history.is_empty() {
            anyhow::bail!("Claim {} not found", claim_id);
        }

        WorkflowExecution::from_versions(&history).context("Failed to reconstruct claim state")
    }

    /// List recent claims, most recently started first
    pub async fn list_claims(&self, limit: usize) -> Result<Vec<WorkflowExecution>> {
        let claim_ids = self.store.list_claims().await?;
        let mut executions = Vec::new();

        for claim_id in claim_ids.into_iter().take(limit) {
            if let Ok(exec) = self.claim_status(&claim_id).await {
                executions.push(exec);
            }
        }

        // Sort by start time (most recent first)
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(executions)
    }

    async fn run_stage(
        &self,
        exec: &WorkflowExecution,
        stage: Stage,
        service: &Arc<dyn StageService>,
    ) -> Result<std::result::Result<StageOutput, TerminalFailure>> {
        let request = StageRequest::new(&exec.claim_id, exec.accumulated_context.clone());
        self.runner.execute(service.as_ref(), stage, &request).await
    }

    /// Fan out the damage and valuation branches and wait for both.
    ///
    /// The decision stage must never see a half-complete context, so a
    /// terminal failure on either branch fails the whole claim even when
    /// the other branch succeeded. When both fail, the damage branch is
    /// reported and the valuation failure is left to the audit trail.
    async fn run_assessment(
        &self,
        exec: &mut WorkflowExecution,
    ) -> Result<Option<(Stage, TerminalFailure)>> {
        let request = StageRequest::new(&exec.claim_id, exec.accumulated_context.clone());

        info!("Fanning out damage and valuation branches");
        let (damage, valuation) = tokio::join!(
            self.runner
                .execute(self.stages.damage.as_ref(), Stage::Damage, &request),
            self.runner
                .execute(self.stages.valuation.as_ref(), Stage::Valuation, &request),
        );

        match (damage?, valuation?) {
            (Ok(damage), Ok(valuation)) => {
                exec.record_branch(Stage::Damage, damage.payload);
                exec.record_branch(Stage::Valuation, valuation.payload);
                Ok(None)
            }
            (Err(failure), Ok(_)) => Ok(Some((Stage::Damage, failure))),
            (Ok(_), Err(failure)) => Ok(Some((Stage::Valuation, failure))),
            (Err(damage_failure), Err(valuation_failure)) => {
                warn!(
                    valuation_error = %valuation_failure,
                    "Both branches failed, reporting the damage branch"
                );
                Ok(Some((Stage::Damage, damage_failure)))
            }
        }
    }

    /// Append a stage's Completed version.
    ///
    /// Tolerates concurrent writers: on a version conflict the claim is
    /// re-read and the append retried from the fresh base; if the fresh
    /// history shows this stage already Completed (or the claim already
    /// terminal), the duplicate result is discarded without a write.
    async fn commit_completed(
        &self,
        exec: &mut WorkflowExecution,
        stage: Stage,
        payload: Value,
    ) -> Result<()> {
        loop {
            if exec.is_finished() {
                warn!(%stage, "Claim reached a terminal state elsewhere, discarding result");
                return Ok(());
            }

            if exec.is_stage_completed(stage) {
                debug!(%stage, "Stage already committed, discarding duplicate result");
                return Ok(());
            }

            match self
                .store
                .append_version(
                    &exec.claim_id,
                    exec.latest_version,
                    stage,
                    payload.clone(),
                    VersionStatus::Completed,
                )
                .await
            {
                Ok(version) => {
                    info!(%stage, version = version.version, "Committed stage version");
                    exec.apply_version(&version);
                    return Ok(());
                }
                Err(StoreError::VersionConflict {
                    expected, actual, ..
                }) => {
                    warn!(%stage, expected, actual, "Version conflict, re-reading claim history");
                    self.refresh(exec).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Record a terminal failure as the claim's final version
    async fn fail_claim(
        &self,
        mut exec: WorkflowExecution,
        failed_stage: Stage,
        failure: TerminalFailure,
    ) -> Result<WorkflowExecution> {
        error!(
            stage = %failed_stage,
            kind = failure.kind(),
            error = %failure,
            "Claim failed"
        );

        let payload = json!({
            "failed_stage": failed_stage.context_key(),
            "kind": failure.kind(),
            "error": failure.to_string(),
        });

        loop {
            if exec.is_finished() {
                return Ok(exec);
            }

            match self
                .store
                .append_version(
                    &exec.claim_id,
                    exec.latest_version,
                    Stage::TerminalFailure,
                    payload.clone(),
                    VersionStatus::Failed,
                )
                .await
            {
                Ok(version) => {
                    exec.apply_version(&version);
                    return Ok(exec);
                }
                Err(StoreError::VersionConflict { .. }) => {
                    self.refresh(&mut exec).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Rebuild execution state from durable history, keeping the initial
    /// reference and any branch results gathered in this process
    async fn refresh(&self, exec: &mut WorkflowExecution) -> Result<()> {
        let history = self.store.get_history(&exec.claim_id).await?;

        let mut fresh = WorkflowExecution::from_versions(&history)
            .unwrap_or_else(|| WorkflowExecution::new(&exec.claim_id));

        if let Some(reference) = exec.accumulated_context.get("reference").cloned() {
            fresh = fresh.with_reference(reference);
        }
        if fresh.branch_results.damage.is_none() {
            fresh.branch_results.damage = exec.branch_results.damage.clone();
        }
        if fresh.branch_results.valuation.is_none() {
            fresh.branch_results.valuation = exec.branch_results.valuation.clone();
        }

        *exec = fresh;
        Ok(())
    }

    async fn write_report(&self, exec: &WorkflowExecution, decision: Value) -> Result<()> {
        let report = json!({
            "claim_id": exec.claim_id,
            "completed_at": exec.completed_at,
            "final_version": exec.latest_version,
            "decision": decision,
        });

        let path = self.store.write_report(&exec.claim_id, &report).await?;
        info!(path = %path.display(), "Wrote decision report");

        Ok(())
    }
}

/// Handle to a workflow running in the background
pub struct ExecutionHandle {
    claim_id: String,
    task: JoinHandle<Result<WorkflowExecution>>,
}

impl ExecutionHandle {
    pub fn claim_id(&self) -> &str {
        &self.claim_id
    }

    /// Wait for the workflow to reach a terminal state
    pub async fn join(self) -> Result<WorkflowExecution> {
        self.task
            .await
            .context("Workflow task panicked or was aborted")?
    }
}
