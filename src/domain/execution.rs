//! Workflow execution state and reconstruction from version history.
//!
//! A WorkflowExecution is the in-memory traversal state for one claim. It
//! is owned by the engine for the duration of a run and can always be
//! rebuilt by replaying the claim's durable version log, so status
//! inspection and resume need no out-of-band state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::claim::{ClaimVersion, Stage, VersionStatus};

/// In-memory state of one claim's traversal through the workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// The claim being processed
    pub claim_id: String,

    /// Stage of the most recently committed version (None before the first)
    pub current_stage: Option<Stage>,

    /// Highest committed version number (0 before the first)
    pub latest_version: u64,

    /// Union of completed stage payloads, keyed by stage name, plus the
    /// caller's initial reference under "reference"
    pub accumulated_context: Map<String, Value>,

    /// Partial results of the parallel phase until both branches land
    pub branch_results: BranchResults,

    /// Outcome per stage observed so far
    pub stage_statuses: HashMap<Stage, VersionStatus>,

    /// When the traversal started
    pub started_at: DateTime<Utc>,

    /// Set once a terminal version is observed
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Create a fresh execution for a claim with no history
    pub fn new(claim_id: impl Into<String>) -> Self {
        Self {
            claim_id: claim_id.into(),
            current_stage: None,
            latest_version: 0,
            accumulated_context: Map::new(),
            branch_results: BranchResults::default(),
            stage_statuses: HashMap::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Store the caller's opaque initial reference in the context
    pub fn with_reference(mut self, reference: Value) -> Self {
        self.accumulated_context
            .insert("reference".to_string(), reference);
        self
    }

    /// Reconstruct execution state by replaying a claim's version history
    /// (ascending). Returns None for an empty history.
    pub fn from_versions(versions: &[ClaimVersion]) -> Option<Self> {
        let first = versions.first()?;

        let mut exec = Self::new(first.claim_id.clone());
        exec.started_at = first.created_at;

        for version in versions {
            exec.apply_version(version);
        }

        Some(exec)
    }

    /// Fold one committed version into the execution state
    pub fn apply_version(&mut self, version: &ClaimVersion) {
        self.latest_version = version.version;
        self.current_stage = Some(version.stage);
        self.stage_statuses.insert(version.stage, version.status);

        match version.status {
            VersionStatus::Completed => match version.stage {
                Stage::Assessment => self.merge_assessment(&version.payload),
                Stage::TerminalSuccess => {
                    self.accumulated_context
                        .insert("decision".to_string(), version.payload.clone());
                    self.completed_at = Some(version.created_at);
                }
                stage if !stage.is_terminal() => {
                    self.accumulated_context
                        .insert(stage.context_key().to_string(), version.payload.clone());
                }
                _ => {}
            },
            VersionStatus::Failed => {
                self.completed_at = Some(version.created_at);
            }
            VersionStatus::Pending => {}
        }
    }

    /// Merge a successful branch result into context and branch bookkeeping
    pub fn record_branch(&mut self, stage: Stage, payload: Value) {
        match stage {
            Stage::Damage => self.branch_results.damage = Some(payload),
            Stage::Valuation => self.branch_results.valuation = Some(payload),
            _ => {}
        }
    }

    /// Split a combined assessment payload back into the disjoint
    /// damage/valuation context keys
    fn merge_assessment(&mut self, payload: &Value) {
        if let Some(object) = payload.as_object() {
            for key in ["damage", "valuation"] {
                if let Some(value) = object.get(key) {
                    self.accumulated_context
                        .insert(key.to_string(), value.clone());
                }
            }
        }
        self.branch_results.damage = self.accumulated_context.get("damage").cloned();
        self.branch_results.valuation = self.accumulated_context.get("valuation").cloned();
    }

    /// Check whether a stage already has a committed Completed version
    pub fn is_stage_completed(&self, stage: Stage) -> bool {
        self.stage_statuses
            .get(&stage)
            .map(|s| *s == VersionStatus::Completed)
            .unwrap_or(false)
    }

    /// Whether the workflow reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some()
            || self
                .current_stage
                .map(|s| s.is_terminal())
                .unwrap_or(false)
    }

    /// Whether the claim ended in TERMINAL_SUCCESS
    pub fn succeeded(&self) -> bool {
        self.is_stage_completed(Stage::TerminalSuccess)
    }

    /// The next phase to schedule, or None when the workflow is over.
    ///
    /// This is the state machine's transition table:
    /// START -> INTAKE -> POLICY -> PARALLEL{DAMAGE,VALUATION} -> DECISION.
    pub fn next_phase(&self) -> Option<Phase> {
        if self.is_finished() {
            return None;
        }

        match self.current_stage {
            None => Some(Phase::Intake),
            Some(Stage::Intake) => Some(Phase::Policy),
            Some(Stage::Policy) | Some(Stage::Damage) | Some(Stage::Valuation) => {
                Some(Phase::Assessment)
            }
            Some(Stage::Assessment) | Some(Stage::Decision) => Some(Phase::Decision),
            Some(Stage::TerminalSuccess) | Some(Stage::TerminalFailure) => None,
        }
    }
}

/// A schedulable phase of the workflow. `Assessment` is the parallel
/// damage/valuation fan-out; the rest are single sequential stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Intake,
    Policy,
    Assessment,
    Decision,
}

impl Phase {
    /// The stage label this phase commits (or is blamed for when it
    /// cannot run)
    pub fn stage(&self) -> Stage {
        match self {
            Phase::Intake => Stage::Intake,
            Phase::Policy => Stage::Policy,
            Phase::Assessment => Stage::Assessment,
            Phase::Decision => Stage::Decision,
        }
    }
}

/// Holds the parallel phase's partial results until both branches complete
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchResults {
    pub damage: Option<Value>,
    pub valuation: Option<Value>,
}

impl BranchResults {
    /// Both branches have landed
    pub fn is_complete(&self) -> bool {
        self.damage.is_some() && self.valuation.is_some()
    }

    /// The combined fan-in payload: `{"damage": .., "valuation": ..}`
    pub fn combined(&self) -> Option<Value> {
        match (&self.damage, &self.valuation) {
            (Some(damage), Some(valuation)) => Some(serde_json::json!({
                "damage": damage,
                "valuation": valuation,
            })),
            _ => None,
        }
    }
}
