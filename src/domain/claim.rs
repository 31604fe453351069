//! Claim versions: the immutable, append-only record of claim state.
//!
//! A claim is never mutated. Every stage transition appends a new
//! ClaimVersion; the current state of a claim is the version with the
//! highest number.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable snapshot of claim state after a stage transition.
///
/// Versions for a claim are totally ordered, starting at 1. Once written
/// a version is never edited or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimVersion {
    /// The claim this version belongs to
    pub claim_id: String,

    /// Monotonically increasing, unique per claim (first version is 1)
    pub version: u64,

    /// The stage this version records
    pub stage: Stage,

    /// Outcome of the transition
    pub status: VersionStatus,

    /// Stage-specific result, opaque to the engine
    pub payload: serde_json::Value,

    /// When this version was written (ISO 8601)
    pub created_at: DateTime<Utc>,
}

impl ClaimVersion {
    /// Create a version record with the current timestamp
    pub fn new(
        claim_id: impl Into<String>,
        version: u64,
        stage: Stage,
        status: VersionStatus,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            version,
            stage,
            status,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Processing stages of a claim workflow.
///
/// `Assessment` labels the single combined version written when the
/// parallel damage/valuation phase joins; `Damage` and `Valuation` label
/// the individual branch invocations in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Policy,
    Damage,
    Valuation,
    Assessment,
    Decision,
    TerminalSuccess,
    TerminalFailure,
}

impl Stage {
    /// Key under which this stage's payload is merged into the
    /// accumulated context passed to later stages.
    pub fn context_key(&self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Policy => "policy",
            Stage::Damage => "damage",
            Stage::Valuation => "valuation",
            Stage::Assessment => "assessment",
            Stage::Decision => "decision",
            Stage::TerminalSuccess => "terminal_success",
            Stage::TerminalFailure => "terminal_failure",
        }
    }

    /// Whether this stage ends the workflow
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::TerminalSuccess | Stage::TerminalFailure)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.context_key())
    }
}

/// Outcome recorded on a ClaimVersion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Staged but not yet resolved (never written by the engine itself)
    Pending,

    /// Stage completed successfully
    Completed,

    /// Terminal failure
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_serialization_roundtrip() {
        let version = ClaimVersion::new(
            "CLAIM-001",
            1,
            Stage::Intake,
            VersionStatus::Completed,
            serde_json::json!({"entities": {"policy_number": "AUTO-001"}}),
        );

        let json = serde_json::to_string(&version).unwrap();
        let parsed: ClaimVersion = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.claim_id, "CLAIM-001");
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.stage, Stage::Intake);
        assert_eq!(parsed.status, VersionStatus::Completed);
    }

    #[test]
    fn test_stage_snake_case_encoding() {
        let json = serde_json::to_string(&Stage::TerminalSuccess).unwrap();
        assert_eq!(json, "\"terminal_success\"");

        let parsed: Stage = serde_json::from_str("\"terminal_failure\"").unwrap();
        assert_eq!(parsed, Stage::TerminalFailure);
    }

    #[test]
    fn test_terminal_stages() {
        assert!(Stage::TerminalSuccess.is_terminal());
        assert!(Stage::TerminalFailure.is_terminal());
        assert!(!Stage::Intake.is_terminal());
        assert!(!Stage::Assessment.is_terminal());
    }

    #[test]
    fn test_stage_display_matches_context_key() {
        assert_eq!(Stage::Damage.to_string(), "damage");
        assert_eq!(Stage::Assessment.to_string(), "assessment");
    }
}
