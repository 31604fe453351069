//! Audit trail entries: one record per stage invocation attempt.
//!
//! The audit log is a compliance side channel, independent of the claim's
//! version history. It is append-only and never feeds back into workflow
//! control decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::claim::Stage;

/// One stage invocation attempt, success or failure.
///
/// Retries produce one entry each, so a stage that exhausts a budget of
/// three attempts leaves three rows behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Unique identifier for this entry
    pub log_id: Uuid,

    /// The claim whose stage was invoked
    pub claim_id: String,

    /// When the attempt finished (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// Stage that was invoked
    pub stage: Stage,

    /// 1-based attempt counter within one retry cycle
    pub attempt_number: u32,

    /// Classification of this attempt
    pub outcome: AttemptOutcome,

    /// Wall-clock duration of the attempt
    pub duration_ms: u64,

    /// Error message, present only on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl AuditLogEntry {
    /// Create an entry with the current timestamp and no error detail
    pub fn new(
        claim_id: impl Into<String>,
        stage: Stage,
        attempt_number: u32,
        outcome: AttemptOutcome,
        duration_ms: u64,
    ) -> Self {
        Self {
            log_id: Uuid::new_v4(),
            claim_id: claim_id.into(),
            timestamp: Utc::now(),
            stage,
            attempt_number,
            outcome,
            duration_ms,
            error_detail: None,
        }
    }

    /// Attach error detail for a failed attempt
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_detail = Some(error.into());
        self
    }
}

/// Classification of a single invocation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The stage returned a result
    Success,

    /// The attempt failed but the failure is retryable
    RetryableFailure,

    /// The attempt failed terminally; no retry follows
    TerminalFailure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serialization() {
        let entry = AuditLogEntry::new("CLAIM-001", Stage::Policy, 1, AttemptOutcome::Success, 42);

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: AuditLogEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.claim_id, "CLAIM-001");
        assert_eq!(parsed.stage, Stage::Policy);
        assert_eq!(parsed.outcome, AttemptOutcome::Success);
        assert_eq!(parsed.duration_ms, 42);
        assert!(parsed.error_detail.is_none());
    }

    #[test]
    fn test_error_detail_omitted_when_absent() {
        let entry = AuditLogEntry::new("CLAIM-001", Stage::Damage, 1, AttemptOutcome::Success, 5);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("error_detail"));
    }

    #[test]
    fn test_entry_with_error() {
        let entry = AuditLogEntry::new(
            "CLAIM-001",
            Stage::Valuation,
            2,
            AttemptOutcome::RetryableFailure,
            1500,
        )
        .with_error("service unavailable: 503");

        assert_eq!(
            entry.error_detail.as_deref(),
            Some("service unavailable: 503")
        );
        assert_eq!(entry.attempt_number, 2);
    }

    #[test]
    fn test_unique_log_ids() {
        let a = AuditLogEntry::new("C", Stage::Intake, 1, AttemptOutcome::Success, 1);
        let b = AuditLogEntry::new("C", Stage::Intake, 1, AttemptOutcome::Success, 1);
        assert_ne!(a.log_id, b.log_id);
    }
}
