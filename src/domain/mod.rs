//! Domain types for the claim workflow.
//!
//! This module contains the core data structures:
//! - Claim versions: immutable, append-only claim state records
//! - Audit entries: one record per stage invocation attempt
//! - Execution: in-memory traversal state, replayable from versions

pub mod audit;
pub mod claim;
pub mod execution;

// Re-export commonly used types
pub use audit::{AttemptOutcome, AuditLogEntry};
pub use claim::{ClaimVersion, Stage, VersionStatus};
pub use execution::{BranchResults, Phase, WorkflowExecution};
