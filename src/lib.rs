//! claimflow - Versioned claim processing orchestrator
//!
//! A workflow engine for insurance claim processing built around
//! append-only versioning:
//! - Every stage transition is recorded as an immutable ClaimVersion
//! - Current state is derived by replaying a claim's version history
//! - Interrupted claims resume from the last committed version
//! - Every stage invocation attempt lands in a per-claim audit trail
//!
//! # Modules
//!
//! - `core`: Orchestration logic (ClaimStore, AuditLog, retry, engine)
//! - `domain`: Data structures (ClaimVersion, AuditLogEntry, WorkflowExecution)
//! - `stages`: Stage services (local implementations and the HTTP client)
//! - `watch`: Intake drop-directory watcher
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Submit a claim document
//! claimflow submit --input claim.txt
//!
//! # Check claim status
//! claimflow status <claim-id>
//!
//! # Resume an interrupted claim
//! claimflow resume <claim-id>
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod stages;
pub mod watch;

// Re-export main types at crate root for convenience
pub use crate::core::{
    AuditLog, ClaimStore, ExecutionHandle, RetryPolicy, StoreError, TerminalFailure,
    WorkflowConfig, WorkflowEngine,
};
pub use domain::{
    AttemptOutcome, AuditLogEntry, ClaimVersion, Stage, VersionStatus, WorkflowExecution,
};
pub use stages::{StageFailure, StageRequest, StageService, StageSet};

// Intake watcher
pub use watch::{ClaimDocumentEvent, IntakeWatcher, WatcherConfig};
