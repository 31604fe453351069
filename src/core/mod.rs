//! Core orchestration logic.
//!
//! This module contains:
//! - ClaimStore: Append-only, optimistically versioned claim history
//! - AuditLog: Per-claim attempt trail
//! - Retry: Retry policy and the retrying stage runner
//! - Engine: Main workflow engine

pub mod audit_log;
pub mod claim_store;
pub mod engine;
pub mod retry;

// Re-export commonly used types
pub use audit_log::AuditLog;
pub use claim_store::{validate_claim_id, ClaimStore, StoreError};
pub use engine::{ExecutionHandle, WorkflowConfig, WorkflowEngine};
pub use retry::{RetryPolicy, StageRunner, TerminalFailure};
