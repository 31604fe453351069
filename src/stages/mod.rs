//! Stage service contract and invocation.
//!
//! Every processing stage, local or remote, sits behind the same
//! request/response contract: one claim id plus the accumulated context
//! in, one structured payload or a classified failure out. The invoker
//! performs exactly one timeout-bounded attempt per call; retry is the
//! stage runner's concern.

pub mod damage;
pub mod decision;
pub mod http;
pub mod intake;
pub mod policy;
pub mod valuation;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use damage::DamageAssessor;
pub use decision::DecisionMaker;
pub use http::HttpStage;
pub use intake::DocumentIntake;
pub use policy::{PolicyCatalog, PolicyLookup, PolicyRecord};
pub use valuation::VehicleValuation;

/// Input to a stage invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRequest {
    /// The claim being processed
    pub claim_id: String,

    /// Union of all completed stage payloads, keyed by stage name, plus
    /// the caller's initial reference under "reference"
    pub accumulated_context: Map<String, Value>,
}

impl StageRequest {
    pub fn new(claim_id: impl Into<String>, accumulated_context: Map<String, Value>) -> Self {
        Self {
            claim_id: claim_id.into(),
            accumulated_context,
        }
    }

    /// Look up another stage's payload in the context
    pub fn context(&self, key: &str) -> Option<&Value> {
        self.accumulated_context.get(key)
    }
}

/// Successful result of a stage invocation
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Stage-specific structured payload, carried forward opaquely
    pub payload: Value,
}

impl StageOutput {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }
}

/// Classified failure of a single stage invocation.
///
/// `Timeout`, `Unavailable`, and `Throttled` are transient and eligible
/// for retry; everything else ends the workflow. A failure that cannot be
/// classified must map to a terminal variant so it can never loop.
#[derive(Debug, Clone, Error)]
pub enum StageFailure {
    #[error("timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("service unavailable: {message}")]
    Unavailable { message: String },

    #[error("throttled: {message}")]
    Throttled { message: String },

    #[error("invalid input: {message}")]
    Validation { message: String },

    #[error("rejected: {message}")]
    Rejected { message: String },

    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("payload too large: {actual} > {limit} bytes")]
    OversizedPayload { actual: u64, limit: u64 },
}

impl StageFailure {
    /// Whether the retry policy may attempt this stage again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StageFailure::Timeout { .. }
                | StageFailure::Unavailable { .. }
                | StageFailure::Throttled { .. }
        )
    }

    /// Stable identifier used in failure payloads and logs
    pub fn kind(&self) -> &'static str {
        match self {
            StageFailure::Timeout { .. } => "timeout",
            StageFailure::Unavailable { .. } => "unavailable",
            StageFailure::Throttled { .. } => "throttled",
            StageFailure::Validation { .. } => "validation",
            StageFailure::Rejected { .. } => "rejected",
            StageFailure::MalformedResponse { .. } => "malformed_response",
            StageFailure::OversizedPayload { .. } => "oversized_payload",
        }
    }

    /// Convenience constructors for the message-only variants
    pub fn unavailable(message: impl Into<String>) -> Self {
        StageFailure::Unavailable {
            message: message.into(),
        }
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        StageFailure::Throttled {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        StageFailure::Validation {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        StageFailure::Rejected {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        StageFailure::MalformedResponse {
            message: message.into(),
        }
    }
}

/// Trait for stage service implementations
#[async_trait]
pub trait StageService: Send + Sync {
    /// Human-readable service name
    fn name(&self) -> &str;

    /// Perform the stage's work for one claim. Implementations are
    /// stateless and idempotent; bounding the call is the invoker's job.
    async fn execute(&self, request: &StageRequest) -> Result<StageOutput, StageFailure>;
}

/// Performs exactly one timeout-bounded attempt against a stage service.
///
/// Stateless; retry and audit recording live in the stage runner.
#[derive(Debug, Clone, Copy)]
pub struct StageInvoker {
    timeout: Duration,
    max_payload_bytes: u64,
}

impl StageInvoker {
    pub fn new(timeout: Duration, max_payload_bytes: u64) -> Self {
        Self {
            timeout,
            max_payload_bytes,
        }
    }

    /// Invoke a stage service once. Expiry of the deadline yields
    /// `StageFailure::Timeout` instead of blocking; output larger than the
    /// payload cap is a terminal failure.
    pub async fn invoke(
        &self,
        service: &dyn StageService,
        request: &StageRequest,
    ) -> Result<StageOutput, StageFailure> {
        let output = match tokio::time::timeout(self.timeout, service.execute(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StageFailure::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        };

        let size = serialized_size(&output.payload);
        if size > self.max_payload_bytes {
            return Err(StageFailure::OversizedPayload {
                actual: size,
                limit: self.max_payload_bytes,
            });
        }

        Ok(output)
    }
}

fn serialized_size(payload: &Value) -> u64 {
    serde_json::to_vec(payload)
        .map(|bytes| bytes.len() as u64)
        .unwrap_or(0)
}

/// The five services the workflow engine drives, one per stage
#[derive(Clone)]
pub struct StageSet {
    pub intake: Arc<dyn StageService>,
    pub policy: Arc<dyn StageService>,
    pub damage: Arc<dyn StageService>,
    pub valuation: Arc<dyn StageService>,
    pub decision: Arc<dyn StageService>,
}

impl StageSet {
    pub fn new(
        intake: Arc<dyn StageService>,
        policy: Arc<dyn StageService>,
        damage: Arc<dyn StageService>,
        valuation: Arc<dyn StageService>,
        decision: Arc<dyn StageService>,
    ) -> Self {
        Self {
            intake,
            policy,
            damage,
            valuation,
            decision,
        }
    }

    /// Wire up the built-in local services with the given policy catalog
    pub fn builtin(catalog: PolicyCatalog) -> Self {
        Self::new(
            Arc::new(DocumentIntake::new()),
            Arc::new(PolicyLookup::new(catalog)),
            Arc::new(DamageAssessor::new()),
            Arc::new(VehicleValuation::new()),
            Arc::new(DecisionMaker::new()),
        )
    }
}
