//! Cancellation Integration Tests
//!
//! The claim time budget stops further stages from being scheduled; an
//! attempt already in flight always runs to its own deadline.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use claimflow::core::{AuditLog, ClaimStore, RetryPolicy, WorkflowConfig, WorkflowEngine};
use claimflow::domain::{Stage, VersionStatus};
use claimflow::stages::{StageFailure, StageOutput, StageRequest, StageService, StageSet};

/// Succeeds after an optional artificial delay, counting invocations
struct TimedStage {
    name: &'static str,
    delay: Duration,
    payload: Value,
    calls: AtomicU32,
}

impl TimedStage {
    fn instant(name: &'static str, payload: Value) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay: Duration::ZERO,
            payload,
            calls: AtomicU32::new(0),
        })
    }

    fn slow(name: &'static str, delay: Duration, payload: Value) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay,
            payload,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageService for TimedStage {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _request: &StageRequest) -> Result<StageOutput, StageFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(StageOutput::new(self.payload.clone()))
    }
}

fn config_with_budget(claim_timeout_seconds: u64) -> WorkflowConfig {
    WorkflowConfig {
        retry: RetryPolicy {
            max_attempts: 1,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
        },
        stage_timeout_seconds: 10,
        claim_timeout_seconds,
        max_payload_bytes: 1024 * 1024,
    }
}

struct Fixture {
    engine: WorkflowEngine,
    store: Arc<ClaimStore>,
    audit: Arc<AuditLog>,
    intake: Arc<TimedStage>,
    policy: Arc<TimedStage>,
    _temp: TempDir,
}

async fn fixture(claim_timeout_seconds: u64, intake: Arc<TimedStage>) -> Fixture {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ClaimStore::open(temp.path()).await.unwrap());
    let audit = Arc::new(AuditLog::open(temp.path()).await.unwrap());

    let policy = TimedStage::instant("policy", json!({"found": true}));
    let stages = StageSet::new(
        intake.clone(),
        policy.clone(),
        TimedStage::instant("damage", json!({"damage_detected": true})),
        TimedStage::instant("valuation", json!({"vehicle_value": 12000.0})),
        TimedStage::instant("decision", json!({"decision": "APPROVED"})),
    );

    let engine = WorkflowEngine::new(
        config_with_budget(claim_timeout_seconds),
        store.clone(),
        audit.clone(),
        stages,
    );

    Fixture {
        engine,
        store,
        audit,
        intake,
        policy,
        _temp: temp,
    }
}

#[tokio::test]
async fn test_zero_budget_cancels_before_intake() {
    let intake = TimedStage::instant("intake", json!({"entities": {}}));
    let fx = fixture(0, intake).await;

    let exec = fx
        .engine
        .run_claim("CLAIM-X1", json!({"document_text": "stub"}))
        .await
        .unwrap();

    assert!(exec.is_finished());
    assert!(!exec.succeeded());
    assert_eq!(fx.intake.calls(), 0);

    let history = fx.store.get_history("CLAIM-X1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].stage, Stage::TerminalFailure);
    assert_eq!(history[0].status, VersionStatus::Failed);
    assert_eq!(history[0].payload["kind"], "cancelled");
    assert_eq!(history[0].payload["failed_stage"], "intake");
    assert!(history[0].payload["error"]
        .as_str()
        .unwrap()
        .contains("budget"));

    // Nothing reached the invoker, so the audit trail is empty
    assert!(fx.audit.query_by_claim("CLAIM-X1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_inflight_stage_finishes_before_cancellation() {
    // Intake outlives the one second budget; it still commits, and only
    // the next stage is refused
    let intake = TimedStage::slow(
        "intake",
        Duration::from_millis(1200),
        json!({"entities": {}}),
    );
    let fx = fixture(1, intake).await;

    let exec = fx
        .engine
        .run_claim("CLAIM-X2", json!({"document_text": "stub"}))
        .await
        .unwrap();

    assert!(!exec.succeeded());
    assert_eq!(fx.intake.calls(), 1);
    assert_eq!(fx.policy.calls(), 0);

    let history = fx.store.get_history("CLAIM-X2").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].stage, Stage::Intake);
    assert_eq!(history[0].status, VersionStatus::Completed);
    assert_eq!(history[1].stage, Stage::TerminalFailure);
    assert_eq!(history[1].payload["kind"], "cancelled");
    assert_eq!(history[1].payload["failed_stage"], "policy");

    // Exactly one attempt ran: the successful intake
    let entries = fx.audit.query_by_claim("CLAIM-X2").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].stage, Stage::Intake);
}

#[tokio::test]
async fn test_terminal_claims_are_not_cancelled_again() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ClaimStore::open(temp.path()).await.unwrap());
    let audit = Arc::new(AuditLog::open(temp.path()).await.unwrap());

    let stages = StageSet::new(
        TimedStage::instant("intake", json!({"entities": {}})),
        TimedStage::instant("policy", json!({"found": true})),
        TimedStage::instant("damage", json!({"damage_detected": false})),
        TimedStage::instant("valuation", json!({"vehicle_value": 9000.0})),
        TimedStage::instant("decision", json!({"decision": "DENIED"})),
    );

    let generous = WorkflowEngine::new(
        config_with_budget(60),
        store.clone(),
        audit.clone(),
        stages.clone(),
    );
    let exec = generous
        .run_claim("CLAIM-X3", json!({"document_text": "stub"}))
        .await
        .unwrap();
    assert!(exec.succeeded());

    let before = store.get_history("CLAIM-X3").await.unwrap();

    // A second engine with no budget at all leaves the claim untouched
    let strict = WorkflowEngine::new(config_with_budget(0), store.clone(), audit, stages);
    let exec = strict.run_claim("CLAIM-X3", Value::Null).await.unwrap();

    assert!(exec.succeeded());
    let after = store.get_history("CLAIM-X3").await.unwrap();
    assert_eq!(after.len(), before.len());
    assert_eq!(after.last().unwrap().stage, Stage::TerminalSuccess);
}

#[tokio::test]
async fn test_budget_applies_per_run_not_per_claim() {
    let intake = TimedStage::instant("intake", json!({"entities": {}}));
    let fx = fixture(0, intake).await;

    // A previous run committed intake before stopping; the resumed run
    // gets its own budget and is cancelled before its first stage
    fx.store
        .append_version(
            "CLAIM-X4",
            0,
            Stage::Intake,
            json!({"entities": {}}),
            VersionStatus::Completed,
        )
        .await
        .unwrap();

    let exec = fx.engine.run_claim("CLAIM-X4", Value::Null).await.unwrap();

    assert!(!exec.succeeded());
    assert_eq!(fx.intake.calls(), 0);
    assert_eq!(fx.policy.calls(), 0);

    let history = fx.store.get_history("CLAIM-X4").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].payload["kind"], "cancelled");
    assert_eq!(history[1].payload["failed_stage"], "policy");
}
