//! Claim processing CLI commands.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};

use crate::config::{self, StageEndpoint, StageEndpoints};
use crate::core::{AuditLog, ClaimStore, WorkflowConfig, WorkflowEngine};
use crate::domain::{Stage, WorkflowExecution};
use crate::stages::{HttpStage, PolicyCatalog, StageService, StageSet};

/// Build the workflow engine from the resolved configuration
pub async fn build_engine() -> Result<WorkflowEngine> {
    let cfg = config::config()?;

    let store = Arc::new(ClaimStore::open(cfg.claims_dir()).await?);
    let audit = Arc::new(AuditLog::open(cfg.claims_dir()).await?);

    let catalog = match &cfg.policies {
        Some(path) => PolicyCatalog::load(path)
            .with_context(|| format!("Failed to load policy catalog: {}", path.display()))?,
        None => PolicyCatalog::default(),
    };

    let stages = build_stages(&cfg.stages, &cfg.workflow, catalog)?;

    Ok(WorkflowEngine::new(cfg.workflow, store, audit, stages))
}

/// Wire each stage to its configured endpoint, or to the built-in local
/// service when no endpoint is set
fn build_stages(
    endpoints: &StageEndpoints,
    workflow: &WorkflowConfig,
    catalog: PolicyCatalog,
) -> Result<StageSet> {
    let builtin = StageSet::builtin(catalog);

    Ok(StageSet::new(
        stage_service("intake", &endpoints.intake, workflow, builtin.intake)?,
        stage_service("policy", &endpoints.policy, workflow, builtin.policy)?,
        stage_service("damage", &endpoints.damage, workflow, builtin.damage)?,
        stage_service("valuation", &endpoints.valuation, workflow, builtin.valuation)?,
        stage_service("decision", &endpoints.decision, workflow, builtin.decision)?,
    ))
}

fn stage_service(
    name: &str,
    endpoint: &Option<StageEndpoint>,
    workflow: &WorkflowConfig,
    builtin: Arc<dyn StageService>,
) -> Result<Arc<dyn StageService>> {
    match endpoint {
        Some(ep) => {
            let mut stage = HttpStage::new(name, &ep.url, workflow.stage_timeout())?;
            if let Some(token) = &ep.bearer_token {
                stage = stage.with_bearer_token(token);
            }
            Ok(Arc::new(stage))
        }
        None => Ok(builtin),
    }
}

async fn open_store() -> Result<ClaimStore> {
    let cfg = config::config()?;
    Ok(ClaimStore::open(cfg.claims_dir()).await?)
}

async fn open_audit() -> Result<AuditLog> {
    let cfg = config::config()?;
    Ok(AuditLog::open(cfg.claims_dir()).await?)
}

/// Submit a claim document and run it to a terminal state
pub async fn submit(
    claim_id: Option<String>,
    input: Option<PathBuf>,
    use_stdin: bool,
) -> Result<()> {
    let (document_text, source_path) = read_document(input, use_stdin)?;

    if document_text.trim().is_empty() {
        anyhow::bail!("Claim document is empty");
    }

    let claim_id =
        claim_id.unwrap_or_else(|| format!("CLAIM-{}", Utc::now().format("%Y%m%d%H%M%S")));

    let mut reference = json!({ "document_text": document_text });
    if let Some(path) = &source_path {
        reference["source_path"] = json!(path.display().to_string());
    }

    let engine = build_engine().await?;

    eprintln!("📄 Submitting claim {}", claim_id);

    let exec = engine.run_claim(&claim_id, reference).await?;

    let store = open_store().await?;
    print_outcome(&exec, &store).await
}

/// Read the claim document from a file or stdin
fn read_document(
    input: Option<PathBuf>,
    use_stdin: bool,
) -> Result<(String, Option<PathBuf>)> {
    if let Some(path) = input {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        return Ok((text, Some(path)));
    }

    if use_stdin || !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        return Ok((buffer, None));
    }

    anyhow::bail!("No input provided. Use --input <file> or pipe to stdin")
}

/// Print the terminal outcome of a claim run
async fn print_outcome(exec: &WorkflowExecution, store: &ClaimStore) -> Result<()> {
    if exec.succeeded() {
        if let Some(decision) = exec.accumulated_context.get("decision") {
            println!("{}", serde_json::to_string_pretty(decision)?);
        }
        eprintln!(
            "\n[Claim {} completed successfully at version {}]",
            exec.claim_id, exec.latest_version
        );
        return Ok(());
    }

    if let Some(latest) = store.get_latest(&exec.claim_id).await? {
        let failed_stage = latest
            .payload
            .get("failed_stage")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let error = latest
            .payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        eprintln!(
            "\n[Claim {} failed at stage {}: {}]",
            exec.claim_id, failed_stage, error
        );
    } else {
        eprintln!("\n[Claim {} did not reach a terminal state]", exec.claim_id);
    }
    std::process::exit(1);
}

/// Show the status of a claim
pub async fn show_status(claim_id: &str) -> Result<()> {
    let engine = build_engine().await?;
    let exec = engine.claim_status(claim_id).await?;

    println!("Claim ID: {}", exec.claim_id);
    println!("Latest version: {}", exec.latest_version);
    println!(
        "Current stage: {}",
        exec.current_stage
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("State: {}", state_label(&exec));
    println!("Started: {}", exec.started_at);
    if let Some(completed) = exec.completed_at {
        println!("Completed: {}", completed);
    }

    println!("\nStage progress:");
    for stage in [
        Stage::Intake,
        Stage::Policy,
        Stage::Assessment,
        Stage::TerminalSuccess,
        Stage::TerminalFailure,
    ] {
        if let Some(status) = exec.stage_statuses.get(&stage) {
            println!("  {}: {:?}", stage, status);
        }
    }

    Ok(())
}

fn state_label(exec: &WorkflowExecution) -> &'static str {
    if exec.succeeded() {
        "completed"
    } else if exec.is_finished() {
        "failed"
    } else {
        "in progress"
    }
}

/// Show a claim's version history
pub async fn show_history(claim_id: &str) -> Result<()> {
    let store = open_store().await?;
    let history = store.get_history(claim_id).await?;

    if history.is_empty() {
        anyhow::bail!("Claim {} not found", claim_id);
    }

    println!(
        "{:<9} {:<18} {:<11} {:<20}",
        "VERSION", "STAGE", "STATUS", "CREATED"
    );
    println!("{}", "-".repeat(62));

    for version in &history {
        println!(
            "{:<9} {:<18} {:<11} {:<20}",
            version.version,
            version.stage.to_string(),
            format!("{:?}", version.status),
            version.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

/// Show a claim's audit trail
pub async fn show_audit(claim_id: &str) -> Result<()> {
    let audit = open_audit().await?;
    let entries = audit.query_by_claim(claim_id).await?;

    if entries.is_empty() {
        println!("No audit entries for claim {}", claim_id);
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:<8} {:<17} {:>9}  ERROR",
        "TIME", "STAGE", "ATTEMPT", "OUTCOME", "DURATION"
    );
    println!("{}", "-".repeat(92));

    for entry in &entries {
        println!(
            "{:<20} {:<12} {:<8} {:<17} {:>7}ms  {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.stage.to_string(),
            entry.attempt_number,
            format!("{:?}", entry.outcome),
            entry.duration_ms,
            entry.error_detail.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

/// List recent claims
pub async fn list_claims(limit: usize) -> Result<()> {
    let engine = build_engine().await?;
    let executions = engine.list_claims(limit).await?;

    if executions.is_empty() {
        println!("No claims found");
        return Ok(());
    }

    println!(
        "{:<24} {:<18} {:<12} {:<20}",
        "CLAIM ID", "STAGE", "STATE", "STARTED"
    );
    println!("{}", "-".repeat(78));

    for exec in &executions {
        println!(
            "{:<24} {:<18} {:<12} {:<20}",
            exec.claim_id,
            exec.current_stage
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            state_label(exec),
            exec.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

/// Resume an interrupted claim from its durable history
pub async fn resume(claim_id: &str, input: Option<PathBuf>) -> Result<()> {
    let engine = build_engine().await?;

    let existing = engine.claim_status(claim_id).await?;
    if existing.is_finished() {
        println!(
            "Claim {} already reached a terminal state (version {})",
            claim_id, existing.latest_version
        );
        return Ok(());
    }

    // Completed stages replay from the version log, so the document is
    // only needed when intake never committed
    let reference = match input {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read input file: {}", path.display()))?;
            json!({
                "document_text": text,
                "source_path": path.display().to_string(),
            })
        }
        None => Value::Null,
    };

    eprintln!(
        "🔄 Resuming claim {} from version {}",
        claim_id, existing.latest_version
    );

    let exec = engine.run_claim(claim_id, reference).await?;

    let store = open_store().await?;
    print_outcome(&exec, &store).await
}

/// Print a completed claim's decision report
pub async fn show_report(claim_id: &str) -> Result<()> {
    let store = open_store().await?;
    let report = store
        .load_report(claim_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("No report for claim {} (not completed yet?)", claim_id))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Show the resolved configuration (for debugging)
pub async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("  Claimflow Configuration");
    println!("╚═══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Claims:              {}", cfg.claims_dir().display());
    println!("  Intake drop:         {}", cfg.intake.display());
    println!(
        "  Policy catalog:      {}",
        cfg.policies
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(built-in seed catalog)".to_string())
    );
    println!();
    println!("Workflow:");
    println!("  Stage timeout:  {}s", cfg.workflow.stage_timeout_seconds);
    println!("  Claim timeout:  {}s", cfg.workflow.claim_timeout_seconds);
    println!("  Max payload:    {} bytes", cfg.workflow.max_payload_bytes);
    println!(
        "  Retry:          {} attempts, {}ms initial, {}ms max, x{} backoff",
        cfg.workflow.retry.max_attempts,
        cfg.workflow.retry.initial_delay_ms,
        cfg.workflow.retry.max_delay_ms,
        cfg.workflow.retry.backoff_multiplier
    );
    println!();
    println!("Stage endpoints:");
    let endpoints = [
        ("intake", &cfg.stages.intake),
        ("policy", &cfg.stages.policy),
        ("damage", &cfg.stages.damage),
        ("valuation", &cfg.stages.valuation),
        ("decision", &cfg.stages.decision),
    ];
    if endpoints.iter().all(|(_, e)| e.is_none()) {
        println!("  (all stages run the built-in local services)");
    } else {
        for (name, endpoint) in endpoints {
            match endpoint {
                Some(ep) => println!("  {:<10} {}", name, ep.url),
                None => println!("  {:<10} (built-in)", name),
            }
        }
    }

    Ok(())
}
