//! Intake watcher CLI command.
//!
//! `claimflow watch` drives the workflow engine from a drop directory:
//! every stable new document becomes a claim submission.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use crate::config;
use crate::core::{ClaimStore, WorkflowEngine};
use crate::watch::{ClaimDocumentEvent, IntakeWatcher, WatcherConfig};

use super::claims::build_engine;

/// Watch a drop directory and submit each new claim document
pub async fn execute_watch(dir: Option<PathBuf>, once: bool) -> Result<()> {
    let cfg = config::config()?;

    let watch_path = dir.unwrap_or_else(|| cfg.intake.clone());
    tokio::fs::create_dir_all(&watch_path).await?;

    let engine = build_engine().await?;
    let store = Arc::new(ClaimStore::open(cfg.claims_dir()).await?);
    let watcher = IntakeWatcher::new(WatcherConfig::new(&watch_path), store);

    if once {
        // Just scan once and exit
        println!("📂 Scanning once: {}", watch_path.display());

        let result = watcher.scan_once().await?;

        if result.events.is_empty() {
            println!("ℹ️  No new claim documents");
            return Ok(());
        }

        let mut handles = Vec::new();
        for event in result.events {
            let reference = document_reference(&event);
            handles.push(engine.start(event.claim_id, reference));
        }

        for handle in handles {
            let claim_id = handle.claim_id().to_string();
            match handle.join().await {
                Ok(exec) if exec.succeeded() => {
                    println!("✅ {} completed (version {})", claim_id, exec.latest_version)
                }
                Ok(exec) => {
                    println!("❌ {} failed (version {})", claim_id, exec.latest_version)
                }
                Err(e) => println!("❌ {} error: {}", claim_id, e),
            }
        }

        return Ok(());
    }

    // Continuous watch mode
    println!("👁️  Watching: {}", watch_path.display());
    println!("    Press Ctrl+C to stop");
    println!();

    // Initial scan
    let initial = watcher.scan_once().await?;
    if !initial.events.is_empty() {
        println!(
            "📥 Initial scan: {} new document(s) submitted",
            initial.events.len()
        );
    }
    for event in initial.events {
        submit_document(&engine, event);
    }

    // Start watching
    let (mut event_rx, handle) = watcher.watch().await?;

    // Set up Ctrl+C handler
    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        let _ = stop_tx.send(());
    });

    // Event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                println!(
                    "📥 New claim document: {} ({})",
                    event.path.file_name().unwrap_or_default().to_string_lossy(),
                    event.claim_id
                );
                submit_document(&engine, event);
            }
            _ = &mut stop_rx => {
                println!();
                println!("🛑 Stopping watcher...");
                handle.stop().await?;
                break;
            }
        }
    }

    Ok(())
}

/// Fire-and-forget submission; the outcome lands in the claim's history
/// and is logged when the workflow finishes
fn submit_document(engine: &WorkflowEngine, event: ClaimDocumentEvent) {
    let reference = document_reference(&event);
    let handle = engine.start(event.claim_id, reference);

    tokio::spawn(async move {
        match handle.join().await {
            Ok(exec) if exec.succeeded() => {
                tracing::info!(claim_id = %exec.claim_id, version = exec.latest_version, "Claim completed");
            }
            Ok(exec) => {
                tracing::warn!(claim_id = %exec.claim_id, version = exec.latest_version, "Claim failed");
            }
            Err(e) => {
                tracing::error!("Claim processing error: {:#}", e);
            }
        }
    });
}

fn document_reference(event: &ClaimDocumentEvent) -> Value {
    json!({
        "document_text": event.document_text,
        "source_path": event.path.display().to_string(),
    })
}
