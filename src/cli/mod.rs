//! Command-line interface for claimflow.
//!
//! Provides commands for submitting claims, inspecting status, version
//! history and the audit trail, resuming interrupted claims, and watching
//! an intake drop directory.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod claims;
pub mod watch;

/// claimflow - Versioned claim processing orchestrator
#[derive(Parser, Debug)]
#[command(name = "claimflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a claim document and process it to a terminal state
    Submit {
        /// Claim ID (derived from the submission time if not provided)
        #[arg(long)]
        claim_id: Option<String>,

        /// Claim document file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Read the document from stdin
        #[arg(long)]
        stdin: bool,
    },

    /// Check the status of a claim
    Status {
        /// Claim ID
        claim_id: String,
    },

    /// Show a claim's version history
    History {
        /// Claim ID
        claim_id: String,
    },

    /// Show a claim's audit trail (one row per stage attempt)
    Audit {
        /// Claim ID
        claim_id: String,
    },

    /// List recent claims
    Claims {
        /// Maximum number of claims to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Resume an interrupted claim from its durable history
    Resume {
        /// Claim ID to resume
        claim_id: String,

        /// Claim document file (only needed if intake never completed)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print a completed claim's decision report
    Report {
        /// Claim ID
        claim_id: String,
    },

    /// Watch a drop directory and submit new claim documents
    Watch {
        /// Directory to watch (defaults to the configured intake directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Scan once and exit instead of watching continuously
        #[arg(long)]
        once: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit {
                claim_id,
                input,
                stdin,
            } => claims::submit(claim_id, input, stdin).await,
            Commands::Status { claim_id } => claims::show_status(&claim_id).await,
            Commands::History { claim_id } => claims::show_history(&claim_id).await,
            Commands::Audit { claim_id } => claims::show_audit(&claim_id).await,
            Commands::Claims { limit } => claims::list_claims(limit).await,
            Commands::Resume { claim_id, input } => claims::resume(&claim_id, input).await,
            Commands::Report { claim_id } => claims::show_report(&claim_id).await,
            Commands::Watch { dir, once } => watch::execute_watch(dir, once).await,
            Commands::Config => claims::show_config().await,
        }
    }
}
