//! Append-only audit trail with file-based persistence.
//!
//! Every stage attempt is stored as one newline-delimited JSON entry under
//! the claim's directory. The trail is written before workflow control
//! proceeds and is read back for inspection only.

use std::path::PathBuf;

use anyhow::{Context, Result};
use fs2::FileExt;
use std::io::Write;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::domain::AuditLogEntry;

const AUDIT_FILE: &str = "audit.jsonl";

/// File-based audit log using JSONL format, one file per claim
pub struct AuditLog {
    /// Directory containing one subdirectory per claim
    base_dir: PathBuf,
}

impl AuditLog {
    /// Create or open an audit log rooted at the claims directory
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();

        tokio::fs::create_dir_all(&base_dir)
            .await
            .with_context(|| format!("Failed to create audit directory: {}", base_dir.display()))?;

        Ok(Self { base_dir })
    }

    fn audit_path(&self, claim_id: &str) -> PathBuf {
        self.base_dir.join(claim_id).join(AUDIT_FILE)
    }

    /// Append one attempt entry to the claim's trail.
    ///
    /// Attempts for a claim's parallel branches arrive concurrently, so the
    /// write happens under an exclusive file lock to keep lines whole.
    pub async fn record(&self, entry: &AuditLogEntry) -> Result<()> {
        let path = self.audit_path(&entry.claim_id);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create claim directory: {}", parent.display())
            })?;
        }

        let json = serde_json::to_string(entry).context("Failed to serialize audit entry")?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open audit file: {}", path.display()))?;

        file.lock_exclusive()
            .with_context(|| format!("Failed to lock audit file: {}", path.display()))?;

        writeln!(file, "{}", json).context("Failed to write audit entry")?;
        file.flush().context("Failed to flush audit entry")?;

        // Lock is released when file is dropped
        Ok(())
    }

    /// Read a claim's trail in append order
    pub async fn query_by_claim(&self, claim_id: &str) -> Result<Vec<AuditLogEntry>> {
        let path = self.audit_path(claim_id);

        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open audit file: {}", path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut entries = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditLogEntry = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse audit entry: {}", line))?;
            entries.push(entry);
        }

        Ok(entries)
    }
}
