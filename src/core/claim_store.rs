//! Append-only claim version store with file-based persistence.
//!
//! Each claim's history lives in a versions.jsonl file (one ClaimVersion
//! per line). Appends are optimistic: callers state the version they
//! believe is current, and the store rejects the write if another writer
//! advanced the claim first.

use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::domain::{ClaimVersion, Stage, VersionStatus};

const VERSIONS_FILE: &str = "versions.jsonl";
const REPORT_FILE: &str = "report.json";

/// Errors surfaced by the claim store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer appended since the caller last read the claim
    #[error(
        "version conflict for claim '{claim_id}': expected base {expected}, found {actual}"
    )]
    VersionConflict {
        claim_id: String,
        expected: u64,
        actual: u64,
    },

    /// Claim id is empty or would escape the claims directory
    #[error("invalid claim id: '{0}'")]
    InvalidClaimId(String),

    /// A version log line could not be parsed
    #[error("corrupt version log: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Reject ids that are empty or contain path separators / traversal
pub fn validate_claim_id(claim_id: &str) -> Result<(), StoreError> {
    if claim_id.trim().is_empty()
        || claim_id.contains('/')
        || claim_id.contains('\\')
        || claim_id.contains("..")
    {
        return Err(StoreError::InvalidClaimId(claim_id.to_string()));
    }
    Ok(())
}

/// File-based claim store using JSONL format, one directory per claim
pub struct ClaimStore {
    /// Directory containing one subdirectory per claim
    base_dir: PathBuf,
}

impl ClaimStore {
    /// Create or open a store rooted at the claims directory
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    /// Directory holding a claim's version log, audit trail, and report
    pub fn claim_dir(&self, claim_id: &str) -> PathBuf {
        self.base_dir.join(claim_id)
    }

    fn versions_path(&self, claim_id: &str) -> PathBuf {
        self.claim_dir(claim_id).join(VERSIONS_FILE)
    }

    /// Append the next version of a claim.
    ///
    /// `expected_base` is the version the caller believes is current
    /// (0 for a claim with no versions yet). The read-check-append runs
    /// under an exclusive file lock; if the observed latest version
    /// differs from `expected_base` the call writes nothing and fails
    /// with `VersionConflict`. On success the new version is exactly
    /// `expected_base + 1`.
    pub async fn append_version(
        &self,
        claim_id: &str,
        expected_base: u64,
        stage: Stage,
        payload: serde_json::Value,
        status: VersionStatus,
    ) -> Result<ClaimVersion, StoreError> {
        validate_claim_id(claim_id)?;

        let dir = self.claim_dir(claim_id);
        tokio::fs::create_dir_all(&dir).await?;

        locked_append(
            &dir.join(VERSIONS_FILE),
            claim_id,
            expected_base,
            stage,
            payload,
            status,
        )
    }

    /// Highest version of a claim, or None for an unknown claim
    pub async fn get_latest(&self, claim_id: &str) -> Result<Option<ClaimVersion>, StoreError> {
        let mut history = self.get_history(claim_id).await?;
        Ok(history.pop())
    }

    /// Full history of a claim, ascending by version starting at 1.
    ///
    /// Each call re-reads the log, so the result reflects the durable
    /// state at read time.
    pub async fn get_history(&self, claim_id: &str) -> Result<Vec<ClaimVersion>, StoreError> {
        validate_claim_id(claim_id)?;

        let path = self.versions_path(claim_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut versions = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let version: ClaimVersion = serde_json::from_str(&line)
                .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?;
            versions.push(version);
        }

        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    /// Ids of all claims present in the store, sorted
    pub async fn list_claims(&self) -> Result<Vec<String>, StoreError> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut claims = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    claims.push(name.to_string());
                }
            }
        }

        claims.sort();
        Ok(claims)
    }

    /// Write the final decision report for a claim
    pub async fn write_report(
        &self,
        claim_id: &str,
        report: &serde_json::Value,
    ) -> Result<PathBuf, StoreError> {
        validate_claim_id(claim_id)?;

        let dir = self.claim_dir(claim_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(REPORT_FILE);
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&path, json).await?;

        Ok(path)
    }

    /// Load a claim's decision report, if one was written
    pub async fn load_report(&self, claim_id: &str) -> Result<Option<serde_json::Value>, StoreError> {
        validate_claim_id(claim_id)?;

        let path = self.claim_dir(claim_id).join(REPORT_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

/// Read-check-append under an exclusive lock. Synchronous on purpose:
/// the critical section must not yield between the read and the write.
fn locked_append(
    path: &Path,
    claim_id: &str,
    expected_base: u64,
    stage: Stage,
    payload: serde_json::Value,
    status: VersionStatus,
) -> Result<ClaimVersion, StoreError> {
    use std::io::{BufRead, Write};

    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;

    file.lock_exclusive()?;

    let mut actual = 0u64;
    for line in std::io::BufReader::new(&file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let version: ClaimVersion = serde_json::from_str(&line)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?;
        actual = actual.max(version.version);
    }

    if actual != expected_base {
        return Err(StoreError::VersionConflict {
            claim_id: claim_id.to_string(),
            expected: expected_base,
            actual,
        });
    }

    let version = ClaimVersion::new(claim_id, actual + 1, stage, status, payload);
    let json = serde_json::to_string(&version)?;
    writeln!(file, "{}", json)?;
    file.flush()?;

    // Lock is released when file is dropped
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_test_store() -> (ClaimStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = ClaimStore::open(temp_dir.path()).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_first_append_starts_at_version_one() {
        let (store, _temp) = create_test_store().await;

        let version = store
            .append_version(
                "CLAIM-001",
                0,
                Stage::Intake,
                json!({"entities": {}}),
                VersionStatus::Completed,
            )
            .await
            .unwrap();

        assert_eq!(version.version, 1);
        assert_eq!(version.stage, Stage::Intake);

        let latest = store.get_latest("CLAIM-001").await.unwrap().unwrap();
        assert_eq!(latest.version, 1);
    }

    #[tokio::test]
    async fn test_stale_base_is_rejected_and_writes_nothing() {
        let (store, _temp) = create_test_store().await;

        store
            .append_version("CLAIM-001", 0, Stage::Intake, json!({}), VersionStatus::Completed)
            .await
            .unwrap();

        let err = store
            .append_version("CLAIM-001", 0, Stage::Policy, json!({}), VersionStatus::Completed)
            .await
            .unwrap_err();

        match err {
            StoreError::VersionConflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("expected VersionConflict, got {:?}", other),
        }

        // The losing write must not have appended anything
        let history = store.get_history("CLAIM-001").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_dense_and_ascending() {
        let (store, _temp) = create_test_store().await;

        let stages = [Stage::Intake, Stage::Policy, Stage::Assessment];
        for (i, stage) in stages.iter().enumerate() {
            store
                .append_version(
                    "CLAIM-001",
                    i as u64,
                    *stage,
                    json!({"step": i}),
                    VersionStatus::Completed,
                )
                .await
                .unwrap();
        }

        let history = store.get_history("CLAIM-001").await.unwrap();
        assert_eq!(history.len(), 3);

        for (i, version) in history.iter().enumerate() {
            assert_eq!(version.version, (i + 1) as u64);
        }
        assert_eq!(history[2].stage, Stage::Assessment);
    }

    #[tokio::test]
    async fn test_concurrent_appends_one_wins() {
        let (store, _temp) = create_test_store().await;

        store
            .append_version("CLAIM-001", 0, Stage::Intake, json!({}), VersionStatus::Completed)
            .await
            .unwrap();

        // Two writers race from the same observed base
        let (a, b) = tokio::join!(
            store.append_version(
                "CLAIM-001",
                1,
                Stage::Policy,
                json!({"writer": "a"}),
                VersionStatus::Completed,
            ),
            store.append_version(
                "CLAIM-001",
                1,
                Stage::Policy,
                json!({"writer": "b"}),
                VersionStatus::Completed,
            ),
        );

        let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(winners, 1);

        let history = store.get_history("CLAIM-001").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].version, 2);
    }

    #[tokio::test]
    async fn test_invalid_claim_ids_rejected() {
        let (store, _temp) = create_test_store().await;

        for bad in ["", "  ", "a/b", "a\\b", "../escape"] {
            let err = store
                .append_version(bad, 0, Stage::Intake, json!({}), VersionStatus::Completed)
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidClaimId(_)), "id: {:?}", bad);
        }
    }

    #[tokio::test]
    async fn test_unknown_claim_has_no_history() {
        let (store, _temp) = create_test_store().await;

        assert!(store.get_latest("CLAIM-NONE").await.unwrap().is_none());
        assert!(store.get_history("CLAIM-NONE").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_claims_sorted() {
        let (store, _temp) = create_test_store().await;

        for id in ["CLAIM-B", "CLAIM-A", "CLAIM-C"] {
            store
                .append_version(id, 0, Stage::Intake, json!({}), VersionStatus::Completed)
                .await
                .unwrap();
        }

        let claims = store.list_claims().await.unwrap();
        assert_eq!(claims, vec!["CLAIM-A", "CLAIM-B", "CLAIM-C"]);
    }

    #[tokio::test]
    async fn test_report_roundtrip() {
        let (store, _temp) = create_test_store().await;

        assert!(store.load_report("CLAIM-001").await.unwrap().is_none());

        let report = json!({"decision": "APPROVED", "estimated_payout": 2000.0});
        store.write_report("CLAIM-001", &report).await.unwrap();

        let loaded = store.load_report("CLAIM-001").await.unwrap().unwrap();
        assert_eq!(loaded, report);
    }
}
