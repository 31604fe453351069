//! Policy lookup stage.
//!
//! Resolves the policy number extracted at intake against a local
//! catalog. An unknown policy is a successful lookup with `found: false`;
//! the decision stage turns that into a denial.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{StageFailure, StageOutput, StageRequest, StageService};

/// Policy number assumed when intake could not extract one
const DEFAULT_POLICY: &str = "AUTO-001";

/// One auto policy's terms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub policy_id: String,
    pub coverage_type: String,
    pub deductible: f64,
    pub coverage_limit: f64,
    pub filing_deadline_days: u32,
    #[serde(default)]
    pub description: String,
}

/// In-memory policy lookup table, keyed by upper-cased policy id
#[derive(Debug, Clone)]
pub struct PolicyCatalog {
    policies: HashMap<String, PolicyRecord>,
}

impl PolicyCatalog {
    /// Build a catalog from a list of records
    pub fn from_records(records: Vec<PolicyRecord>) -> Self {
        let policies = records
            .into_iter()
            .map(|record| (record.policy_id.to_ascii_uppercase(), record))
            .collect();
        Self { policies }
    }

    /// Load a catalog from a YAML file (a list of policy records)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy catalog: {}", path.display()))?;

        let records: Vec<PolicyRecord> = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse policy catalog: {}", path.display()))?;

        Ok(Self::from_records(records))
    }

    /// Look up a policy by id, case-insensitively
    pub fn get(&self, policy_id: &str) -> Option<&PolicyRecord> {
        self.policies.get(&policy_id.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for PolicyCatalog {
    /// The bootstrap catalog: three auto policies
    fn default() -> Self {
        Self::from_records(vec![
            PolicyRecord {
                policy_id: "AUTO-001".to_string(),
                coverage_type: "Comprehensive + Collision".to_string(),
                deductible: 500.0,
                coverage_limit: 50_000.0,
                filing_deadline_days: 30,
                description: "Covers collision and non-collision damage to the insured vehicle"
                    .to_string(),
            },
            PolicyRecord {
                policy_id: "AUTO-002".to_string(),
                coverage_type: "Liability Only".to_string(),
                deductible: 0.0,
                coverage_limit: 25_000.0,
                filing_deadline_days: 60,
                description: "Covers damage caused to others; the insured vehicle is not covered"
                    .to_string(),
            },
            PolicyRecord {
                policy_id: "AUTO-003".to_string(),
                coverage_type: "Full Coverage".to_string(),
                deductible: 250.0,
                coverage_limit: 100_000.0,
                filing_deadline_days: 90,
                description: "Premium protection including uninsured motorist coverage"
                    .to_string(),
            },
        ])
    }
}

/// Local policy stage backed by a PolicyCatalog
pub struct PolicyLookup {
    catalog: PolicyCatalog,
}

impl PolicyLookup {
    pub fn new(catalog: PolicyCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl StageService for PolicyLookup {
    fn name(&self) -> &str {
        "policy"
    }

    async fn execute(&self, request: &StageRequest) -> Result<StageOutput, StageFailure> {
        let policy_number = request
            .context("intake")
            .and_then(|intake| intake.pointer("/entities/policy_number"))
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_POLICY)
            .to_string();

        let payload = match self.catalog.get(&policy_number) {
            Some(record) => json!({
                "found": true,
                "policy_id": record.policy_id,
                "coverage_type": record.coverage_type,
                "deductible": record.deductible,
                "coverage_limit": record.coverage_limit,
                "filing_deadline_days": record.filing_deadline_days,
                "description": record.description,
            }),
            None => json!({
                "found": false,
                "policy_id": policy_number,
            }),
        };

        Ok(StageOutput::new(payload))
    }
}
