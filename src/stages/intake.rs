//! Document intake stage.
//!
//! Takes the raw claim document from the caller's reference, bounds its
//! size, and extracts claim entities by plain text scanning. No parsing
//! engine, just token and labeled-line heuristics.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{StageFailure, StageOutput, StageRequest, StageService};

/// Documents are truncated to this many characters before scanning
const MAX_DOCUMENT_CHARS: usize = 50_000;

/// Portion of the document carried forward for the damage scan
const EXCERPT_CHARS: usize = 2_000;

const POLICY_PREFIXES: [&str; 3] = ["AUTO-", "POL-", "POLICY-"];

/// Local intake stage: entity extraction from claim document text
pub struct DocumentIntake;

impl DocumentIntake {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DocumentIntake {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageService for DocumentIntake {
    fn name(&self) -> &str {
        "intake"
    }

    async fn execute(&self, request: &StageRequest) -> Result<StageOutput, StageFailure> {
        let reference = request
            .context("reference")
            .ok_or_else(|| StageFailure::validation("no claim reference in context"))?;

        let (text, source_path) = resolve_document(reference).await?;

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(StageFailure::validation("claim document is empty"));
        }

        let document: String = trimmed.chars().take(MAX_DOCUMENT_CHARS).collect();
        let excerpt: String = document.chars().take(EXCERPT_CHARS).collect();
        let entities = extract_entities(&document);

        let mut payload = json!({
            "entities": entities,
            "document_chars": document.chars().count(),
            "document_excerpt": excerpt,
        });
        if let Some(path) = source_path {
            payload["source_path"] = json!(path);
        }

        Ok(StageOutput::new(payload))
    }
}

/// Pull the document text out of the reference, reading from disk when
/// only a path was supplied
async fn resolve_document(reference: &Value) -> Result<(String, Option<String>), StageFailure> {
    if let Some(text) = reference.get("document_text").and_then(Value::as_str) {
        let source = reference
            .get("source_path")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok((text.to_string(), source));
    }

    if let Some(path) = reference.get("document_path").and_then(Value::as_str) {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            StageFailure::validation(format!("could not read document '{}': {}", path, e))
        })?;
        return Ok((text, Some(path.to_string())));
    }

    Err(StageFailure::validation(
        "reference carries neither document_text nor document_path",
    ))
}

/// Extract claim entities from document text.
///
/// All five keys are always present; unextracted entities are null.
fn extract_entities(text: &str) -> Value {
    json!({
        "policy_number": find_policy_number(text),
        "claimant_name": find_labeled(text, &["claimant", "claimant name", "name"]),
        "incident_date": find_incident_date(text),
        "incident_location": find_labeled(text, &["location", "incident location"]),
        "vehicle_info": find_labeled(text, &["vehicle", "vehicle info", "vehicle information"]),
    })
}

/// A token with a known policy prefix and a numeric suffix
/// (e.g. AUTO-001, POL-123456), or a `Policy:`-labeled line
fn find_policy_number(text: &str) -> Option<String> {
    for raw in text.split_whitespace() {
        let token = trim_token(raw);
        let upper = token.to_ascii_uppercase();

        for prefix in POLICY_PREFIXES {
            if let Some(rest) = upper.strip_prefix(prefix) {
                if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
                    return Some(upper);
                }
            }
        }
    }

    find_labeled(text, &["policy", "policy number"])
        .and_then(|value| value.split_whitespace().next().map(str::to_ascii_uppercase))
}

/// A date token shaped YYYY-MM-DD or M/D/YYYY
fn find_incident_date(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(trim_token)
        .find(|token| is_iso_date(token) || is_us_date(token))
        .map(str::to_string)
}

/// First `Label: value` line matching one of the given labels
/// (label match is case-insensitive)
fn find_labeled(text: &str, labels: &[&str]) -> Option<String> {
    text.lines().find_map(|line| {
        let (label, value) = line.split_once(':')?;
        let label = label.trim().to_ascii_lowercase();
        let value = value.trim();

        if !value.is_empty() && labels.iter().any(|l| label == *l) {
            Some(value.to_string())
        } else {
            None
        }
    })
}

fn trim_token(raw: &str) -> &str {
    raw.trim_matches(|c: char| !c.is_ascii_alphanumeric())
}

fn is_iso_date(token: &str) -> bool {
    let bytes = token.as_bytes();
    token.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && token
            .char_indices()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit())
}

fn is_us_date(token: &str) -> bool {
    let parts: Vec<&str> = token.split('/').collect();
    parts.len() == 3
        && (1..=2).contains(&parts[0].len())
        && (1..=2).contains(&parts[1].len())
        && parts[2].len() == 4
        && parts
            .iter()
            .all(|p| p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    const SAMPLE_DOCUMENT: &str = "\
AUTO INSURANCE CLAIM FORM

Claimant: Jane Driver
Policy: AUTO-001
Vehicle: 2019 Subaru Outback
Location: Main St and 5th Ave
Incident date: 2025-06-14

My car was rear-ended at a stop light. The rear bumper is dented
and the trunk no longer closes.";

    fn request_with_document(text: &str) -> StageRequest {
        let mut context = Map::new();
        context.insert(
            "reference".to_string(),
            json!({ "document_text": text }),
        );
        StageRequest::new("CLAIM-001", context)
    }

    #[tokio::test]
    async fn test_extracts_entities_from_sample_document() {
        let intake = DocumentIntake::new();
        let output = intake
            .execute(&request_with_document(SAMPLE_DOCUMENT))
            .await
            .unwrap();

        let entities = &output.payload["entities"];
        assert_eq!(entities["policy_number"], "AUTO-001");
        assert_eq!(entities["claimant_name"], "Jane Driver");
        assert_eq!(entities["incident_date"], "2025-06-14");
        assert_eq!(entities["incident_location"], "Main St and 5th Ave");
        assert_eq!(entities["vehicle_info"], "2019 Subaru Outback");
        assert!(output.payload["document_excerpt"]
            .as_str()
            .unwrap()
            .contains("rear-ended"));
    }

    #[tokio::test]
    async fn test_empty_document_is_a_validation_failure() {
        let intake = DocumentIntake::new();
        let err = intake
            .execute(&request_with_document("   \n  "))
            .await
            .unwrap_err();

        assert!(matches!(err, StageFailure::Validation { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_reference_is_a_validation_failure() {
        let intake = DocumentIntake::new();
        let request = StageRequest::new("CLAIM-001", Map::new());

        let err = intake.execute(&request).await.unwrap_err();
        assert!(matches!(err, StageFailure::Validation { .. }));
    }

    #[tokio::test]
    async fn test_reads_document_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("claim.txt");
        std::fs::write(&path, "Policy: pol-42\nDamage to hood on 3/7/2025").unwrap();

        let mut context = Map::new();
        context.insert(
            "reference".to_string(),
            json!({ "document_path": path.to_str().unwrap() }),
        );

        let intake = DocumentIntake::new();
        let output = intake
            .execute(&StageRequest::new("CLAIM-002", context))
            .await
            .unwrap();

        assert_eq!(output.payload["entities"]["policy_number"], "POL-42");
        assert_eq!(output.payload["entities"]["incident_date"], "3/7/2025");
        assert_eq!(
            output.payload["source_path"],
            json!(path.to_str().unwrap())
        );
    }

    #[test]
    fn test_policy_number_token_forms() {
        assert_eq!(
            find_policy_number("ref auto-003, filed late").as_deref(),
            Some("AUTO-003")
        );
        assert_eq!(
            find_policy_number("see POLICY-778 for details").as_deref(),
            Some("POLICY-778")
        );
        assert_eq!(find_policy_number("no policy here"), None);
        // Prefix without digits is not a policy number
        assert_eq!(find_policy_number("AUTO-PARTS store"), None);
    }

    #[test]
    fn test_date_token_forms() {
        assert_eq!(
            find_incident_date("crash on 2024-12-01.").as_deref(),
            Some("2024-12-01")
        );
        assert_eq!(
            find_incident_date("crash on 1/9/2024").as_deref(),
            Some("1/9/2024")
        );
        assert_eq!(find_incident_date("crash on 2024-13"), None);
    }

    #[tokio::test]
    async fn test_long_documents_are_truncated() {
        let long = "word ".repeat(20_000); // 100k chars
        let intake = DocumentIntake::new();
        let output = intake
            .execute(&request_with_document(&long))
            .await
            .unwrap();

        assert_eq!(output.payload["document_chars"], MAX_DOCUMENT_CHARS as u64);
    }
}
