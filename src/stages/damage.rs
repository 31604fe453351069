//! Damage assessment stage.
//!
//! Scans the intake excerpt for damage indicators and vehicle part
//! mentions. Severity and repair cost are flat estimates: a detected
//! claim is MODERATE at $2,500 until a real assessor replaces this
//! stage.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{StageFailure, StageOutput, StageRequest, StageService};

const DAMAGE_INDICATORS: [&str; 14] = [
    "damage",
    "damaged",
    "dent",
    "dented",
    "collision",
    "crash",
    "crashed",
    "accident",
    "broken",
    "shattered",
    "scratch",
    "scratched",
    "rear-ended",
    "impact",
];

/// (needle, canonical location name)
const PART_LOCATIONS: [(&str, &str); 10] = [
    ("front bumper", "Front bumper"),
    ("rear bumper", "Rear bumper"),
    ("hood", "Hood"),
    ("windshield", "Windshield"),
    ("door", "Door"),
    ("fender", "Fender"),
    ("trunk", "Trunk"),
    ("headlight", "Headlight"),
    ("taillight", "Taillight"),
    ("quarter panel", "Quarter panel"),
];

const REPAIR_COST_ESTIMATE: f64 = 2500.0;
const CONFIDENCE: f64 = 0.75;

/// Local damage stage: keyword scan over the intake excerpt
pub struct DamageAssessor;

impl DamageAssessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DamageAssessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageService for DamageAssessor {
    fn name(&self) -> &str {
        "damage"
    }

    async fn execute(&self, request: &StageRequest) -> Result<StageOutput, StageFailure> {
        let intake = request
            .context("intake")
            .ok_or_else(|| StageFailure::validation("no intake payload in context"))?;

        let excerpt = intake
            .get("document_excerpt")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_ascii_lowercase();

        let damage_detected = DAMAGE_INDICATORS
            .iter()
            .any(|indicator| excerpt.contains(indicator));

        let damage_locations: Vec<&str> = if damage_detected {
            PART_LOCATIONS
                .iter()
                .filter(|(needle, _)| excerpt.contains(needle))
                .map(|(_, canonical)| *canonical)
                .collect()
        } else {
            Vec::new()
        };

        let payload = if damage_detected {
            json!({
                "damage_detected": true,
                "severity": "MODERATE",
                "estimated_repair_cost": REPAIR_COST_ESTIMATE,
                "damage_locations": damage_locations,
                "confidence": CONFIDENCE,
            })
        } else {
            json!({
                "damage_detected": false,
                "severity": "NONE",
                "estimated_repair_cost": 0.0,
                "damage_locations": [],
                "confidence": CONFIDENCE,
            })
        };

        Ok(StageOutput::new(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn request_with_excerpt(excerpt: &str) -> StageRequest {
        let mut context = Map::new();
        context.insert(
            "intake".to_string(),
            json!({ "document_excerpt": excerpt }),
        );
        StageRequest::new("CLAIM-001", context)
    }

    #[tokio::test]
    async fn test_detects_damage_and_locations() {
        let assessor = DamageAssessor::new();
        let output = assessor
            .execute(&request_with_excerpt(
                "The car was rear-ended; the rear bumper is dented and the trunk is jammed.",
            ))
            .await
            .unwrap();

        assert_eq!(output.payload["damage_detected"], true);
        assert_eq!(output.payload["severity"], "MODERATE");
        assert_eq!(output.payload["estimated_repair_cost"], 2500.0);

        let locations = output.payload["damage_locations"].as_array().unwrap();
        assert!(locations.contains(&json!("Rear bumper")));
        assert!(locations.contains(&json!("Trunk")));
    }

    #[tokio::test]
    async fn test_clean_document_reports_no_damage() {
        let assessor = DamageAssessor::new();
        let output = assessor
            .execute(&request_with_excerpt(
                "Request for a copy of my policy documents.",
            ))
            .await
            .unwrap();

        assert_eq!(output.payload["damage_detected"], false);
        assert_eq!(output.payload["severity"], "NONE");
        assert_eq!(output.payload["estimated_repair_cost"], 0.0);
        assert!(output.payload["damage_locations"]
            .as_array()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_missing_intake_context_is_a_validation_failure() {
        let assessor = DamageAssessor::new();
        let err = assessor
            .execute(&StageRequest::new("CLAIM-001", Map::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, StageFailure::Validation { .. }));
    }

    #[tokio::test]
    async fn test_detection_is_case_insensitive() {
        let assessor = DamageAssessor::new();
        let output = assessor
            .execute(&request_with_excerpt("SEVERE DAMAGE TO THE WINDSHIELD"))
            .await
            .unwrap();

        assert_eq!(output.payload["damage_detected"], true);
        assert!(output.payload["damage_locations"]
            .as_array()
            .unwrap()
            .contains(&json!("Windshield")));
    }
}
