//! Final decision stage.
//!
//! Deterministic rule evaluation over the accumulated context: policy
//! terms, damage assessment, valuation, and the intake entities. Returns
//! APPROVED, DENIED, or PENDING with reasoning and payout arithmetic.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};

use super::{StageFailure, StageOutput, StageRequest, StageService};

const DENIED_CONFIDENCE: f64 = 0.9;
const PENDING_CONFIDENCE: f64 = 0.6;
const APPROVED_CONFIDENCE: f64 = 0.85;

/// Local decision stage
pub struct DecisionMaker;

impl DecisionMaker {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DecisionMaker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageService for DecisionMaker {
    fn name(&self) -> &str {
        "decision"
    }

    async fn execute(&self, request: &StageRequest) -> Result<StageOutput, StageFailure> {
        let policy = request
            .context("policy")
            .ok_or_else(|| StageFailure::validation("no policy payload in context"))?;
        let damage = request
            .context("damage")
            .ok_or_else(|| StageFailure::validation("no damage payload in context"))?;
        let valuation = request
            .context("valuation")
            .ok_or_else(|| StageFailure::validation("no valuation payload in context"))?;

        let verdict = evaluate(request, policy, damage, valuation);
        Ok(StageOutput::new(verdict.into_payload()))
    }
}

fn evaluate(request: &StageRequest, policy: &Value, damage: &Value, valuation: &Value) -> Verdict {
    let policy_id = policy
        .get("policy_id")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    if !policy.get("found").and_then(Value::as_bool).unwrap_or(false) {
        return Verdict::denied(format!(
            "Policy {} was not found; the claim cannot be covered.",
            policy_id
        ));
    }

    let damage_detected = damage
        .get("damage_detected")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !damage_detected {
        return Verdict::denied("No vehicle damage was detected in the claim document.");
    }

    let coverage_type = policy
        .get("coverage_type")
        .and_then(Value::as_str)
        .unwrap_or("");
    if coverage_type.to_ascii_lowercase().contains("liability") {
        return Verdict::denied(
            "The policy covers liability only; damage to the insured vehicle is not covered.",
        );
    }

    let repair_cost = damage
        .get("estimated_repair_cost")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let vehicle_value = valuation
        .get("vehicle_value")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    let mut risk_factors = Vec::new();
    if vehicle_value > 0.0 && repair_cost > vehicle_value {
        risk_factors.push("Repair estimate exceeds the vehicle's market value".to_string());
    }

    // Filing deadline check needs a readable incident date
    let incident_date = request
        .context("intake")
        .and_then(|intake| intake.pointer("/entities/incident_date"))
        .and_then(Value::as_str)
        .and_then(parse_incident_date);

    let incident_date = match incident_date {
        Some(date) => date,
        None => {
            return Verdict::pending(
                "The incident date is missing or unreadable; the filing deadline cannot be verified.",
                vec![
                    "Provide the incident date".to_string(),
                    "Resubmit the claim document".to_string(),
                ],
            )
            .with_risk_factors(risk_factors);
        }
    };

    let deadline_days = policy
        .get("filing_deadline_days")
        .and_then(Value::as_u64)
        .unwrap_or(0) as i64;
    let days_since = (Utc::now().date_naive() - incident_date).num_days();

    if days_since > deadline_days {
        return Verdict::denied(format!(
            "The claim was filed {} days after the incident; the policy's filing deadline is {} days.",
            days_since, deadline_days
        ))
        .with_risk_factors(risk_factors);
    }
    if days_since < 0 {
        risk_factors.push("Incident date is in the future".to_string());
    }

    let coverage_limit = policy
        .get("coverage_limit")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let deductible = policy
        .get("deductible")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    let payout = (repair_cost.min(coverage_limit) - deductible).max(0.0);
    if payout <= 0.0 {
        return Verdict::denied(format!(
            "The estimated repair cost (${:.2}) does not exceed the ${:.2} deductible.",
            repair_cost, deductible
        ))
        .with_risk_factors(risk_factors);
    }

    Verdict::approved(
        format!(
            "Damage is covered under {} with an estimated payout of ${:.2} after the ${:.2} deductible.",
            coverage_type, payout, deductible
        ),
        payout,
        deductible > 0.0,
    )
    .with_risk_factors(risk_factors)
}

fn parse_incident_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

/// The structured decision before serialization
struct Verdict {
    decision: &'static str,
    reasoning: String,
    confidence: f64,
    estimated_payout: f64,
    deductible_applies: bool,
    required_actions: Vec<String>,
    risk_factors: Vec<String>,
}

impl Verdict {
    fn denied(reasoning: impl Into<String>) -> Self {
        Self {
            decision: "DENIED",
            reasoning: reasoning.into(),
            confidence: DENIED_CONFIDENCE,
            estimated_payout: 0.0,
            deductible_applies: false,
            required_actions: Vec::new(),
            risk_factors: Vec::new(),
        }
    }

    fn pending(reasoning: impl Into<String>, required_actions: Vec<String>) -> Self {
        Self {
            decision: "PENDING",
            reasoning: reasoning.into(),
            confidence: PENDING_CONFIDENCE,
            estimated_payout: 0.0,
            deductible_applies: false,
            required_actions,
            risk_factors: Vec::new(),
        }
    }

    fn approved(reasoning: String, estimated_payout: f64, deductible_applies: bool) -> Self {
        Self {
            decision: "APPROVED",
            reasoning,
            confidence: APPROVED_CONFIDENCE,
            estimated_payout,
            deductible_applies,
            required_actions: Vec::new(),
            risk_factors: Vec::new(),
        }
    }

    fn with_risk_factors(mut self, risk_factors: Vec<String>) -> Self {
        self.risk_factors = risk_factors;
        self
    }

    fn into_payload(self) -> Value {
        json!({
            "decision": self.decision,
            "reasoning": self.reasoning,
            "confidence": self.confidence,
            "estimated_payout": self.estimated_payout,
            "deductible_applies": self.deductible_applies,
            "required_actions": self.required_actions,
            "risk_factors": self.risk_factors,
        })
    }
}
