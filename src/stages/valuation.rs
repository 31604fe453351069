//! Vehicle valuation stage.
//!
//! Produces a market value estimate from the intake entities: a flat
//! base figure with straight-line age depreciation when a model year is
//! present, floored so old vehicles keep scrap value.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::{json, Value};

use super::{StageFailure, StageOutput, StageRequest, StageService};

const BASE_VALUE: f64 = 25_000.0;
const DEPRECIATION_PER_YEAR: f64 = 1_500.0;
const VALUE_FLOOR: f64 = 4_000.0;
const CONFIDENCE: f64 = 0.8;
const MARKET_SOURCE: &str = "market_average";

/// Local valuation stage
pub struct VehicleValuation;

impl VehicleValuation {
    pub fn new() -> Self {
        Self
    }
}

impl Default for VehicleValuation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageService for VehicleValuation {
    fn name(&self) -> &str {
        "valuation"
    }

    async fn execute(&self, request: &StageRequest) -> Result<StageOutput, StageFailure> {
        let vehicle_info = request
            .context("intake")
            .and_then(|intake| intake.pointer("/entities/vehicle_info"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();

        let current_year = Utc::now().year();
        let vehicle_value = match model_year(&vehicle_info, current_year) {
            Some(year) => {
                let age = (current_year - year).max(0) as f64;
                (BASE_VALUE - DEPRECIATION_PER_YEAR * age).max(VALUE_FLOOR)
            }
            None => BASE_VALUE,
        };

        Ok(StageOutput::new(json!({
            "vehicle_value": vehicle_value,
            "vehicle_info": vehicle_info,
            "market_source": MARKET_SOURCE,
            "confidence": CONFIDENCE,
        })))
    }
}

/// First plausible model year token in the vehicle description
fn model_year(vehicle_info: &str, current_year: i32) -> Option<i32> {
    vehicle_info
        .split_whitespace()
        .filter_map(|token| {
            token
                .trim_matches(|c: char| !c.is_ascii_digit())
                .parse::<i32>()
                .ok()
        })
        .find(|year| (1950..=current_year + 1).contains(year))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn request_with_vehicle(vehicle_info: Option<&str>) -> StageRequest {
        let mut context = Map::new();
        context.insert(
            "intake".to_string(),
            json!({ "entities": { "vehicle_info": vehicle_info } }),
        );
        StageRequest::new("CLAIM-001", context)
    }

    #[tokio::test]
    async fn test_depreciates_by_model_year() {
        let valuation = VehicleValuation::new();
        let current_year = Utc::now().year();
        let vehicle = format!("{} Honda Civic", current_year - 4);

        let output = valuation
            .execute(&request_with_vehicle(Some(&vehicle)))
            .await
            .unwrap();

        assert_eq!(
            output.payload["vehicle_value"],
            BASE_VALUE - 4.0 * DEPRECIATION_PER_YEAR
        );
        assert_eq!(output.payload["market_source"], "market_average");
    }

    #[tokio::test]
    async fn test_old_vehicles_keep_floor_value() {
        let valuation = VehicleValuation::new();
        let output = valuation
            .execute(&request_with_vehicle(Some("1982 DeLorean DMC-12")))
            .await
            .unwrap();

        assert_eq!(output.payload["vehicle_value"], VALUE_FLOOR);
    }

    #[tokio::test]
    async fn test_unknown_vehicle_gets_base_value() {
        let valuation = VehicleValuation::new();
        let output = valuation
            .execute(&request_with_vehicle(None))
            .await
            .unwrap();

        assert_eq!(output.payload["vehicle_value"], BASE_VALUE);
        assert_eq!(output.payload["vehicle_info"], "Unknown");
    }

    #[test]
    fn test_model_year_ignores_implausible_numbers() {
        assert_eq!(model_year("2019 Subaru Outback", 2026), Some(2019));
        assert_eq!(model_year("Truck with 150000 miles", 2026), None);
        assert_eq!(model_year("DMC-12", 2026), None);
    }
}
