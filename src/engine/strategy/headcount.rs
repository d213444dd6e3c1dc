// ==========================================
// 人员策略 (N 因子模型，无转换因子)
// ==========================================
// 每个匹配因子产出一条: kg_co2eq = fte × kg_co2eq_per_fte
// ==========================================

use super::payload::{bounded_number, coefficient, require_object};
use super::{CalculationStrategy, FactorRequirement, PrimaryScope, ResolvedFactors};
use crate::domain::data_entry::DataEntry;
use crate::domain::emission::EmissionResult;
use crate::engine::error::{EngineError, EngineResult};
use serde_json::{json, Value as JsonValue};

pub const HEADCOUNT_FORMULA_VERSION: &str = "headcount/v1";

#[derive(Default)]
pub struct HeadcountStrategy;

impl HeadcountStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl CalculationStrategy for HeadcountStrategy {
    fn name(&self) -> &str {
        "headcount"
    }

    fn formula_version(&self) -> &str {
        HEADCOUNT_FORMULA_VERSION
    }

    fn factor_requirement(&self) -> FactorRequirement {
        FactorRequirement {
            primary: PrimaryScope::PerEmissionType,
            primary_classification_keys: Vec::new(),
            conversion: None,
        }
    }

    fn required_primary_coefficients(&self, _emission_type: &str) -> Vec<&'static str> {
        vec!["kg_co2eq_per_fte"]
    }

    fn validate(&self, data: &JsonValue) -> EngineResult<()> {
        require_object(data)?;
        bounded_number(data, "fte", None)?;
        Ok(())
    }

    fn calculate(&self, entry: &DataEntry, factors: &ResolvedFactors) -> EngineResult<Vec<EmissionResult>> {
        let fte = bounded_number(&entry.data, "fte", None)?;

        // 零因子是配置错误，不是零排放
        if factors.primary.is_empty() {
            return Err(EngineError::FactorNotFound {
                entry_type: entry.entry_type.clone(),
                emission_type: "*".to_string(),
                classification: "{}".to_string(),
            });
        }

        factors
            .primary
            .iter()
            .map(|factor| {
                let per_fte = coefficient(factor, "kg_co2eq_per_fte")?;
                Ok(EmissionResult {
                    emission_type: factor.emission_type.clone(),
                    primary_factor_id: factor.id.clone(),
                    conversion_factor_id: None,
                    kg_co2eq: fte * per_fte,
                    meta: json!({
                        "fte": fte,
                        "kg_co2eq_per_fte": per_fte,
                    }),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::factor::{Factor, FactorValues};

    fn per_fte(id: &str, emission_type: &str, value: f64) -> Factor {
        Factor {
            id: id.to_string(),
            emission_type: emission_type.to_string(),
            entry_type: Some("member".to_string()),
            is_conversion: false,
            classification: json!({}),
            values: FactorValues::per_fte(value),
        }
    }

    #[test]
    fn test_one_result_per_factor() {
        let entry = DataEntry::new("member", json!({"fte": 1.5}));
        let factors = ResolvedFactors {
            primary: vec![
                per_fte("f-food", "food", 32000.0),
                per_fte("f-heat", "heating", 4500.0),
                per_fte("f-commute", "commuting", 18000.0),
                per_fte("f-it", "digital", 9500.0),
            ],
            conversion: None,
        };
        let results = HeadcountStrategy::new().calculate(&entry, &factors).unwrap();

        let values: Vec<(String, f64)> = results
            .iter()
            .map(|r| (r.emission_type.clone(), r.kg_co2eq))
            .collect();
        assert_eq!(
            values,
            vec![
                ("food".to_string(), 48000.0),
                ("heating".to_string(), 6750.0),
                ("commuting".to_string(), 27000.0),
                ("digital".to_string(), 14250.0),
            ]
        );
        assert!(results.iter().all(|r| r.conversion_factor_id.is_none()));
    }

    #[test]
    fn test_zero_factors_fail_loudly() {
        let entry = DataEntry::new("member", json!({"fte": 1.0}));
        let err = HeadcountStrategy::new()
            .calculate(&entry, &ResolvedFactors::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::FactorNotFound { .. }));
    }

    #[test]
    fn test_fte_must_be_non_negative_number() {
        let strategy = HeadcountStrategy::new();
        assert!(strategy.validate(&json!({"fte": 0})).is_ok());
        assert!(matches!(
            strategy.validate(&json!({"fte": -0.5})),
            Err(EngineError::Validation { ref field, .. }) if field == "fte"
        ));
        assert!(matches!(
            strategy.validate(&json!({"fte": "two"})),
            Err(EngineError::Validation { ref field, .. }) if field == "fte"
        ));
    }
}
