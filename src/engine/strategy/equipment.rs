// ==========================================
// 设备能耗策略 (双因子模型)
// ==========================================
// weekly_wh  = active_h × active_power_w + standby_h × standby_power_w
// annual_kwh = weekly_wh × 52 / 1000
// kg_co2eq   = annual_kwh × kg_co2eq_per_kwh
// ==========================================

use super::payload::{bounded_number, coefficient, require_object};
use super::{CalculationStrategy, ConversionRequirement, FactorRequirement, PrimaryScope, ResolvedFactors};
use crate::domain::data_entry::DataEntry;
use crate::domain::emission::EmissionResult;
use crate::engine::error::{EngineError, EngineResult};
use serde_json::{json, Value as JsonValue};

pub const EQUIPMENT_FORMULA_VERSION: &str = "equipment/v1";

const HOURS_PER_WEEK: f64 = 168.0;
const WEEKS_PER_YEAR: f64 = 52.0;

pub struct EquipmentStrategy {
    emission_type: String,
}

impl EquipmentStrategy {
    /// # 参数
    /// - `emission_type`: 固定产出的排放类型（主因子与转换因子均按此类型解析）
    pub fn new(emission_type: &str) -> Self {
        Self {
            emission_type: emission_type.to_string(),
        }
    }
}

impl CalculationStrategy for EquipmentStrategy {
    fn name(&self) -> &str {
        "equipment"
    }

    fn formula_version(&self) -> &str {
        EQUIPMENT_FORMULA_VERSION
    }

    fn factor_requirement(&self) -> FactorRequirement {
        FactorRequirement {
            primary: PrimaryScope::Single {
                emission_type: self.emission_type.clone(),
            },
            primary_classification_keys: vec!["equipment_class".to_string()],
            conversion: Some(ConversionRequirement {
                emission_type: self.emission_type.clone(),
                classification_keys: vec!["region".to_string()],
            }),
        }
    }

    fn required_primary_coefficients(&self, emission_type: &str) -> Vec<&'static str> {
        if emission_type == self.emission_type {
            vec!["active_power_w"]
        } else {
            Vec::new()
        }
    }

    fn validate(&self, data: &JsonValue) -> EngineResult<()> {
        require_object(data)?;
        bounded_number(data, "active_hours_per_week", Some(HOURS_PER_WEEK))?;
        bounded_number(data, "standby_hours_per_week", Some(HOURS_PER_WEEK))?;
        Ok(())
    }

    fn calculate(&self, entry: &DataEntry, factors: &ResolvedFactors) -> EngineResult<Vec<EmissionResult>> {
        let active_hours = bounded_number(&entry.data, "active_hours_per_week", Some(HOURS_PER_WEEK))?;
        let standby_hours = bounded_number(&entry.data, "standby_hours_per_week", Some(HOURS_PER_WEEK))?;

        let power = match factors.primary.as_slice() {
            [single] => single,
            _ => {
                return Err(EngineError::Internal(format!(
                    "设备策略需要恰好一个主因子, 实际={}",
                    factors.primary.len()
                )))
            }
        };
        let mix = factors.conversion.as_ref().ok_or_else(|| EngineError::FactorNotFound {
            entry_type: entry.entry_type.clone(),
            emission_type: self.emission_type.clone(),
            classification: "conversion".to_string(),
        })?;

        let active_power_w = coefficient(power, "active_power_w")?;
        let standby_power_w = coefficient(power, "standby_power_w")?;
        let kg_co2eq_per_kwh = coefficient(mix, "kg_co2eq_per_kwh")?;

        let weekly_wh = active_hours * active_power_w + standby_hours * standby_power_w;
        let annual_kwh = weekly_wh * WEEKS_PER_YEAR / 1000.0;
        let kg_co2eq = annual_kwh * kg_co2eq_per_kwh;

        Ok(vec![EmissionResult {
            emission_type: self.emission_type.clone(),
            primary_factor_id: power.id.clone(),
            conversion_factor_id: Some(mix.id.clone()),
            kg_co2eq,
            meta: json!({
                "active_hours_per_week": active_hours,
                "standby_hours_per_week": standby_hours,
                "active_power_w": active_power_w,
                "standby_power_w": standby_power_w,
                "kg_co2eq_per_kwh": kg_co2eq_per_kwh,
                "weekly_wh": weekly_wh,
                "annual_kwh": annual_kwh,
            }),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::factor::{Factor, FactorValues};

    fn factor(id: &str, values: FactorValues, is_conversion: bool) -> Factor {
        Factor {
            id: id.to_string(),
            emission_type: "equipment".to_string(),
            entry_type: if is_conversion { None } else { Some("scientific-equipment".to_string()) },
            is_conversion,
            classification: json!({}),
            values,
        }
    }

    fn resolved() -> ResolvedFactors {
        ResolvedFactors {
            primary: vec![factor("power", FactorValues::equipment_power(1300.0, 130.0), false)],
            conversion: Some(factor("mix", FactorValues::energy_mix(0.012), true)),
        }
    }

    #[test]
    fn test_reference_equipment_calculation() {
        let entry = DataEntry::new(
            "scientific-equipment",
            json!({"active_hours_per_week": 40, "standby_hours_per_week": 128}),
        );
        let results = EquipmentStrategy::new("equipment").calculate(&entry, &resolved()).unwrap();

        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.emission_type, "equipment");
        assert_eq!(r.primary_factor_id, "power");
        assert_eq!(r.conversion_factor_id.as_deref(), Some("mix"));
        assert!((r.meta["annual_kwh"].as_f64().unwrap() - 3569.28).abs() < 1e-9);
        assert!((r.kg_co2eq - 42.83136).abs() < 1e-9);
    }

    #[test]
    fn test_hours_out_of_range_is_validation_error() {
        let strategy = EquipmentStrategy::new("equipment");
        let err = strategy
            .validate(&json!({"active_hours_per_week": 169, "standby_hours_per_week": 0}))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { ref field, .. } if field == "active_hours_per_week"));

        let err = strategy
            .validate(&json!({"active_hours_per_week": 10, "standby_hours_per_week": -1}))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { ref field, .. } if field == "standby_hours_per_week"));

        assert!(strategy
            .validate(&json!({"active_hours_per_week": 168, "standby_hours_per_week": 0}))
            .is_ok());
    }

    #[test]
    fn test_missing_field_and_non_object_payload() {
        let strategy = EquipmentStrategy::new("equipment");
        assert!(matches!(
            strategy.validate(&json!({"active_hours_per_week": 1})),
            Err(EngineError::Validation { ref field, .. }) if field == "standby_hours_per_week"
        ));
        assert!(matches!(
            strategy.validate(&json!([1, 2])),
            Err(EngineError::Validation { ref field, .. }) if field == "data"
        ));
    }

    #[test]
    fn test_power_factor_without_coefficient_is_invalid_factor() {
        let entry = DataEntry::new(
            "scientific-equipment",
            json!({"active_hours_per_week": 1, "standby_hours_per_week": 1}),
        );
        let mut factors = resolved();
        factors.primary[0].values = FactorValues::per_fte(1.0);
        let err = EquipmentStrategy::new("equipment").calculate(&entry, &factors).unwrap_err();
        assert!(matches!(err, EngineError::InvalidFactorValues { ref field, .. } if field == "active_power_w"));
    }
}
