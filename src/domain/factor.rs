// ==========================================
// 排放核算引擎 - 排放因子领域模型
// ==========================================
// 红线: 一条因子只产出一种排放类型
// 红线: 因子表只存当前状态，历史只在版本账本中
// ==========================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

// ==========================================
// Factor - 排放因子
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub id: String,                 // 因子ID (UUID)
    pub emission_type: String,      // 产出的排放类型
    pub entry_type: Option<String>, // 适用条目类型 (转换因子可为空)
    pub is_conversion: bool,        // true = 转换因子 (如电网排放强度)
    pub classification: JsonValue,  // 子分类标签 (JSON 对象)
    pub values: FactorValues,       // 系数载荷
}

// ==========================================
// FactorValues - 系数载荷
// ==========================================
// 计算热路径上使用强类型字段；未识别的字段保存在 extra 中随快照往返
// 通用反序列化按变体顺序匹配，均不满足时落入 Generic；
// 已知因子角色时用 decode / for_role，转换因子固定落入 EnergyMix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactorValues {
    /// 设备功率 (W)
    EquipmentPower {
        active_power_w: f64,
        #[serde(default)]
        standby_power_w: f64,
        #[serde(flatten)]
        extra: Map<String, JsonValue>,
    },
    /// 电网排放强度 (kg CO2e / kWh)，转换因子
    EnergyMix {
        kg_co2eq_per_kwh: f64,
        #[serde(flatten)]
        extra: Map<String, JsonValue>,
    },
    /// 人均排放 (kg CO2e / FTE)
    PerFte {
        kg_co2eq_per_fte: f64,
        #[serde(flatten)]
        extra: Map<String, JsonValue>,
    },
    /// 前向兼容的通用载荷
    Generic(Map<String, JsonValue>),
}

impl FactorValues {
    pub fn equipment_power(active_power_w: f64, standby_power_w: f64) -> Self {
        FactorValues::EquipmentPower {
            active_power_w,
            standby_power_w,
            extra: Map::new(),
        }
    }

    pub fn energy_mix(kg_co2eq_per_kwh: f64) -> Self {
        FactorValues::EnergyMix {
            kg_co2eq_per_kwh,
            extra: Map::new(),
        }
    }

    pub fn per_fte(kg_co2eq_per_fte: f64) -> Self {
        FactorValues::PerFte {
            kg_co2eq_per_fte,
            extra: Map::new(),
        }
    }

    /// 从任意 JSON 解析
    pub fn from_json(value: JsonValue) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// 按因子角色解析
    ///
    /// 转换因子只要带有 kg_co2eq_per_kwh 即解析为 EnergyMix，其余字段进入 extra
    pub fn decode(value: JsonValue, is_conversion: bool) -> Result<Self, serde_json::Error> {
        if !is_conversion {
            return Self::from_json(value);
        }
        match value {
            JsonValue::Object(mut map) => match map.get(KWH_FIELD).and_then(JsonValue::as_f64) {
                Some(kg_co2eq_per_kwh) => {
                    map.remove(KWH_FIELD);
                    Ok(FactorValues::EnergyMix {
                        kg_co2eq_per_kwh,
                        extra: map,
                    })
                }
                None => Self::from_json(JsonValue::Object(map)),
            },
            other => Self::from_json(other),
        }
    }

    /// 按因子角色重新选择变体
    pub fn for_role(self, is_conversion: bool) -> Self {
        if !is_conversion || matches!(self, FactorValues::EnergyMix { .. }) {
            return self;
        }
        Self::decode(self.to_json(), true).unwrap_or(self)
    }

    /// 转为扁平 JSON 对象
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// 按字段名读取数值系数（强类型字段优先，其次 extra）
    pub fn number(&self, key: &str) -> Option<f64> {
        match (self, key) {
            (FactorValues::EquipmentPower { active_power_w, .. }, "active_power_w") => {
                Some(*active_power_w)
            }
            (FactorValues::EquipmentPower { standby_power_w, .. }, "standby_power_w") => {
                Some(*standby_power_w)
            }
            (FactorValues::EnergyMix { kg_co2eq_per_kwh, .. }, "kg_co2eq_per_kwh") => {
                Some(*kg_co2eq_per_kwh)
            }
            (FactorValues::PerFte { kg_co2eq_per_fte, .. }, "kg_co2eq_per_fte") => {
                Some(*kg_co2eq_per_fte)
            }
            _ => self.extra().get(key).and_then(JsonValue::as_f64),
        }
    }

    fn extra(&self) -> &Map<String, JsonValue> {
        match self {
            FactorValues::EquipmentPower { extra, .. }
            | FactorValues::EnergyMix { extra, .. }
            | FactorValues::PerFte { extra, .. } => extra,
            FactorValues::Generic(map) => map,
        }
    }

    /// 所有数值字段 (字段名, 值)
    pub fn numeric_fields(&self) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        if let JsonValue::Object(map) = self.to_json() {
            for (k, v) in map {
                if let Some(n) = v.as_f64() {
                    out.push((k, n));
                }
            }
        }
        out
    }

    /// 校验系数载荷
    ///
    /// # 返回
    /// - `Err((field, message))`: 第一个不合法的字段
    pub fn check(&self, is_conversion: bool) -> Result<(), (String, String)> {
        if is_conversion {
            self.require(&[KWH_FIELD])?;
        }
        for (field, value) in self.numeric_fields() {
            if !value.is_finite() || value < 0.0 {
                return Err((field, format!("系数必须为非负有限数, 实际={}", value)));
            }
        }
        Ok(())
    }

    /// 要求载荷带有指定的数值字段
    pub fn require(&self, fields: &[&str]) -> Result<(), (String, String)> {
        match fields.iter().find(|f| self.number(f).is_none()) {
            Some(missing) => Err((missing.to_string(), format!("缺少数值系数 {}", missing))),
            None => Ok(()),
        }
    }
}

const KWH_FIELD: &str = "kg_co2eq_per_kwh";

impl Factor {
    /// 读取分类标签
    pub fn classification_value(&self, key: &str) -> Option<&JsonValue> {
        self.classification.get(key)
    }

    /// 分类匹配度
    ///
    /// # 返回
    /// - `None`: 因子声明的某个分类键与条目取值冲突 (不可用)
    /// - `Some(n)`: 可用，声明的 n 个分类键全部命中
    ///
    /// 因子声明的每个键都参与匹配；条目未提供的键视为冲突
    pub fn classification_score(&self, data: &JsonValue) -> Option<usize> {
        let declared = match self.classification.as_object() {
            Some(map) => map,
            None => return Some(0),
        };
        for (key, expected) in declared {
            match data.get(key) {
                Some(actual) if actual == expected => {}
                _ => return None,
            }
        }
        Some(declared.len())
    }

    /// 完整快照 (写入版本账本)
    pub fn snapshot(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_values_decode_into_typed_variants() {
        let power = FactorValues::from_json(json!({"active_power_w": 1300})).unwrap();
        assert_eq!(power.number("active_power_w"), Some(1300.0));
        assert_eq!(power.number("standby_power_w"), Some(0.0));

        let mix = FactorValues::from_json(json!({"kg_co2eq_per_kwh": 0.012, "source": "grid"})).unwrap();
        assert!(matches!(mix, FactorValues::EnergyMix { .. }));
        assert_eq!(mix.to_json()["source"], json!("grid"));

        let fte = FactorValues::from_json(json!({"kg_co2eq_per_fte": 420})).unwrap();
        assert!(matches!(fte, FactorValues::PerFte { .. }));

        let generic = FactorValues::from_json(json!({"kg_per_km": 0.2})).unwrap();
        assert!(matches!(generic, FactorValues::Generic(_)));
        assert_eq!(generic.number("kg_per_km"), Some(0.2));
    }

    #[test]
    fn test_check_rejects_negative_and_missing_conversion_field() {
        assert!(FactorValues::per_fte(320.0).check(false).is_ok());

        let (field, _) = FactorValues::per_fte(-1.0).check(false).unwrap_err();
        assert_eq!(field, "kg_co2eq_per_fte");

        let (field, _) = FactorValues::per_fte(1.0).check(true).unwrap_err();
        assert_eq!(field, "kg_co2eq_per_kwh");

        let (field, _) = FactorValues::per_fte(1.0)
            .require(&["active_power_w"])
            .unwrap_err();
        assert_eq!(field, "active_power_w");
    }

    #[test]
    fn test_conversion_role_decodes_energy_mix_with_extra_fields() {
        let raw = json!({"kg_co2eq_per_kwh": 0.012, "active_power_w": 5.0});

        // 不知角色时按字段形状落入设备功率
        let shaped = FactorValues::from_json(raw.clone()).unwrap();
        assert!(matches!(shaped, FactorValues::EquipmentPower { .. }));

        let mix = FactorValues::decode(raw, true).unwrap();
        match &mix {
            FactorValues::EnergyMix { kg_co2eq_per_kwh, extra } => {
                assert_eq!(*kg_co2eq_per_kwh, 0.012);
                assert_eq!(extra.get("active_power_w"), Some(&json!(5.0)));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        assert!(mix.check(true).is_ok());

        let relabelled = shaped.for_role(true);
        assert!(matches!(relabelled, FactorValues::EnergyMix { .. }));
        assert_eq!(relabelled.number("kg_co2eq_per_kwh"), Some(0.012));
        assert!(relabelled.check(true).is_ok());

        // 主因子保持原变体
        let power = FactorValues::equipment_power(10.0, 1.0).for_role(false);
        assert!(matches!(power, FactorValues::EquipmentPower { .. }));
    }

    #[test]
    fn test_classification_score() {
        let factor = Factor {
            id: "f1".to_string(),
            emission_type: "equipment".to_string(),
            entry_type: Some("scientific-equipment".to_string()),
            is_conversion: false,
            classification: json!({"equipment_class": "centrifuge"}),
            values: FactorValues::equipment_power(1300.0, 130.0),
        };

        assert_eq!(
            factor.classification_score(&json!({"equipment_class": "centrifuge", "region": "CH"})),
            Some(1)
        );
        assert_eq!(
            factor.classification_score(&json!({"equipment_class": "freezer"})),
            None
        );
        assert_eq!(factor.classification_score(&json!({})), None);

        let untagged = Factor {
            classification: json!({}),
            ..factor
        };
        assert_eq!(untagged.classification_score(&json!({"equipment_class": "x"})), Some(0));
    }

    #[test]
    fn test_every_declared_tag_must_match() {
        let factor = Factor {
            id: "f3".to_string(),
            emission_type: "food".to_string(),
            entry_type: Some("member".to_string()),
            is_conversion: false,
            classification: json!({"campus": "A"}),
            values: FactorValues::per_fte(320.0),
        };
        assert_eq!(factor.classification_score(&json!({"fte": 1})), None);
        assert_eq!(factor.classification_score(&json!({"fte": 1, "campus": "B"})), None);
        assert_eq!(factor.classification_score(&json!({"fte": 1, "campus": "A"})), Some(1));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let factor = Factor {
            id: "f2".to_string(),
            emission_type: "food".to_string(),
            entry_type: Some("member".to_string()),
            is_conversion: false,
            classification: json!({}),
            values: FactorValues::per_fte(320.0),
        };
        let restored: Factor = serde_json::from_value(factor.snapshot()).unwrap();
        assert_eq!(restored, factor);
    }
}
