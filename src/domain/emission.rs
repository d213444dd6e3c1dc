// ==========================================
// 排放核算引擎 - 排放结果领域模型
// ==========================================
// 红线: 每个 (数据条目, 排放类型) 只有一行，重算原地更新
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// DataEntryEmission - 排放结果 (持久化)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEntryEmission {
    pub id: String,
    pub data_entry_id: String,
    pub emission_type: String,
    pub primary_factor_id: String,            // 主因子
    pub conversion_factor_id: Option<String>, // 转换因子 (可选)
    pub kg_co2eq: f64,                        // 排放量 (kg CO2e)
    pub meta: JsonValue,                      // 计算输入快照
    pub formula_version: String,              // 计算口径版本
    pub computed_at: NaiveDateTime,           // 计算时间
}

// ==========================================
// EmissionResult - 策略输出 (未持久化)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionResult {
    pub emission_type: String,
    pub primary_factor_id: String,
    pub conversion_factor_id: Option<String>,
    pub kg_co2eq: f64,
    pub meta: JsonValue,
}

impl DataEntryEmission {
    /// 由策略输出构造新行
    pub fn from_result(
        data_entry_id: &str,
        result: EmissionResult,
        formula_version: &str,
        computed_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            data_entry_id: data_entry_id.to_string(),
            emission_type: result.emission_type,
            primary_factor_id: result.primary_factor_id,
            conversion_factor_id: result.conversion_factor_id,
            kg_co2eq: result.kg_co2eq,
            meta: result.meta,
            formula_version: formula_version.to_string(),
            computed_at,
        }
    }

    /// 以新结果覆盖当前行 (保留 id)
    pub fn apply_result(
        &mut self,
        result: EmissionResult,
        formula_version: &str,
        computed_at: NaiveDateTime,
    ) {
        self.primary_factor_id = result.primary_factor_id;
        self.conversion_factor_id = result.conversion_factor_id;
        self.kg_co2eq = result.kg_co2eq;
        self.meta = result.meta;
        self.formula_version = formula_version.to_string();
        self.computed_at = computed_at;
    }

    /// 是否引用了指定因子 (主因子或转换因子)
    pub fn references_factor(&self, factor_id: &str) -> bool {
        self.primary_factor_id == factor_id
            || self.conversion_factor_id.as_deref() == Some(factor_id)
    }

    /// 完整快照 (写入版本账本)
    pub fn snapshot(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
