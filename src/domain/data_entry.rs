// ==========================================
// 排放核算引擎 - 数据条目领域模型
// ==========================================

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// DataEntry - 数据条目
// ==========================================
// 一条具体观测 (一台设备 / 一次人数申报 / 一次出行)
// data 为类型相关的开放载荷，由对应策略在边界处校验
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEntry {
    pub id: String,         // 条目ID (UUID)
    pub entry_type: String, // 条目类型
    pub data: JsonValue,    // 观测载荷
}

impl DataEntry {
    pub fn new(entry_type: &str, data: JsonValue) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entry_type: entry_type.to_string(),
            data,
        }
    }

    /// 完整快照 (写入版本账本)
    pub fn snapshot(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
