// ==========================================
// 排放核算引擎 - 参考分类
// ==========================================
// 红线: 被引用后不可修改
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// EmissionType - 排放类型
// ==========================================
// 例: equipment / food / waste / commute / grey_energy
// 单位统一为 kg CO2e，不单独存储
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionType {
    pub code: String,  // 唯一编码
    pub label: String, // 展示名称
    pub created_at: NaiveDateTime,
}

// ==========================================
// EntryType - 数据条目类型
// ==========================================
// 决定适用的计算策略与可用因子
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryType {
    pub name: String,            // 例: scientific-equipment / member
    pub module_category: String, // 所属模块: equipment / headcount ...
    pub created_at: NaiveDateTime,
}

impl EmissionType {
    pub fn new(code: &str, label: &str) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
            created_at: crate::db::now_ts(),
        }
    }
}

impl EntryType {
    pub fn new(name: &str, module_category: &str) -> Self {
        Self {
            name: name.to_string(),
            module_category: module_category.to_string(),
            created_at: crate::db::now_ts(),
        }
    }
}
