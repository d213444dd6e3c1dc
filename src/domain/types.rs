// ==========================================
// 排放核算引擎 - 领域类型定义
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 版本化实体类别 (Target Kind)
// ==========================================
// 只有这三类实体走版本账本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Factor,            // 排放因子
    DataEntry,         // 数据条目
    DataEntryEmission, // 排放结果
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl TargetKind {
    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            TargetKind::Factor => "factor",
            TargetKind::DataEntry => "data_entry",
            TargetKind::DataEntryEmission => "data_entry_emission",
        }
    }

    /// 从数据库字符串解析
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "factor" => Some(TargetKind::Factor),
            "data_entry" => Some(TargetKind::DataEntry),
            "data_entry_emission" => Some(TargetKind::DataEntryEmission),
            _ => None,
        }
    }
}

// ==========================================
// 变更类型 (Change Type)
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Create,   // 新建
    Update,   // 更新
    Delete,   // 删除
    Rollback, // 回滚到历史版本
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl ChangeType {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "CREATE",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
            ChangeType::Rollback => "ROLLBACK",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CREATE" => Some(ChangeType::Create),
            "UPDATE" => Some(ChangeType::Update),
            "DELETE" => Some(ChangeType::Delete),
            "ROLLBACK" => Some(ChangeType::Rollback),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_kind_db_round_trip() {
        for kind in [
            TargetKind::Factor,
            TargetKind::DataEntry,
            TargetKind::DataEntryEmission,
        ] {
            assert_eq!(TargetKind::from_db_str(kind.to_db_str()), Some(kind));
        }
        assert_eq!(TargetKind::from_db_str("travel_booking"), None);
    }

    #[test]
    fn test_change_type_parse_is_case_insensitive() {
        assert_eq!(ChangeType::from_db_str("rollback"), Some(ChangeType::Rollback));
        assert_eq!(ChangeType::Update.to_string(), "UPDATE");
        assert_eq!(ChangeType::from_db_str("MERGE"), None);
    }
}
