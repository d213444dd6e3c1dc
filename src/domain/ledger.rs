// ==========================================
// 排放核算引擎 - 版本账本领域模型
// ==========================================
// 红线: 只追加，不修改历史快照
// 红线: 每条记录的哈希 = H(前一条哈希 ‖ 快照 ‖ 元数据)
// ==========================================

use crate::domain::types::{ChangeType, TargetKind};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// LedgerEntry - 账本记录
// ==========================================
// snapshot_raw 保存落库时的原始 JSON 文本，哈希按原文计算，
// 因此存储层任何字节改动都会导致校验失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub target_kind: TargetKind,
    pub target_id: String,
    pub version: i64,         // 从 1 开始，连续无空洞
    pub is_current: bool,     // 每个 target 恰有一条为 true
    pub snapshot_raw: String, // 完整状态快照 (JSON 原文)
    pub diff: Option<JsonValue>,
    pub change_type: ChangeType,
    pub reason: Option<String>,
    pub actor: String,
    pub changed_at: NaiveDateTime,
    pub previous_hash: Option<String>,
    pub current_hash: String,
}

impl LedgerEntry {
    /// 解析快照
    pub fn snapshot(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::from_str(&self.snapshot_raw)
    }
}

// ==========================================
// ChainVerification - 哈希链校验报告
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub target_kind: TargetKind,
    pub target_id: String,
    pub valid: bool,
    pub checked: usize,                     // 已校验的记录数
    pub first_broken_version: Option<i64>, // 第一处断链的版本号
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}
