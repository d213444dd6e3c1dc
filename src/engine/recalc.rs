// ==========================================
// 排放核算引擎 - 批量重算服务
// ==========================================
// 红线: 单条目失败不影响其他条目；只有存储层故障中止整批
// 红线: 已开始的条目要么完整提交要么回滚，取消只在条目之间生效
// ==========================================
// 职责: 因子变更后，重算所有引用该因子（主因子或转换因子）的数据条目
// 输入: factor_id / 条目ID列表 + 取消标志
// 输出: RecalcReport
// ==========================================

mod core;
mod workers;

use crate::engine::calculation::EmissionCalculationService;
use crate::engine::ledger::VersioningLedger;
use crate::engine::locks::KeyedLocks;
use crate::repository::{EmissionRepository, FactorRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 批量重算记入账本的系统身份
pub const BATCH_ACTOR: &str = "system:batch-recalc";

// ==========================================
// RecalcReport - 批量重算报告
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecalcReport {
    pub factor_id: Option<String>,     // 触发重算的因子
    pub recalculated: usize,           // 已重算并写入的条目数
    pub unchanged: usize,              // 结果已是最新、未产生写入的条目数
    pub failed: Vec<RecalcFailure>,    // 单条目失败 (按条目ID排序)
    pub cancelled: bool,               // 是否因取消提前结束
    pub pending: Vec<String>,          // 取消时尚未处理的条目
    pub elapsed_ms: i64,               // 耗时(毫秒)
}

/// 单个条目处理完毕后的进度通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecalcProgress {
    pub data_entry_id: String,
    pub processed: usize, // 含本条目在内已处理的条目数
    pub total: usize,
}

/// 进度回调，在工作线程上调用
pub type ProgressFn<'a> = &'a (dyn Fn(&RecalcProgress) + Sync);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalcFailure {
    pub data_entry_id: String,
    pub error: String,
}

impl RecalcReport {
    /// 已处理（成功 + 无变化 + 失败）的条目数
    pub fn processed(&self) -> usize {
        self.recalculated + self.unchanged + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failed.is_empty()
    }
}

// ==========================================
// BatchRecalculationService
// ==========================================
pub struct BatchRecalculationService {
    factor_repo: Arc<FactorRepository>,
    emission_repo: Arc<EmissionRepository>,
    ledger: Arc<VersioningLedger>,
    calculator: Arc<EmissionCalculationService>,
    factor_locks: KeyedLocks,
    parallelism: usize,
}
