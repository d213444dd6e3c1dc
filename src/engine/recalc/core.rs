use super::{BatchRecalculationService, ProgressFn, RecalcReport};
use crate::domain::types::TargetKind;
use crate::engine::calculation::{EmissionCalculationService, WriteMode};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::VersioningLedger;
use crate::engine::locks::{CancellationFlag, KeyedLocks};
use crate::perf::PerfGuard;
use crate::repository::{EmissionRepository, FactorRepository};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::instrument;

impl BatchRecalculationService {
    /// # 参数
    /// - `parallelism`: 工作线程数，小于 1 时按 1 处理
    pub fn new(
        factor_repo: Arc<FactorRepository>,
        emission_repo: Arc<EmissionRepository>,
        ledger: Arc<VersioningLedger>,
        calculator: Arc<EmissionCalculationService>,
        parallelism: usize,
    ) -> Self {
        Self {
            factor_repo,
            emission_repo,
            ledger,
            calculator,
            factor_locks: KeyedLocks::new(),
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// 引用该因子的全部数据条目（去重，升序）
    pub fn find_dependent_entries(&self, factor_id: &str) -> EngineResult<Vec<String>> {
        let mut ids: BTreeSet<String> = self
            .emission_repo
            .find_data_entry_ids_by_primary_factor(factor_id)?
            .into_iter()
            .collect();
        ids.extend(self.emission_repo.find_data_entry_ids_by_conversion_factor(factor_id)?);
        Ok(ids.into_iter().collect())
    }

    /// 重算引用该因子的全部条目
    ///
    /// # 错误
    /// - `NotFound`: 因子不存在
    /// - 存储层故障: 中止整批（已提交的条目保留）
    pub fn recalculate_for_factor(&self, factor_id: &str) -> EngineResult<RecalcReport> {
        self.recalculate_for_factor_with_cancel(factor_id, &CancellationFlag::new())
    }

    pub fn recalculate_for_factor_with_cancel(
        &self,
        factor_id: &str,
        cancel: &CancellationFlag,
    ) -> EngineResult<RecalcReport> {
        self.recalculate_for_factor_inner(factor_id, cancel, None)
    }

    /// 每处理完一个条目调用一次 `on_progress`；回调中可触发取消
    pub fn recalculate_for_factor_with_progress(
        &self,
        factor_id: &str,
        cancel: &CancellationFlag,
        on_progress: ProgressFn<'_>,
    ) -> EngineResult<RecalcReport> {
        self.recalculate_for_factor_inner(factor_id, cancel, Some(on_progress))
    }

    #[instrument(skip(self, cancel, on_progress), fields(factor_id = %factor_id, parallelism = self.parallelism))]
    fn recalculate_for_factor_inner(
        &self,
        factor_id: &str,
        cancel: &CancellationFlag,
        on_progress: Option<ProgressFn<'_>>,
    ) -> EngineResult<RecalcReport> {
        let _perf = PerfGuard::new("recalculate_for_factor");
        let _factor_guard = self.factor_locks.acquire(factor_id);

        if self.factor_repo.find_by_id(factor_id)?.is_none() {
            return Err(EngineError::not_found("Factor", factor_id));
        }

        let ids = self.find_dependent_entries(factor_id)?;

        // 结果未变的行: 不引用该因子的不动，已在本次因子变更之后重算过的不重复记账
        let mode = match self.ledger.current(TargetKind::Factor, factor_id)? {
            Some(head) => WriteMode::FactorRefresh {
                factor_id: factor_id.to_string(),
                since: head.changed_at,
            },
            None => WriteMode::Always,
        };

        let reason = format!("factor {} changed", factor_id);
        let mut report = self.run(ids, cancel, &mode, &reason, on_progress)?;
        report.factor_id = Some(factor_id.to_string());

        tracing::info!(
            recalculated = report.recalculated,
            unchanged = report.unchanged,
            failed = report.failed.len(),
            cancelled = report.cancelled,
            pending = report.pending.len(),
            elapsed_ms = report.elapsed_ms,
            "因子批量重算完成"
        );
        Ok(report)
    }

    /// 重算指定条目（用于取消后重新入队的剩余条目）
    #[instrument(skip(self, data_entry_ids, cancel), fields(count = data_entry_ids.len()))]
    pub fn recalculate_entries(
        &self,
        data_entry_ids: &[String],
        cancel: &CancellationFlag,
    ) -> EngineResult<RecalcReport> {
        let _perf = PerfGuard::new("recalculate_entries");
        let ids: Vec<String> = data_entry_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let report = self.run(ids, cancel, &WriteMode::Always, "re-enqueued recalculation", None)?;

        tracing::info!(
            recalculated = report.recalculated,
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "条目批量重算完成"
        );
        Ok(report)
    }
}
