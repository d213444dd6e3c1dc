// ==========================================
// 排放核算引擎 - 单条目计算服务
// ==========================================
// 红线: 同一条目的全部结果行 + 账本记录在一个事务内提交，任何失败不留部分结果
// 红线: 结果行按 (条目, 排放类型) 原地更新，不重复插入
// ==========================================
// 流程: 加载条目 → 查策略 → 校验载荷 → 解析因子 → 计算 → upsert + 账本 → 删除过期行
// ==========================================

use crate::db::now_ts;
use crate::domain::data_entry::DataEntry;
use crate::domain::emission::{DataEntryEmission, EmissionResult};
use crate::domain::types::{ChangeType, TargetKind};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::{ChangeRequest, VersioningLedger};
use crate::engine::locks::KeyedLocks;
use crate::engine::resolver;
use crate::engine::strategy::StrategyRegistry;
use crate::engine::transaction::run_in_transaction;
use crate::repository::{DataEntryRepository, EmissionRepository};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// 未指定操作人时记入账本的系统身份
pub const SYSTEM_ACTOR: &str = "system:calculation";

// ==========================================
// WriteMode - 结果行写入方式
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// 每次调用都写入并记账
    Always,
    /// 因子变更后的刷新: 结果未变的行，若不引用该因子或已在 since 之后计算过，则跳过
    FactorRefresh {
        factor_id: String,
        since: NaiveDateTime,
    },
}

// ==========================================
// CalculationOutcome - 单条目计算结果
// ==========================================
#[derive(Debug, Clone)]
pub struct CalculationOutcome {
    pub rows: Vec<DataEntryEmission>,
    pub written: usize, // 实际写入（并记账）的行数
    pub deleted: usize, // 删除的过期行数
}

impl CalculationOutcome {
    pub fn is_noop(&self) -> bool {
        self.written == 0 && self.deleted == 0
    }
}

// ==========================================
// EmissionCalculationService
// ==========================================
pub struct EmissionCalculationService {
    conn: Arc<Mutex<Connection>>,
    registry: Arc<StrategyRegistry>,
    ledger: Arc<VersioningLedger>,
    entry_locks: Arc<KeyedLocks>,
}

impl EmissionCalculationService {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        registry: Arc<StrategyRegistry>,
        ledger: Arc<VersioningLedger>,
        entry_locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            conn,
            registry,
            ledger,
            entry_locks,
        }
    }

    /// 计算单个数据条目（系统身份）
    ///
    /// # 错误
    /// - `NotFound`: 条目不存在
    /// - `StrategyNotRegistered` / `Validation` / `FactorNotFound`: 不写入任何结果
    #[instrument(skip(self), fields(data_entry_id = %data_entry_id))]
    pub fn calculate(&self, data_entry_id: &str) -> EngineResult<Vec<DataEntryEmission>> {
        Ok(self
            .calculate_with(data_entry_id, SYSTEM_ACTOR, Some("calculate"), &WriteMode::Always)?
            .rows)
    }

    /// 以指定操作人计算
    pub fn calculate_as(
        &self,
        data_entry_id: &str,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<Vec<DataEntryEmission>> {
        Ok(self
            .calculate_with(data_entry_id, actor, reason, &WriteMode::Always)?
            .rows)
    }

    pub fn calculate_with(
        &self,
        data_entry_id: &str,
        actor: &str,
        reason: Option<&str>,
        mode: &WriteMode,
    ) -> EngineResult<CalculationOutcome> {
        let _entry_guard = self.entry_locks.acquire(data_entry_id);
        let outcome = run_in_transaction(&self.conn, |tx| {
            self.calculate_tx(tx, data_entry_id, actor, reason, mode)
        })?;

        tracing::info!(
            data_entry_id = %data_entry_id,
            rows = outcome.rows.len(),
            written = outcome.written,
            deleted = outcome.deleted,
            "条目计算完成"
        );
        Ok(outcome)
    }

    /// 事务内计算（调用方持有条目锁并负责提交）
    pub(crate) fn calculate_tx(
        &self,
        conn: &Connection,
        data_entry_id: &str,
        actor: &str,
        reason: Option<&str>,
        mode: &WriteMode,
    ) -> EngineResult<CalculationOutcome> {
        let entry = DataEntryRepository::find_by_id_tx(conn, data_entry_id)?
            .ok_or_else(|| EngineError::not_found("DataEntry", data_entry_id))?;

        let strategy = self.registry.get(&entry.entry_type)?;
        strategy.validate(&entry.data)?;

        let factors = resolver::resolve_tx(conn, &entry, &strategy.factor_requirement())?;
        let results = strategy.calculate(&entry, &factors)?;
        ensure_distinct_emission_types(&entry, &results)?;
        ensure_finite_results(&results)?;

        let computed_at = now_ts();
        let formula_version = strategy.formula_version();

        let mut existing: BTreeMap<String, DataEntryEmission> =
            EmissionRepository::find_by_data_entry_tx(conn, data_entry_id)?
                .into_iter()
                .map(|row| (row.emission_type.clone(), row))
                .collect();

        let mut outcome = CalculationOutcome {
            rows: Vec::with_capacity(results.len()),
            written: 0,
            deleted: 0,
        };

        for result in results {
            match existing.remove(&result.emission_type) {
                Some(row) if is_current(&row, &result, formula_version, mode) => {
                    outcome.rows.push(row);
                }
                Some(mut row) => {
                    let before = row.snapshot();
                    row.apply_result(result, formula_version, computed_at);
                    EmissionRepository::update_tx(conn, &row)?;
                    let after = row.snapshot();
                    self.ledger.record_change_tx(
                        conn,
                        &ChangeRequest::new(
                            TargetKind::DataEntryEmission,
                            &row.id,
                            &after,
                            ChangeType::Update,
                            actor,
                        )
                        .with_reason(reason)
                        .with_live_state(&before),
                    )?;
                    outcome.written += 1;
                    outcome.rows.push(row);
                }
                None => {
                    let row = DataEntryEmission::from_result(data_entry_id, result, formula_version, computed_at);
                    EmissionRepository::insert_tx(conn, &row)?;
                    let after = row.snapshot();
                    self.ledger.record_change_tx(
                        conn,
                        &ChangeRequest::new(
                            TargetKind::DataEntryEmission,
                            &row.id,
                            &after,
                            ChangeType::Create,
                            actor,
                        )
                        .with_reason(reason),
                    )?;
                    outcome.written += 1;
                    outcome.rows.push(row);
                }
            }
        }

        // 策略不再产出的排放类型
        for stale in existing.into_values() {
            delete_emission_row_tx(&self.ledger, conn, &stale, actor, Some("emission type no longer produced"))?;
            outcome.deleted += 1;
        }

        Ok(outcome)
    }
}

/// 删除结果行并记录 DELETE
pub(crate) fn delete_emission_row_tx(
    ledger: &VersioningLedger,
    conn: &Connection,
    row: &DataEntryEmission,
    actor: &str,
    reason: Option<&str>,
) -> EngineResult<()> {
    let snapshot = row.snapshot();
    ledger.record_change_tx(
        conn,
        &ChangeRequest::new(
            TargetKind::DataEntryEmission,
            &row.id,
            &snapshot,
            ChangeType::Delete,
            actor,
        )
        .with_reason(reason)
        .with_live_state(&snapshot),
    )?;
    EmissionRepository::delete_tx(conn, &row.id)?;
    tracing::debug!(emission_id = %row.id, emission_type = %row.emission_type, "删除结果行");
    Ok(())
}

fn is_current(row: &DataEntryEmission, result: &EmissionResult, formula_version: &str, mode: &WriteMode) -> bool {
    match mode {
        WriteMode::Always => false,
        WriteMode::FactorRefresh { factor_id, since } => {
            let unchanged = row.formula_version == formula_version
                && row.primary_factor_id == result.primary_factor_id
                && row.conversion_factor_id == result.conversion_factor_id
                && row.kg_co2eq == result.kg_co2eq
                && row.meta == result.meta;
            unchanged && (row.computed_at >= *since || !row.references_factor(factor_id))
        }
    }
}

/// 溢出的结果 (inf / NaN) 无法写入 JSON 快照，写入前拒绝
fn ensure_finite_results(results: &[EmissionResult]) -> EngineResult<()> {
    for r in results {
        if !r.kg_co2eq.is_finite() {
            return Err(EngineError::validation(
                "kg_co2eq",
                format!(
                    "排放类型 {} 的计算结果不是有限数 (因子 {}), 实际={}",
                    r.emission_type, r.primary_factor_id, r.kg_co2eq
                ),
            ));
        }
    }
    Ok(())
}

fn ensure_distinct_emission_types(entry: &DataEntry, results: &[EmissionResult]) -> EngineResult<()> {
    let mut seen = HashSet::new();
    for r in results {
        if !seen.insert(r.emission_type.as_str()) {
            return Err(EngineError::Internal(format!(
                "条目 {} 的策略对排放类型 {} 产出多条结果",
                entry.id, r.emission_type
            )));
        }
    }
    Ok(())
}
