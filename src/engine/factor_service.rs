// ==========================================
// 排放核算引擎 - 因子管理服务
// ==========================================
// 红线: 因子行写入与账本记录同一事务提交
// 红线: 回滚写入新版本 (ROLLBACK)，不改写历史
// ==========================================

use crate::domain::factor::{Factor, FactorValues};
use crate::domain::ledger::LedgerEntry;
use crate::domain::types::{ChangeType, TargetKind};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::{ChangeRequest, VersioningLedger};
use crate::engine::strategy::StrategyRegistry;
use crate::engine::transaction::run_in_transaction;
use crate::repository::{FactorRepository, LedgerRepository, TaxonomyRepository};
use rusqlite::Connection;
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use tracing::instrument;

pub struct FactorManagementService {
    conn: Arc<Mutex<Connection>>,
    factor_repo: Arc<FactorRepository>,
    ledger: Arc<VersioningLedger>,
    registry: Arc<StrategyRegistry>,
}

impl FactorManagementService {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        factor_repo: Arc<FactorRepository>,
        ledger: Arc<VersioningLedger>,
        registry: Arc<StrategyRegistry>,
    ) -> Self {
        Self {
            conn,
            factor_repo,
            ledger,
            registry,
        }
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 新建因子并记录 CREATE
    ///
    /// # 错误
    /// - `Validation`: 系数非法、分类非对象、引用的分类数据不存在、主因子缺少条目类型
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, values, classification), fields(emission_type = %emission_type, actor = %actor))]
    pub fn create(
        &self,
        emission_type: &str,
        entry_type: Option<&str>,
        is_conversion: bool,
        values: FactorValues,
        classification: JsonValue,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<Factor> {
        if !is_conversion && entry_type.is_none() {
            return Err(EngineError::validation("entry_type", "主因子必须指定条目类型"));
        }
        let classification = match classification {
            JsonValue::Null => JsonValue::Object(Default::default()),
            obj @ JsonValue::Object(_) => obj,
            other => {
                return Err(EngineError::validation(
                    "classification",
                    format!("必须为 JSON 对象, 实际={}", other),
                ))
            }
        };
        let values = values.for_role(is_conversion);
        check_values(&values, is_conversion)?;
        self.check_coefficients(emission_type, entry_type, is_conversion, &values)?;

        let factor = Factor {
            id: uuid::Uuid::new_v4().to_string(),
            emission_type: emission_type.to_string(),
            entry_type: entry_type.map(str::to_string),
            is_conversion,
            classification,
            values,
        };

        run_in_transaction(&self.conn, |tx| {
            if !TaxonomyRepository::emission_type_exists_tx(tx, emission_type)? {
                return Err(EngineError::validation(
                    "emission_type",
                    format!("未知排放类型: {}", emission_type),
                ));
            }
            if let Some(et) = entry_type {
                if !TaxonomyRepository::entry_type_exists_tx(tx, et)? {
                    return Err(EngineError::validation("entry_type", format!("未知条目类型: {}", et)));
                }
            }

            FactorRepository::insert_tx(tx, &factor)?;
            let snapshot = factor.snapshot();
            self.ledger.record_change_tx(
                tx,
                &ChangeRequest::new(TargetKind::Factor, &factor.id, &snapshot, ChangeType::Create, actor)
                    .with_reason(reason),
            )?;
            Ok(())
        })?;

        tracing::info!(factor_id = %factor.id, "因子已创建");
        Ok(factor)
    }

    /// 更新因子系数并记录 UPDATE
    pub fn update(
        &self,
        factor_id: &str,
        new_values: FactorValues,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<Factor> {
        self.update_inner(factor_id, new_values, None, actor, reason)
    }

    /// 乐观并发更新
    ///
    /// # 错误
    /// - `ConcurrentModification`: 当前账本版本 != expected_version
    pub fn update_with_expected_version(
        &self,
        factor_id: &str,
        new_values: FactorValues,
        expected_version: i64,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<Factor> {
        self.update_inner(factor_id, new_values, Some(expected_version), actor, reason)
    }

    #[instrument(skip(self, new_values), fields(factor_id = %factor_id, actor = %actor))]
    fn update_inner(
        &self,
        factor_id: &str,
        new_values: FactorValues,
        expected_version: Option<i64>,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<Factor> {
        let (factor, entry) = run_in_transaction(&self.conn, |tx| {
            let current = FactorRepository::find_by_id_tx(tx, factor_id)?
                .ok_or_else(|| EngineError::not_found("Factor", factor_id))?;
            let new_values = new_values.for_role(current.is_conversion);
            check_values(&new_values, current.is_conversion)?;
            self.check_coefficients(
                &current.emission_type,
                current.entry_type.as_deref(),
                current.is_conversion,
                &new_values,
            )?;

            let mut updated = current.clone();
            updated.values = new_values;
            FactorRepository::update_tx(tx, &updated)?;

            let before = current.snapshot();
            let after = updated.snapshot();
            let entry = self.ledger.record_change_tx(
                tx,
                &ChangeRequest::new(TargetKind::Factor, factor_id, &after, ChangeType::Update, actor)
                    .with_reason(reason)
                    .expecting_version(expected_version)
                    .with_live_state(&before),
            )?;
            Ok((updated, entry))
        })?;

        tracing::info!(version = entry.version, "因子已更新");
        Ok(factor)
    }

    /// 回滚到历史版本的快照，记录 ROLLBACK（新版本）
    ///
    /// # 错误
    /// - `NotFound`: 因子或目标版本不存在
    #[instrument(skip(self), fields(factor_id = %factor_id, to_version = to_version, actor = %actor))]
    pub fn rollback(
        &self,
        factor_id: &str,
        to_version: i64,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<Factor> {
        let (factor, entry) = run_in_transaction(&self.conn, |tx| {
            let current = FactorRepository::find_by_id_tx(tx, factor_id)?
                .ok_or_else(|| EngineError::not_found("Factor", factor_id))?;
            let target = LedgerRepository::find_version_tx(tx, TargetKind::Factor, factor_id, to_version)?
                .ok_or_else(|| {
                    EngineError::not_found("LedgerEntry", &format!("factor:{}@v{}", factor_id, to_version))
                })?;

            let mut restored: Factor = serde_json::from_value(target.snapshot()?)?;
            restored.values = restored.values.for_role(restored.is_conversion);
            if restored.id != factor_id {
                return Err(EngineError::Internal(format!(
                    "账本快照 id={} 与因子 {} 不符",
                    restored.id, factor_id
                )));
            }
            FactorRepository::update_tx(tx, &restored)?;

            let before = current.snapshot();
            let after = restored.snapshot();
            let rollback_reason = reason
                .map(str::to_string)
                .unwrap_or_else(|| format!("rollback to v{}", to_version));
            let entry = self.ledger.record_change_tx(
                tx,
                &ChangeRequest::new(TargetKind::Factor, factor_id, &after, ChangeType::Rollback, actor)
                    .with_reason(Some(&rollback_reason))
                    .with_live_state(&before),
            )?;
            Ok((restored, entry))
        })?;

        tracing::info!(version = entry.version, "因子已回滚");
        Ok(factor)
    }

    /// 主因子须带有其条目类型策略所需的系数；未注册策略的条目类型不校验
    fn check_coefficients(
        &self,
        emission_type: &str,
        entry_type: Option<&str>,
        is_conversion: bool,
        values: &FactorValues,
    ) -> EngineResult<()> {
        let entry_type = match entry_type {
            Some(et) if !is_conversion => et,
            _ => return Ok(()),
        };
        let strategy = match self.registry.get(entry_type) {
            Ok(strategy) => strategy,
            Err(_) => return Ok(()),
        };
        values
            .require(&strategy.required_primary_coefficients(emission_type))
            .map_err(|(field, message)| EngineError::Validation { field, message })
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get(&self, factor_id: &str) -> EngineResult<Factor> {
        self.factor_repo
            .find_by_id(factor_id)?
            .ok_or_else(|| EngineError::not_found("Factor", factor_id))
    }

    pub fn list_for_entry_type(&self, entry_type: &str) -> EngineResult<Vec<Factor>> {
        Ok(self.factor_repo.list_for_entry_type(entry_type)?)
    }

    /// 因子的账本历史
    pub fn history(&self, factor_id: &str) -> EngineResult<Vec<LedgerEntry>> {
        self.ledger.history(TargetKind::Factor, factor_id)
    }

    /// 当前账本版本号
    pub fn current_version(&self, factor_id: &str) -> EngineResult<i64> {
        self.ledger
            .current(TargetKind::Factor, factor_id)?
            .map(|e| e.version)
            .ok_or_else(|| EngineError::not_found("LedgerEntry", &format!("factor:{}", factor_id)))
    }
}

fn check_values(values: &FactorValues, is_conversion: bool) -> EngineResult<()> {
    values
        .check(is_conversion)
        .map_err(|(field, message)| EngineError::Validation { field, message })
}
