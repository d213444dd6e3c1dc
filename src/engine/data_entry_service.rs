// ==========================================
// 排放核算引擎 - 数据条目服务
// ==========================================
// 红线: 载荷在入库前由对应策略校验，非法数据不落库
// 红线: 删除条目时先为其结果行记录 DELETE，再删除实体，历史只留在账本
// ==========================================

use crate::domain::data_entry::DataEntry;
use crate::domain::emission::DataEntryEmission;
use crate::domain::types::{ChangeType, TargetKind};
use crate::engine::calculation::{delete_emission_row_tx, EmissionCalculationService, WriteMode};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::{ChangeRequest, VersioningLedger};
use crate::engine::locks::KeyedLocks;
use crate::engine::strategy::StrategyRegistry;
use crate::engine::transaction::run_in_transaction;
use crate::repository::{DataEntryRepository, EmissionRepository, TaxonomyRepository};
use rusqlite::Connection;
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use tracing::instrument;

pub struct DataEntryService {
    conn: Arc<Mutex<Connection>>,
    data_entry_repo: Arc<DataEntryRepository>,
    registry: Arc<StrategyRegistry>,
    ledger: Arc<VersioningLedger>,
    calculator: Arc<EmissionCalculationService>,
    entry_locks: Arc<KeyedLocks>,
}

impl DataEntryService {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        data_entry_repo: Arc<DataEntryRepository>,
        registry: Arc<StrategyRegistry>,
        ledger: Arc<VersioningLedger>,
        calculator: Arc<EmissionCalculationService>,
        entry_locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            conn,
            data_entry_repo,
            registry,
            ledger,
            calculator,
            entry_locks,
        }
    }

    /// 新建条目并记录 CREATE
    ///
    /// # 错误
    /// - `StrategyNotRegistered`: 条目类型无对应策略
    /// - `Validation`: 载荷不合法（带字段名）
    #[instrument(skip(self, data), fields(entry_type = %entry_type, actor = %actor))]
    pub fn create(
        &self,
        entry_type: &str,
        data: JsonValue,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<DataEntry> {
        self.validate(entry_type, &data)?;
        let entry = DataEntry::new(entry_type, data);

        run_in_transaction(&self.conn, |tx| self.insert_tx(tx, &entry, actor, reason))?;

        tracing::info!(data_entry_id = %entry.id, "数据条目已创建");
        Ok(entry)
    }

    /// 新建条目并立即计算（同一事务）
    #[instrument(skip(self, data), fields(entry_type = %entry_type, actor = %actor))]
    pub fn create_and_calculate(
        &self,
        entry_type: &str,
        data: JsonValue,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<(DataEntry, Vec<DataEntryEmission>)> {
        self.validate(entry_type, &data)?;
        let entry = DataEntry::new(entry_type, data);

        let _entry_guard = self.entry_locks.acquire(&entry.id);
        let outcome = run_in_transaction(&self.conn, |tx| {
            self.insert_tx(tx, &entry, actor, reason)?;
            self.calculator
                .calculate_tx(tx, &entry.id, actor, reason, &WriteMode::Always)
        })?;

        tracing::info!(
            data_entry_id = %entry.id,
            rows = outcome.rows.len(),
            "数据条目已创建并完成计算"
        );
        Ok((entry, outcome.rows))
    }

    /// 更新条目载荷并记录 UPDATE（不自动重算）
    #[instrument(skip(self, data), fields(data_entry_id = %data_entry_id, actor = %actor))]
    pub fn update(
        &self,
        data_entry_id: &str,
        data: JsonValue,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<DataEntry> {
        let _entry_guard = self.entry_locks.acquire(data_entry_id);
        let updated = run_in_transaction(&self.conn, |tx| {
            let current = DataEntryRepository::find_by_id_tx(tx, data_entry_id)?
                .ok_or_else(|| EngineError::not_found("DataEntry", data_entry_id))?;
            self.validate(&current.entry_type, &data)?;

            let updated = DataEntry {
                data,
                ..current.clone()
            };
            DataEntryRepository::update_tx(tx, &updated)?;

            let before = current.snapshot();
            let after = updated.snapshot();
            self.ledger.record_change_tx(
                tx,
                &ChangeRequest::new(TargetKind::DataEntry, data_entry_id, &after, ChangeType::Update, actor)
                    .with_reason(reason)
                    .with_live_state(&before),
            )?;
            Ok(updated)
        })?;

        tracing::info!("数据条目已更新");
        Ok(updated)
    }

    /// 删除条目及其结果行，逐一记录 DELETE
    #[instrument(skip(self), fields(data_entry_id = %data_entry_id, actor = %actor))]
    pub fn delete(&self, data_entry_id: &str, actor: &str, reason: Option<&str>) -> EngineResult<()> {
        let _entry_guard = self.entry_locks.acquire(data_entry_id);
        let removed_rows = run_in_transaction(&self.conn, |tx| {
            let current = DataEntryRepository::find_by_id_tx(tx, data_entry_id)?
                .ok_or_else(|| EngineError::not_found("DataEntry", data_entry_id))?;

            let rows = EmissionRepository::find_by_data_entry_tx(tx, data_entry_id)?;
            for row in &rows {
                delete_emission_row_tx(&self.ledger, tx, row, actor, reason)?;
            }

            let snapshot = current.snapshot();
            self.ledger.record_change_tx(
                tx,
                &ChangeRequest::new(TargetKind::DataEntry, data_entry_id, &snapshot, ChangeType::Delete, actor)
                    .with_reason(reason)
                    .with_live_state(&snapshot),
            )?;
            DataEntryRepository::delete_tx(tx, data_entry_id)?;
            Ok(rows.len())
        })?;

        tracing::info!(removed_rows, "数据条目已删除");
        Ok(())
    }

    pub fn get(&self, data_entry_id: &str) -> EngineResult<DataEntry> {
        self.data_entry_repo
            .find_by_id(data_entry_id)?
            .ok_or_else(|| EngineError::not_found("DataEntry", data_entry_id))
    }

    pub fn list_by_entry_type(&self, entry_type: &str) -> EngineResult<Vec<DataEntry>> {
        Ok(self.data_entry_repo.list_by_entry_type(entry_type)?)
    }

    // ==========================================
    // 内部
    // ==========================================

    fn validate(&self, entry_type: &str, data: &JsonValue) -> EngineResult<()> {
        let strategy = self.registry.get(entry_type)?;
        strategy.validate(data)
    }

    fn insert_tx(&self, conn: &Connection, entry: &DataEntry, actor: &str, reason: Option<&str>) -> EngineResult<()> {
        if !TaxonomyRepository::entry_type_exists_tx(conn, &entry.entry_type)? {
            return Err(EngineError::validation(
                "entry_type",
                format!("未知条目类型: {}", entry.entry_type),
            ));
        }
        DataEntryRepository::insert_tx(conn, entry)?;
        let snapshot = entry.snapshot();
        self.ledger.record_change_tx(
            conn,
            &ChangeRequest::new(TargetKind::DataEntry, &entry.id, &snapshot, ChangeType::Create, actor)
                .with_reason(reason),
        )?;
        Ok(())
    }
}
