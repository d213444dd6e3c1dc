use super::core::LedgerRepository;
use crate::db::format_ts;
use crate::domain::ledger::LedgerEntry;
use crate::domain::types::{ChangeType, TargetKind};
use crate::repository::error::RepositoryResult;
use crate::repository::row_utils::{opt_json_col, ts_col};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};

const LEDGER_COLUMNS: &str = "id, target_kind, target_id, version, is_current, \
     snapshot, diff, change_type, reason, actor, changed_at, previous_hash, current_hash";

impl LedgerRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 当前版本记录
    pub fn find_current(&self, target_kind: TargetKind, target_id: &str) -> RepositoryResult<Option<LedgerEntry>> {
        let conn = self.get_conn()?;
        Self::find_current_tx(&conn, target_kind, target_id)
    }

    /// 全部历史（按版本升序）
    pub fn history(&self, target_kind: TargetKind, target_id: &str) -> RepositoryResult<Vec<LedgerEntry>> {
        let conn = self.get_conn()?;
        Self::history_tx(&conn, target_kind, target_id)
    }

    pub fn find_version(
        &self,
        target_kind: TargetKind,
        target_id: &str,
        version: i64,
    ) -> RepositoryResult<Option<LedgerEntry>> {
        let conn = self.get_conn()?;
        Self::find_version_tx(&conn, target_kind, target_id, version)
    }

    /// 时间点之前（含）的最新记录
    pub fn find_as_of(
        &self,
        target_kind: TargetKind,
        target_id: &str,
        at: &NaiveDateTime,
    ) -> RepositoryResult<Option<LedgerEntry>> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row(
                &format!(
                    r#"
                    SELECT {}
                    FROM ledger_entry
                    WHERE target_kind = ?1 AND target_id = ?2 AND changed_at <= ?3
                    ORDER BY version DESC
                    LIMIT 1
                    "#,
                    LEDGER_COLUMNS
                ),
                params![target_kind.to_db_str(), target_id, format_ts(at)],
                map_entry,
            )
            .optional()?;
        Ok(found)
    }

    /// 查询隔离状态
    pub fn find_quarantine(&self, target_kind: TargetKind, target_id: &str) -> RepositoryResult<Option<i64>> {
        let conn = self.get_conn()?;
        Self::find_quarantine_tx(&conn, target_kind, target_id)
    }

    /// 按操作人查询（审计用）
    pub fn find_by_actor(&self, actor: &str, limit: i64) -> RepositoryResult<Vec<LedgerEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}
            FROM ledger_entry
            WHERE actor = ?1
            ORDER BY changed_at DESC, version DESC
            LIMIT ?2
            "#,
            LEDGER_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![actor, limit], map_entry)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(entries)
    }

    // ==========================================
    // 事务内查询
    // ==========================================

    pub fn find_current_tx(
        conn: &Connection,
        target_kind: TargetKind,
        target_id: &str,
    ) -> RepositoryResult<Option<LedgerEntry>> {
        let found = conn
            .query_row(
                &format!(
                    "SELECT {} FROM ledger_entry WHERE target_kind = ?1 AND target_id = ?2 AND is_current = 1",
                    LEDGER_COLUMNS
                ),
                params![target_kind.to_db_str(), target_id],
                map_entry,
            )
            .optional()?;
        Ok(found)
    }

    pub fn history_tx(
        conn: &Connection,
        target_kind: TargetKind,
        target_id: &str,
    ) -> RepositoryResult<Vec<LedgerEntry>> {
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}
            FROM ledger_entry
            WHERE target_kind = ?1 AND target_id = ?2
            ORDER BY version ASC
            "#,
            LEDGER_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![target_kind.to_db_str(), target_id], map_entry)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn find_version_tx(
        conn: &Connection,
        target_kind: TargetKind,
        target_id: &str,
        version: i64,
    ) -> RepositoryResult<Option<LedgerEntry>> {
        let found = conn
            .query_row(
                &format!(
                    "SELECT {} FROM ledger_entry WHERE target_kind = ?1 AND target_id = ?2 AND version = ?3",
                    LEDGER_COLUMNS
                ),
                params![target_kind.to_db_str(), target_id, version],
                map_entry,
            )
            .optional()?;
        Ok(found)
    }

    pub fn find_quarantine_tx(
        conn: &Connection,
        target_kind: TargetKind,
        target_id: &str,
    ) -> RepositoryResult<Option<i64>> {
        let found = conn
            .query_row(
                "SELECT broken_version FROM ledger_quarantine WHERE target_kind = ?1 AND target_id = ?2",
                params![target_kind.to_db_str(), target_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found)
    }
}

fn map_entry(row: &Row) -> SqliteResult<LedgerEntry> {
    let kind_raw: String = row.get(1)?;
    let target_kind = TargetKind::from_db_str(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("未知 target_kind: {}", kind_raw).into(),
        )
    })?;

    let change_raw: String = row.get(7)?;
    let change_type = ChangeType::from_db_str(&change_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("未知 change_type: {}", change_raw).into(),
        )
    })?;

    let changed_at: String = row.get(10)?;

    Ok(LedgerEntry {
        id: row.get(0)?,
        target_kind,
        target_id: row.get(2)?,
        version: row.get(3)?,
        is_current: row.get(4)?,
        snapshot_raw: row.get(5)?,
        diff: opt_json_col(6, row.get(6)?)?,
        change_type,
        reason: row.get(8)?,
        actor: row.get(9)?,
        changed_at: ts_col(10, &changed_at)?,
        previous_hash: row.get(11)?,
        current_hash: row.get(12)?,
    })
}
