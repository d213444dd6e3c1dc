use crate::db::format_ts;
use crate::domain::ledger::LedgerEntry;
use crate::domain::types::TargetKind;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// LedgerRepository - 版本账本仓储
// ==========================================
// 红线: Repository 不做哈希计算，只做数据映射
pub struct LedgerRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作（事务内）
    // ==========================================

    /// 插入账本记录
    ///
    /// # 错误
    /// - `RepositoryError::VersionConflict`: 同一 target 的 version 或 is_current 冲突（并发写入）
    pub fn insert_tx(conn: &Connection, entry: &LedgerEntry) -> RepositoryResult<()> {
        let result = conn.execute(
            r#"
            INSERT INTO ledger_entry (
                id, target_kind, target_id, version, is_current,
                snapshot, diff, change_type, reason, actor,
                changed_at, previous_hash, current_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                entry.id,
                entry.target_kind.to_db_str(),
                entry.target_id,
                entry.version,
                entry.is_current,
                entry.snapshot_raw,
                entry.diff.as_ref().map(|d| d.to_string()),
                entry.change_type.to_db_str(),
                entry.reason,
                entry.actor,
                format_ts(&entry.changed_at),
                entry.previous_hash,
                entry.current_hash,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) => match RepositoryError::from(e) {
                RepositoryError::UniqueConstraintViolation(msg) => {
                    Err(RepositoryError::VersionConflict {
                        message: format!(
                            "{}:{} version={} ({})",
                            entry.target_kind, entry.target_id, entry.version, msg
                        ),
                    })
                }
                other => Err(other),
            },
        }
    }

    /// 将当前记录标记为历史
    ///
    /// # 返回
    /// - 受影响行数；0 表示该记录已不是当前版本（被并发写入抢先）
    pub fn supersede_tx(conn: &Connection, entry_id: &str) -> RepositoryResult<usize> {
        let rows = conn.execute(
            "UPDATE ledger_entry SET is_current = 0 WHERE id = ?1 AND is_current = 1",
            params![entry_id],
        )?;
        Ok(rows)
    }

    // ==========================================
    // 完整性隔离
    // ==========================================

    /// 登记断链 target（保留最早的断链版本）
    pub fn quarantine_tx(
        conn: &Connection,
        target_kind: TargetKind,
        target_id: &str,
        broken_version: i64,
        detected_at: &NaiveDateTime,
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO ledger_quarantine (target_kind, target_id, broken_version, detected_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(target_kind, target_id) DO UPDATE SET
                broken_version = MIN(broken_version, excluded.broken_version)
            "#,
            params![
                target_kind.to_db_str(),
                target_id,
                broken_version,
                format_ts(detected_at)
            ],
        )?;
        Ok(())
    }

    /// 解除隔离
    pub fn release_quarantine_tx(
        conn: &Connection,
        target_kind: TargetKind,
        target_id: &str,
    ) -> RepositoryResult<usize> {
        let rows = conn.execute(
            "DELETE FROM ledger_quarantine WHERE target_kind = ?1 AND target_id = ?2",
            params![target_kind.to_db_str(), target_id],
        )?;
        Ok(rows)
    }
}
