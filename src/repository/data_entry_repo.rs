// ==========================================
// 排放核算引擎 - 数据条目仓储
// ==========================================
// 红线: Repository 不含业务逻辑（载荷校验在策略层）
// ==========================================

use crate::domain::data_entry::DataEntry;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{json_col, json_text};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// DataEntryRepository - 数据条目仓储
// ==========================================
pub struct DataEntryRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DataEntryRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_by_id(&self, id: &str) -> RepositoryResult<Option<DataEntry>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, id)
    }

    pub fn list_by_entry_type(&self, entry_type: &str) -> RepositoryResult<Vec<DataEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, entry_type, data FROM data_entry WHERE entry_type = ?1 ORDER BY id",
        )?;
        let entries = stmt
            .query_map(params![entry_type], map_entry)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(entries)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn find_by_id_tx(conn: &Connection, id: &str) -> RepositoryResult<Option<DataEntry>> {
        let found = conn
            .query_row(
                "SELECT id, entry_type, data FROM data_entry WHERE id = ?1",
                params![id],
                map_entry,
            )
            .optional()?;
        Ok(found)
    }

    pub fn insert_tx(conn: &Connection, entry: &DataEntry) -> RepositoryResult<()> {
        conn.execute(
            "INSERT INTO data_entry (id, entry_type, data) VALUES (?1, ?2, ?3)",
            params![entry.id, entry.entry_type, json_text(&entry.data)],
        )?;
        Ok(())
    }

    pub fn update_tx(conn: &Connection, entry: &DataEntry) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE data_entry SET entry_type = ?2, data = ?3 WHERE id = ?1",
            params![entry.id, entry.entry_type, json_text(&entry.data)],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "DataEntry".to_string(),
                id: entry.id.clone(),
            });
        }
        Ok(())
    }

    /// 删除当前行（调用方须先写入 DELETE 账本记录）
    pub fn delete_tx(conn: &Connection, id: &str) -> RepositoryResult<()> {
        let rows = conn.execute("DELETE FROM data_entry WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "DataEntry".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

fn map_entry(row: &Row) -> SqliteResult<DataEntry> {
    let data: String = row.get(2)?;
    Ok(DataEntry {
        id: row.get(0)?,
        entry_type: row.get(1)?,
        data: json_col(2, &data)?,
    })
}
