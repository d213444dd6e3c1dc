// ==========================================
// 排放核算引擎 - 参考分类数据仓储
// ==========================================
// 红线: 只有新增与查询，无更新接口（被引用后不可修改）
// 删除被引用的分类由外键约束拒绝
// ==========================================

use crate::domain::taxonomy::{EmissionType, EntryType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::ts_col;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// TaxonomyRepository - 排放类型 / 条目类型仓储
// ==========================================
pub struct TaxonomyRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TaxonomyRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 排放类型
    // ==========================================

    /// 新增排放类型
    pub fn insert_emission_type(&self, item: &EmissionType) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO emission_type (code, label, created_at) VALUES (?1, ?2, ?3)",
            params![item.code, item.label, crate::db::format_ts(&item.created_at)],
        )?;
        Ok(())
    }

    pub fn find_emission_type(&self, code: &str) -> RepositoryResult<Option<EmissionType>> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row(
                "SELECT code, label, created_at FROM emission_type WHERE code = ?1",
                params![code],
                map_emission_type,
            )
            .optional()?;
        Ok(found)
    }

    pub fn list_emission_types(&self) -> RepositoryResult<Vec<EmissionType>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT code, label, created_at FROM emission_type ORDER BY code")?;
        let items = stmt
            .query_map([], map_emission_type)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(items)
    }

    /// 删除排放类型（被因子/结果引用时由外键拒绝）
    pub fn delete_emission_type(&self, code: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute("DELETE FROM emission_type WHERE code = ?1", params![code])?;
        Ok(rows)
    }

    // ==========================================
    // 条目类型
    // ==========================================

    pub fn insert_entry_type(&self, item: &EntryType) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO entry_type (name, module_category, created_at) VALUES (?1, ?2, ?3)",
            params![
                item.name,
                item.module_category,
                crate::db::format_ts(&item.created_at)
            ],
        )?;
        Ok(())
    }

    pub fn find_entry_type(&self, name: &str) -> RepositoryResult<Option<EntryType>> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row(
                "SELECT name, module_category, created_at FROM entry_type WHERE name = ?1",
                params![name],
                map_entry_type,
            )
            .optional()?;
        Ok(found)
    }

    /// 按模块查询条目类型
    pub fn list_entry_types(&self, module_category: Option<&str>) -> RepositoryResult<Vec<EntryType>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT name, module_category, created_at
            FROM entry_type
            WHERE (?1 IS NULL OR module_category = ?1)
            ORDER BY name
            "#,
        )?;
        let items = stmt
            .query_map(params![module_category], map_entry_type)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(items)
    }

    pub fn delete_entry_type(&self, name: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute("DELETE FROM entry_type WHERE name = ?1", params![name])?;
        Ok(rows)
    }

    // ==========================================
    // 事务内存在性检查
    // ==========================================

    pub fn emission_type_exists_tx(conn: &Connection, code: &str) -> RepositoryResult<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM emission_type WHERE code = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn entry_type_exists_tx(conn: &Connection, name: &str) -> RepositoryResult<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM entry_type WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn map_emission_type(row: &Row) -> SqliteResult<EmissionType> {
    let created_at: String = row.get(2)?;
    Ok(EmissionType {
        code: row.get(0)?,
        label: row.get(1)?,
        created_at: ts_col(2, &created_at)?,
    })
}

fn map_entry_type(row: &Row) -> SqliteResult<EntryType> {
    let created_at: String = row.get(2)?;
    Ok(EntryType {
        name: row.get(0)?,
        module_category: row.get(1)?,
        created_at: ts_col(2, &created_at)?,
    })
}
