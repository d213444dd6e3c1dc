// ==========================================
// 排放核算引擎 - 排放结果仓储
// ==========================================
// 红线: (data_entry_id, emission_type) 唯一，重算只做原地更新
// ==========================================

use crate::db::format_ts;
use crate::domain::emission::DataEntryEmission;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{json_col, json_text, ts_col};
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const EMISSION_COLUMNS: &str = "id, data_entry_id, emission_type, primary_factor_id, \
     conversion_factor_id, kg_co2eq, meta, formula_version, computed_at";

// ==========================================
// EmissionRepository - 排放结果仓储
// ==========================================
pub struct EmissionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EmissionRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_data_entry(&self, data_entry_id: &str) -> RepositoryResult<Vec<DataEntryEmission>> {
        let conn = self.get_conn()?;
        Self::find_by_data_entry_tx(&conn, data_entry_id)
    }

    /// 以主因子引用查询受影响的数据条目ID
    pub fn find_data_entry_ids_by_primary_factor(&self, factor_id: &str) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT data_entry_id
            FROM data_entry_emission
            WHERE primary_factor_id = ?1
            ORDER BY data_entry_id
            "#,
        )?;
        let ids = stmt
            .query_map(params![factor_id], |row| row.get(0))?
            .collect::<SqliteResult<Vec<String>>>()?;
        Ok(ids)
    }

    /// 以转换因子引用查询受影响的数据条目ID
    ///
    /// 说明: 电网排放强度等转换因子的影响面通常远大于主因子，单独查询
    pub fn find_data_entry_ids_by_conversion_factor(&self, factor_id: &str) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT data_entry_id
            FROM data_entry_emission
            WHERE conversion_factor_id = ?1
            ORDER BY data_entry_id
            "#,
        )?;
        let ids = stmt
            .query_map(params![factor_id], |row| row.get(0))?
            .collect::<SqliteResult<Vec<String>>>()?;
        Ok(ids)
    }

    /// 查询引用指定因子的全部结果行
    pub fn find_by_factor(&self, factor_id: &str) -> RepositoryResult<Vec<DataEntryEmission>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}
            FROM data_entry_emission
            WHERE primary_factor_id = ?1 OR conversion_factor_id = ?1
            ORDER BY data_entry_id, emission_type
            "#,
            EMISSION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![factor_id], map_emission)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn find_by_data_entry_tx(
        conn: &Connection,
        data_entry_id: &str,
    ) -> RepositoryResult<Vec<DataEntryEmission>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM data_entry_emission WHERE data_entry_id = ?1 ORDER BY emission_type",
            EMISSION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![data_entry_id], map_emission)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn insert_tx(conn: &Connection, row: &DataEntryEmission) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO data_entry_emission ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                EMISSION_COLUMNS
            ),
            params![
                row.id,
                row.data_entry_id,
                row.emission_type,
                row.primary_factor_id,
                row.conversion_factor_id,
                row.kg_co2eq,
                json_text(&row.meta),
                row.formula_version,
                format_ts(&row.computed_at),
            ],
        )?;
        Ok(())
    }

    pub fn update_tx(conn: &Connection, row: &DataEntryEmission) -> RepositoryResult<()> {
        let affected = conn.execute(
            r#"
            UPDATE data_entry_emission
            SET primary_factor_id = ?2, conversion_factor_id = ?3, kg_co2eq = ?4,
                meta = ?5, formula_version = ?6, computed_at = ?7
            WHERE id = ?1
            "#,
            params![
                row.id,
                row.primary_factor_id,
                row.conversion_factor_id,
                row.kg_co2eq,
                json_text(&row.meta),
                row.formula_version,
                format_ts(&row.computed_at),
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "DataEntryEmission".to_string(),
                id: row.id.clone(),
            });
        }
        Ok(())
    }

    pub fn delete_tx(conn: &Connection, id: &str) -> RepositoryResult<()> {
        conn.execute("DELETE FROM data_entry_emission WHERE id = ?1", params![id])?;
        Ok(())
    }
}

fn map_emission(row: &Row) -> SqliteResult<DataEntryEmission> {
    let meta: String = row.get(6)?;
    let computed_at: String = row.get(8)?;
    Ok(DataEntryEmission {
        id: row.get(0)?,
        data_entry_id: row.get(1)?,
        emission_type: row.get(2)?,
        primary_factor_id: row.get(3)?,
        conversion_factor_id: row.get(4)?,
        kg_co2eq: row.get(5)?,
        meta: json_col(6, &meta)?,
        formula_version: row.get(7)?,
        computed_at: ts_col(8, &computed_at)?,
    })
}
