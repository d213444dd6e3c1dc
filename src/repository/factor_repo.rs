// ==========================================
// 排放核算引擎 - 排放因子数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 写入只暴露 *_tx 形式，由服务层与账本写入放在同一事务
// ==========================================

use crate::domain::factor::{Factor, FactorValues};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{json_col, json_text};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const FACTOR_COLUMNS: &str =
    "id, emission_type, entry_type, is_conversion, classification, factor_values";

// ==========================================
// FactorRepository - 排放因子仓储
// ==========================================
pub struct FactorRepository {
    conn: Arc<Mutex<Connection>>,
}

impl FactorRepository {
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

    pub fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Factor>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, id)
    }

    /// 查询某条目类型下的全部因子（含通用转换因子）
    pub fn list_for_entry_type(&self, entry_type: &str) -> RepositoryResult<Vec<Factor>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM factor WHERE entry_type = ?1 OR entry_type IS NULL ORDER BY emission_type, id",
            FACTOR_COLUMNS
        ))?;
        let factors = stmt
            .query_map(params![entry_type], map_factor)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(factors)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn find_by_id_tx(conn: &Connection, id: &str) -> RepositoryResult<Option<Factor>> {
        let found = conn
            .query_row(
                &format!("SELECT {} FROM factor WHERE id = ?1", FACTOR_COLUMNS),
                params![id],
                map_factor,
            )
            .optional()?;
        Ok(found)
    }

    /// 查询候选主因子
    ///
    /// # 参数
    /// - `entry_type`: 条目类型 (精确匹配)
    /// - `emission_type`: None 表示不限排放类型
    pub fn find_primary_candidates_tx(
        conn: &Connection,
        entry_type: &str,
        emission_type: Option<&str>,
    ) -> RepositoryResult<Vec<Factor>> {
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}
            FROM factor
            WHERE is_conversion = 0
              AND entry_type = ?1
              AND (?2 IS NULL OR emission_type = ?2)
            ORDER BY emission_type, id
            "#,
            FACTOR_COLUMNS
        ))?;
        let factors = stmt
            .query_map(params![entry_type, emission_type], map_factor)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(factors)
    }

    /// 查询候选转换因子 (entry_type 为空或等于条目类型)
    pub fn find_conversion_candidates_tx(
        conn: &Connection,
        entry_type: &str,
        emission_type: &str,
    ) -> RepositoryResult<Vec<Factor>> {
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}
            FROM factor
            WHERE is_conversion = 1
              AND emission_type = ?2
              AND (entry_type IS NULL OR entry_type = ?1)
            ORDER BY id
            "#,
            FACTOR_COLUMNS
        ))?;
        let factors = stmt
            .query_map(params![entry_type, emission_type], map_factor)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(factors)
    }

    pub fn insert_tx(conn: &Connection, factor: &Factor) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO factor ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                FACTOR_COLUMNS
            ),
            params![
                factor.id,
                factor.emission_type,
                factor.entry_type,
                factor.is_conversion,
                json_text(&factor.classification),
                json_text(&factor.values.to_json()),
            ],
        )?;
        Ok(())
    }

    /// 覆盖当前行（id 不变）
    pub fn update_tx(conn: &Connection, factor: &Factor) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE factor
            SET emission_type = ?2, entry_type = ?3, is_conversion = ?4,
                classification = ?5, factor_values = ?6
            WHERE id = ?1
            "#,
            params![
                factor.id,
                factor.emission_type,
                factor.entry_type,
                factor.is_conversion,
                json_text(&factor.classification),
                json_text(&factor.values.to_json()),
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Factor".to_string(),
                id: factor.id.clone(),
            });
        }
        Ok(())
    }
}

fn map_factor(row: &Row) -> SqliteResult<Factor> {
    let classification: String = row.get(4)?;
    let values_raw: String = row.get(5)?;
    let is_conversion: bool = row.get(3)?;
    let values = FactorValues::decode(json_col(5, &values_raw)?, is_conversion).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Factor {
        id: row.get(0)?,
        emission_type: row.get(1)?,
        entry_type: row.get(2)?,
        is_conversion,
        classification: json_col(4, &classification)?,
        values,
    })
}
