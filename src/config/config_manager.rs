// ==========================================
// 排放核算引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::db::open_sqlite_connection;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(key, value, "配置已更新");
        Ok(())
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> RepositoryResult<String> {
        Ok(self
            .get_global_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// 获取所有 global 配置的快照（JSON，按 key 排序）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    // ===== 批量重算配置 =====

    /// 批量重算工作线程数（默认 1，至少为 1）
    pub fn get_batch_parallelism(&self) -> RepositoryResult<usize> {
        let value = self.get_config_or_default(config_keys::BATCH_PARALLELISM, "1")?;
        let parsed = value.trim().parse::<usize>().unwrap_or_else(|_| {
            tracing::warn!(
                config_key = config_keys::BATCH_PARALLELISM,
                raw_value = %value,
                "并行度配置格式错误，使用默认值 1"
            );
            1
        });
        Ok(parsed.max(1))
    }

    // ===== 账本配置 =====

    /// 写入前是否校验链头（默认开启）
    pub fn get_verify_chain_before_write(&self) -> RepositoryResult<bool> {
        Ok(self
            .get_global_config_value(config_keys::VERIFY_CHAIN_BEFORE_WRITE)?
            .map_or(true, |v| crate::perf::is_true(&v)))
    }

    // ===== 策略注册配置 =====

    pub fn get_equipment_entry_types(&self) -> RepositoryResult<Vec<String>> {
        self.get_list_or_default(config_keys::EQUIPMENT_ENTRY_TYPES, defaults::EQUIPMENT_ENTRY_TYPES)
    }

    pub fn get_headcount_entry_types(&self) -> RepositoryResult<Vec<String>> {
        self.get_list_or_default(config_keys::HEADCOUNT_ENTRY_TYPES, defaults::HEADCOUNT_ENTRY_TYPES)
    }

    pub fn get_equipment_emission_type(&self) -> RepositoryResult<String> {
        let value = self.get_config_or_default(
            config_keys::EQUIPMENT_EMISSION_TYPE,
            defaults::EQUIPMENT_EMISSION_TYPE,
        )?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(defaults::EQUIPMENT_EMISSION_TYPE.to_string());
        }
        Ok(trimmed.to_string())
    }

    /// 逗号分隔列表；去空白、去空项
    fn get_list_or_default(&self, key: &str, default: &[&str]) -> RepositoryResult<Vec<String>> {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default.iter().map(|s| s.to_string()).collect());
        };
        Ok(split_list(&raw))
    }
}

pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    pub const BATCH_PARALLELISM: &str = "batch_parallelism";
    pub const VERIFY_CHAIN_BEFORE_WRITE: &str = "verify_chain_before_write";
    pub const EQUIPMENT_ENTRY_TYPES: &str = "equipment_entry_types";
    pub const HEADCOUNT_ENTRY_TYPES: &str = "headcount_entry_types";
    pub const EQUIPMENT_EMISSION_TYPE: &str = "equipment_emission_type";
}

pub(crate) mod defaults {
    pub const EQUIPMENT_ENTRY_TYPES: &[&str] = &["scientific-equipment", "it-equipment"];
    pub const HEADCOUNT_ENTRY_TYPES: &[&str] = &["member", "student"];
    pub const EQUIPMENT_EMISSION_TYPE: &str = "equipment";
}
