// ==========================================
// 排放核算引擎 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键 + busy_timeout）
// - 内嵌 schema，保证测试库 / 内存库 / 正式库结构一致
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 时间戳存储格式（微秒精度，哈希输入与 state_as_of 都依赖它可精确往返）
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// 解析时使用的宽松格式（兼容无小数部分的历史数据）
const TS_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    crate::perf::install_sqlite_tracing(&mut conn);
    Ok(conn)
}

/// 打开内存库并建表（测试 / 试算用）
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// 建表（幂等）
///
/// 红线:
/// - ledger_entry 对同一 target 的 version 唯一
/// - 同一 target 至多一条 is_current = 1（部分唯一索引）
/// - data_entry_emission 对 (data_entry_id, emission_type) 唯一，重算只能原地更新
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS emission_type (
            code TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entry_type (
            name TEXT PRIMARY KEY,
            module_category TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS factor (
            id TEXT PRIMARY KEY,
            emission_type TEXT NOT NULL REFERENCES emission_type(code),
            entry_type TEXT REFERENCES entry_type(name),
            is_conversion INTEGER NOT NULL DEFAULT 0,
            classification TEXT NOT NULL DEFAULT '{}',
            factor_values TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_factor_lookup
            ON factor(entry_type, emission_type, is_conversion);

        CREATE TABLE IF NOT EXISTS data_entry (
            id TEXT PRIMARY KEY,
            entry_type TEXT NOT NULL REFERENCES entry_type(name),
            data TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS data_entry_emission (
            id TEXT PRIMARY KEY,
            data_entry_id TEXT NOT NULL REFERENCES data_entry(id),
            emission_type TEXT NOT NULL REFERENCES emission_type(code),
            primary_factor_id TEXT NOT NULL REFERENCES factor(id),
            conversion_factor_id TEXT REFERENCES factor(id),
            kg_co2eq REAL NOT NULL,
            meta TEXT NOT NULL DEFAULT '{}',
            formula_version TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            UNIQUE (data_entry_id, emission_type)
        );
        CREATE INDEX IF NOT EXISTS idx_dee_primary_factor
            ON data_entry_emission(primary_factor_id);
        CREATE INDEX IF NOT EXISTS idx_dee_conversion_factor
            ON data_entry_emission(conversion_factor_id);

        CREATE TABLE IF NOT EXISTS ledger_entry (
            id TEXT PRIMARY KEY,
            target_kind TEXT NOT NULL,
            target_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0,
            snapshot TEXT NOT NULL,
            diff TEXT,
            change_type TEXT NOT NULL,
            reason TEXT,
            actor TEXT NOT NULL,
            changed_at TEXT NOT NULL,
            previous_hash TEXT,
            current_hash TEXT NOT NULL,
            UNIQUE (target_kind, target_id, version)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_single_current
            ON ledger_entry(target_kind, target_id) WHERE is_current = 1;
        CREATE INDEX IF NOT EXISTS idx_ledger_changed_at
            ON ledger_entry(target_kind, target_id, changed_at);

        CREATE TABLE IF NOT EXISTS ledger_quarantine (
            target_kind TEXT NOT NULL,
            target_id TEXT NOT NULL,
            broken_version INTEGER NOT NULL,
            detected_at TEXT NOT NULL,
            PRIMARY KEY (target_kind, target_id)
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 时间戳格式化（存储 / 哈希统一口径）
pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// 时间戳解析
pub fn parse_ts(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_PARSE_FORMAT).ok()
}

/// 当前 UTC 时间，截断到微秒（保证 format → parse → format 不变）
pub fn now_ts() -> NaiveDateTime {
    let now = chrono::Utc::now().naive_utc();
    parse_ts(&format_ts(&now)).unwrap_or(now)
}
