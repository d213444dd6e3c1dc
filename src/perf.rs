// ==========================================
// 排放核算引擎 - 运行统计
// ==========================================
// 按表分类统计 SQL（账本 / 结果行 / 其他）并记录慢查询
// 计数为进程级：批量重算的工作线程也计入发起操作的 PerfGuard
// 并发操作的计数会相互叠加，只作观测用途
// ==========================================

use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const ENV_PERF_SQL: &str = "EMISSION_LEDGER_PERF_SQL";
const ENV_SLOW_SQL_MS: &str = "EMISSION_LEDGER_SLOW_SQL_MS";
const SQL_LOG_MAX_CHARS: usize = 240;

static ENABLED: AtomicBool = AtomicBool::new(false);
static SLOW_SQL_MS: AtomicU64 = AtomicU64::new(0);

static LEDGER_SQL: AtomicU64 = AtomicU64::new(0);
static EMISSION_SQL: AtomicU64 = AtomicU64::new(0);
static OTHER_SQL: AtomicU64 = AtomicU64::new(0);
static SLOW_SQL: AtomicU64 = AtomicU64::new(0);

pub(crate) fn is_true(v: &str) -> bool {
    matches!(
        v.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// 语句涉及的表类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlKind {
    Ledger,
    Emission,
    Other,
}

fn classify(sql: &str) -> SqlKind {
    if sql.contains("ledger_entry") || sql.contains("ledger_quarantine") {
        SqlKind::Ledger
    } else if sql.contains("data_entry_emission") {
        SqlKind::Emission
    } else {
        SqlKind::Other
    }
}

fn counter(kind: SqlKind) -> &'static AtomicU64 {
    match kind {
        SqlKind::Ledger => &LEDGER_SQL,
        SqlKind::Emission => &EMISSION_SQL,
        SqlKind::Other => &OTHER_SQL,
    }
}

fn one_line(sql: &str) -> String {
    let flat: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SQL_LOG_MAX_CHARS {
        return flat;
    }
    let head: String = flat.chars().take(SQL_LOG_MAX_CHARS).collect();
    format!("{}…", head)
}

/// 按环境变量挂载 SQL 统计
///
/// - `EMISSION_LEDGER_PERF_SQL`: 开关，未设置时 debug 构建开启
/// - `EMISSION_LEDGER_SLOW_SQL_MS`: 慢查询阈值，默认 debug 50ms / release 200ms
pub fn install_sqlite_tracing(conn: &mut Connection) {
    let enabled = std::env::var(ENV_PERF_SQL)
        .map(|v| is_true(&v))
        .unwrap_or(cfg!(debug_assertions));
    ENABLED.store(enabled, Ordering::Relaxed);

    if !enabled {
        conn.trace(None);
        conn.profile(None);
        return;
    }

    let slow_ms = std::env::var(ENV_SLOW_SQL_MS)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(if cfg!(debug_assertions) { 50 } else { 200 });
    SLOW_SQL_MS.store(slow_ms, Ordering::Relaxed);

    conn.trace(Some(on_statement));
    conn.profile(Some(on_profile));
}

fn on_statement(sql: &str) {
    if ENABLED.load(Ordering::Relaxed) {
        counter(classify(sql)).fetch_add(1, Ordering::Relaxed);
    }
}

fn on_profile(sql: &str, duration: Duration) {
    if !ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let ms = duration.as_millis() as u64;
    let threshold = SLOW_SQL_MS.load(Ordering::Relaxed);
    if threshold > 0 && ms >= threshold {
        SLOW_SQL.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            target: "slow_sql",
            duration_ms = ms,
            kind = ?classify(sql),
            sql = %one_line(sql),
            "慢查询"
        );
    }
}

/// 计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqlCounts {
    pub ledger: u64,
    pub emission: u64,
    pub other: u64,
    pub slow: u64,
}

impl SqlCounts {
    pub fn now() -> Self {
        Self {
            ledger: LEDGER_SQL.load(Ordering::Relaxed),
            emission: EMISSION_SQL.load(Ordering::Relaxed),
            other: OTHER_SQL.load(Ordering::Relaxed),
            slow: SLOW_SQL.load(Ordering::Relaxed),
        }
    }

    pub fn since(&self, start: &SqlCounts) -> SqlCounts {
        SqlCounts {
            ledger: self.ledger.saturating_sub(start.ledger),
            emission: self.emission.saturating_sub(start.emission),
            other: self.other.saturating_sub(start.other),
            slow: self.slow.saturating_sub(start.slow),
        }
    }

    pub fn total(&self) -> u64 {
        self.ledger + self.emission + self.other
    }
}

/// 操作级统计，drop 时输出耗时与各类 SQL 数
pub struct PerfGuard {
    op: &'static str,
    start: Instant,
    counts_at_start: SqlCounts,
}

impl PerfGuard {
    pub fn new(op: &'static str) -> Self {
        Self {
            op,
            start: Instant::now(),
            counts_at_start: SqlCounts::now(),
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.start.elapsed().as_millis() as i64
    }

    /// 自创建以来的 SQL 计数
    pub fn sql_counts(&self) -> SqlCounts {
        SqlCounts::now().since(&self.counts_at_start)
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let counts = self.sql_counts();
        tracing::info!(
            target: "perf",
            op = self.op,
            elapsed_ms = self.elapsed_ms(),
            sql_total = counts.total(),
            ledger_sql = counts.ledger,
            emission_sql = counts.emission,
            slow_sql = counts.slow,
            "done"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_true() {
        assert!(is_true(" YES "));
        assert!(is_true("1"));
        assert!(!is_true("off"));
    }

    #[test]
    fn test_statements_are_classified_by_table() {
        assert_eq!(
            classify("INSERT INTO ledger_entry (id) VALUES (?1)"),
            SqlKind::Ledger
        );
        assert_eq!(
            classify("SELECT version FROM ledger_quarantine WHERE target_id = ?1"),
            SqlKind::Ledger
        );
        assert_eq!(
            classify("UPDATE data_entry_emission SET kg_co2eq = ?1"),
            SqlKind::Emission
        );
        assert_eq!(classify("SELECT * FROM data_entry"), SqlKind::Other);
    }

    #[test]
    fn test_one_line_flattens_and_truncates() {
        assert_eq!(one_line("SELECT 1\n   FROM factor"), "SELECT 1 FROM factor");
        let long = "x".repeat(SQL_LOG_MAX_CHARS + 10);
        assert_eq!(one_line(&long).chars().count(), SQL_LOG_MAX_CHARS + 1);
    }

    #[test]
    fn test_counts_delta() {
        let start = SqlCounts {
            ledger: 2,
            emission: 1,
            other: 5,
            slow: 0,
        };
        let end = SqlCounts {
            ledger: 6,
            emission: 3,
            other: 5,
            slow: 1,
        };
        let delta = end.since(&start);
        assert_eq!(delta.ledger, 4);
        assert_eq!(delta.emission, 2);
        assert_eq!(delta.total(), 6);
        assert_eq!(delta.slow, 1);
    }
}
