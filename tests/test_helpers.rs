// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、参考分类种子数据、常用因子构造
// ==========================================
#![allow(dead_code)]

use emission_ledger::config::EngineConfig;
use emission_ledger::db::{init_schema, open_sqlite_connection};
use emission_ledger::domain::{EmissionType, EntryType, Factor, FactorValues};
use emission_ledger::logging;
use emission_ledger::AppState;
use serde_json::{json, Value as JsonValue};
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

pub const ACTOR: &str = "alice@example.org";

/// 人员类排放类型及每 FTE 系数
pub const HEADCOUNT_FACTORS: [(&str, f64); 4] = [
    ("food", 320.0),
    ("waste", 45.0),
    ("commute", 180.0),
    ("grey_energy", 95.0),
];

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是 UTF-8")?
        .to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 建库 + 种子分类 + 默认配置的 AppState
pub fn setup_state() -> (NamedTempFile, AppState) {
    setup_state_with(EngineConfig::default())
}

pub fn setup_state_with(config: EngineConfig) -> (NamedTempFile, AppState) {
    logging::init_test();
    let (temp_file, db_path) = create_test_db().expect("创建测试数据库失败");
    let conn = open_sqlite_connection(&db_path).expect("打开数据库失败");
    let state = AppState::with_config(db_path, Arc::new(Mutex::new(conn)), config)
        .expect("初始化 AppState 失败");
    seed_taxonomy(&state);
    (temp_file, state)
}

pub fn seed_taxonomy(state: &AppState) {
    let repo = &state.taxonomy_repo;
    repo.insert_emission_type(&EmissionType::new("equipment", "Equipment"))
        .unwrap();
    for (code, _) in HEADCOUNT_FACTORS {
        repo.insert_emission_type(&EmissionType::new(code, code)).unwrap();
    }
    for (name, category) in [
        ("scientific-equipment", "equipment"),
        ("it-equipment", "equipment"),
        ("member", "headcount"),
        ("student", "headcount"),
        ("travel", "travel"),
    ] {
        repo.insert_entry_type(&EntryType::new(name, category)).unwrap();
    }
}

// ==========================================
// 因子构造
// ==========================================

pub fn power_factor(state: &AppState, entry_type: &str, active_w: f64, standby_w: f64, classification: JsonValue) -> Factor {
    state
        .factor_service
        .create(
            "equipment",
            Some(entry_type),
            false,
            FactorValues::equipment_power(active_w, standby_w),
            classification,
            ACTOR,
            Some("seed"),
        )
        .unwrap()
}

pub fn energy_mix_factor(state: &AppState, kg_per_kwh: f64, classification: JsonValue) -> Factor {
    state
        .factor_service
        .create(
            "equipment",
            None,
            true,
            FactorValues::energy_mix(kg_per_kwh),
            classification,
            ACTOR,
            Some("seed"),
        )
        .unwrap()
}

pub fn fte_factor(state: &AppState, entry_type: &str, emission_type: &str, per_fte: f64) -> Factor {
    state
        .factor_service
        .create(
            emission_type,
            Some(entry_type),
            false,
            FactorValues::per_fte(per_fte),
            json!({}),
            ACTOR,
            Some("seed"),
        )
        .unwrap()
}

/// 为某人员条目类型创建四个排放类型的因子
pub fn seed_headcount_factors(state: &AppState, entry_type: &str) -> Vec<Factor> {
    HEADCOUNT_FACTORS
        .iter()
        .map(|(code, per_fte)| fte_factor(state, entry_type, code, *per_fte))
        .collect()
}

/// 参考设备场景: 1300 W / 130 W 功率因子 + 0.012 kg/kWh 电网因子
pub fn seed_equipment_factors(state: &AppState) -> (Factor, Factor) {
    let power = power_factor(state, "scientific-equipment", 1300.0, 130.0, json!({}));
    let mix = energy_mix_factor(state, 0.012, json!({}));
    (power, mix)
}

pub fn equipment_payload(active_h: f64, standby_h: f64) -> JsonValue {
    json!({
        "active_hours_per_week": active_h,
        "standby_hours_per_week": standby_h,
    })
}

/// 直接执行 SQL（模拟存储层篡改 / 绕过服务的改动）
pub fn exec_sql(state: &AppState, sql: &str, params: &[&dyn rusqlite::ToSql]) -> usize {
    let conn = state.conn.lock().unwrap();
    conn.execute(sql, params).unwrap()
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}
