// ==========================================
// 行映射工具: JSON / 时间戳列解析
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::types::Type;
use serde_json::Value as JsonValue;

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// 解析 JSON 文本列
pub(crate) fn json_col(idx: usize, raw: &str) -> rusqlite::Result<JsonValue> {
    serde_json::from_str(raw).map_err(|e| conversion_error(idx, e))
}

/// 解析可空 JSON 文本列
pub(crate) fn opt_json_col(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<JsonValue>> {
    raw.map(|s| json_col(idx, &s)).transpose()
}

/// 解析时间戳列
pub(crate) fn ts_col(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    crate::db::parse_ts(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("无法解析时间戳: {}", raw).into(),
        )
    })
}

/// JSON 值序列化为存储文本
pub(crate) fn json_text(value: &JsonValue) -> String {
    value.to_string()
}
