use crate::domain::factor::Factor;
use crate::engine::error::{EngineError, EngineResult};
use serde_json::Value as JsonValue;

/// 读取必填数值字段，要求为非负有限数且不超过 `max`
pub(super) fn bounded_number(data: &JsonValue, field: &str, max: Option<f64>) -> EngineResult<f64> {
    let raw = data
        .get(field)
        .ok_or_else(|| EngineError::validation(field, "缺少必填字段"))?;
    let value = raw
        .as_f64()
        .ok_or_else(|| EngineError::validation(field, format!("必须为数值, 实际={}", raw)))?;

    if !value.is_finite() || value < 0.0 {
        return Err(EngineError::validation(field, format!("必须为非负数, 实际={}", value)));
    }
    if let Some(max) = max {
        if value > max {
            return Err(EngineError::validation(
                field,
                format!("超出范围 [0, {}], 实际={}", max, value),
            ));
        }
    }
    Ok(value)
}

/// 载荷必须是 JSON 对象
pub(super) fn require_object(data: &JsonValue) -> EngineResult<()> {
    if data.is_object() {
        Ok(())
    } else {
        Err(EngineError::validation("data", "载荷必须为 JSON 对象"))
    }
}

/// 读取因子系数
pub(super) fn coefficient(factor: &Factor, field: &str) -> EngineResult<f64> {
    match factor.values.number(field) {
        Some(v) if v.is_finite() && v >= 0.0 => Ok(v),
        Some(v) => Err(EngineError::InvalidFactorValues {
            factor_id: factor.id.clone(),
            field: field.to_string(),
            message: format!("系数必须为非负有限数, 实际={}", v),
        }),
        None => Err(EngineError::InvalidFactorValues {
            factor_id: factor.id.clone(),
            field: field.to_string(),
            message: "缺少系数".to_string(),
        }),
    }
}
