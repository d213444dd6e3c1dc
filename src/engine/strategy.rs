// ==========================================
// 排放核算引擎 - 计算策略
// ==========================================
// 红线: 策略是 (条目状态, 因子状态) 的纯函数，不读时钟、不访问存储
// 红线: 新增条目类型只需实现 CalculationStrategy 并注册，不做 if entry_type == X 分支
// ==========================================

mod equipment;
mod headcount;
mod payload;
mod registry;

pub use equipment::{EquipmentStrategy, EQUIPMENT_FORMULA_VERSION};
pub use headcount::{HeadcountStrategy, HEADCOUNT_FORMULA_VERSION};
pub use registry::StrategyRegistry;

use crate::domain::data_entry::DataEntry;
use crate::domain::emission::EmissionResult;
use crate::domain::factor::Factor;
use crate::engine::error::EngineResult;
use serde_json::Value as JsonValue;

// ==========================================
// FactorRequirement - 策略声明的因子需求
// ==========================================

/// 主因子的解析范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryScope {
    /// 固定排放类型，恰好一个主因子
    Single { emission_type: String },
    /// 条目类型下每个排放类型各取一个
    PerEmissionType,
}

/// 转换因子需求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequirement {
    pub emission_type: String,
    /// 找不到因子时随错误报告的条目分类键
    pub classification_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorRequirement {
    pub primary: PrimaryScope,
    pub primary_classification_keys: Vec<String>,
    pub conversion: Option<ConversionRequirement>,
}

/// 已解析的因子
#[derive(Debug, Clone, Default)]
pub struct ResolvedFactors {
    pub primary: Vec<Factor>,
    pub conversion: Option<Factor>,
}

// ==========================================
// CalculationStrategy - 计算策略接口
// ==========================================
pub trait CalculationStrategy: Send + Sync {
    /// 策略名称（日志用）
    fn name(&self) -> &str;

    /// 写入结果行的计算口径版本
    fn formula_version(&self) -> &str;

    fn factor_requirement(&self) -> FactorRequirement;

    /// 该策略使用的主因子必须携带的系数字段（因子写入时校验）
    fn required_primary_coefficients(&self, emission_type: &str) -> Vec<&'static str>;

    /// 条目载荷边界校验
    ///
    /// # 错误
    /// - `EngineError::Validation`: 带字段名
    fn validate(&self, data: &JsonValue) -> EngineResult<()>;

    /// 计算排放结果（每个排放类型至多一条）
    fn calculate(&self, entry: &DataEntry, factors: &ResolvedFactors) -> EngineResult<Vec<EmissionResult>>;
}
