use super::{CalculationStrategy, EquipmentStrategy, HeadcountStrategy};
use crate::config::EngineConfig;
use crate::engine::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::sync::Arc;

// ==========================================
// StrategyRegistry - 条目类型 → 策略
// ==========================================
// 启动时注册，运行期只读
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn CalculationStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按配置注册内置策略
    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let mut registry = Self::new();

        let equipment: Arc<dyn CalculationStrategy> =
            Arc::new(EquipmentStrategy::new(&config.equipment_emission_type));
        for entry_type in &config.equipment_entry_types {
            registry.register(entry_type, equipment.clone())?;
        }

        let headcount: Arc<dyn CalculationStrategy> = Arc::new(HeadcountStrategy::new());
        for entry_type in &config.headcount_entry_types {
            registry.register(entry_type, headcount.clone())?;
        }

        tracing::info!(entry_types = ?registry.entry_types(), "计算策略注册完成");
        Ok(registry)
    }

    /// 注册策略
    ///
    /// # 错误
    /// - `DuplicateStrategy`: 该条目类型已有策略
    pub fn register(&mut self, entry_type: &str, strategy: Arc<dyn CalculationStrategy>) -> EngineResult<()> {
        if self.strategies.contains_key(entry_type) {
            return Err(EngineError::DuplicateStrategy {
                entry_type: entry_type.to_string(),
            });
        }
        tracing::debug!(entry_type, strategy = strategy.name(), "注册计算策略");
        self.strategies.insert(entry_type.to_string(), strategy);
        Ok(())
    }

    pub fn get(&self, entry_type: &str) -> EngineResult<Arc<dyn CalculationStrategy>> {
        self.strategies
            .get(entry_type)
            .cloned()
            .ok_or_else(|| EngineError::StrategyNotRegistered {
                entry_type: entry_type.to_string(),
            })
    }

    pub fn contains(&self, entry_type: &str) -> bool {
        self.strategies.contains_key(entry_type)
    }

    /// 已注册的条目类型（排序）
    pub fn entry_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }
}
