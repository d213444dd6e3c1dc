use crate::config::config_manager::{defaults, ConfigManager};
use crate::repository::error::RepositoryResult;
use serde::{Deserialize, Serialize};

/// 引擎启动参数（从 config_kv 加载一次）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub batch_parallelism: usize,
    pub verify_chain_before_write: bool,
    pub equipment_entry_types: Vec<String>,
    pub headcount_entry_types: Vec<String>,
    pub equipment_emission_type: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_parallelism: 1,
            verify_chain_before_write: true,
            equipment_entry_types: to_owned(defaults::EQUIPMENT_ENTRY_TYPES),
            headcount_entry_types: to_owned(defaults::HEADCOUNT_ENTRY_TYPES),
            equipment_emission_type: defaults::EQUIPMENT_EMISSION_TYPE.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(manager: &ConfigManager) -> RepositoryResult<Self> {
        let config = Self {
            batch_parallelism: manager.get_batch_parallelism()?,
            verify_chain_before_write: manager.get_verify_chain_before_write()?,
            equipment_entry_types: manager.get_equipment_entry_types()?,
            headcount_entry_types: manager.get_headcount_entry_types()?,
            equipment_emission_type: manager.get_equipment_emission_type()?,
        };
        tracing::debug!(?config, "引擎配置已加载");
        Ok(config)
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
