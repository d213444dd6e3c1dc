// ==========================================
// 排放核算引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod data_entry;
pub mod emission;
pub mod factor;
pub mod ledger;
pub mod taxonomy;
pub mod types;

// 重导出核心类型
pub use data_entry::DataEntry;
pub use emission::{DataEntryEmission, EmissionResult};
pub use factor::{Factor, FactorValues};
pub use ledger::{ChainVerification, LedgerEntry};
pub use taxonomy::{EmissionType, EntryType};
pub use types::{ChangeType, TargetKind};
