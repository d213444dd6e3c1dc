// ==========================================
// 排放核算引擎 - 引擎层
// ==========================================
// 职责: 实现核算与版本化业务规则
// 红线: Engine 不拼 SQL，数据访问全部经由 Repository
// 红线: 实体写入与账本写入同一事务提交
// ==========================================

pub mod calculation;
pub mod data_entry_service;
pub mod error;
pub mod factor_service;
pub mod ledger;
pub mod locks;
pub mod recalc;
pub mod resolver;
pub mod strategy;
pub(crate) mod transaction;

// 重导出核心引擎
pub use calculation::{CalculationOutcome, EmissionCalculationService, WriteMode, SYSTEM_ACTOR};
pub use data_entry_service::DataEntryService;
pub use error::{EngineError, EngineResult, ErrorSeverity};
pub use factor_service::FactorManagementService;
pub use ledger::{ChangeRequest, VersioningLedger};
pub use locks::{CancellationFlag, KeyedLocks};
pub use recalc::{BatchRecalculationService, ProgressFn, RecalcFailure, RecalcProgress, RecalcReport, BATCH_ACTOR};
pub use strategy::{
    CalculationStrategy, ConversionRequirement, EquipmentStrategy, FactorRequirement,
    HeadcountStrategy, PrimaryScope, ResolvedFactors, StrategyRegistry,
};
