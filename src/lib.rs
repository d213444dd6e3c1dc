// ==========================================
// 排放核算引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 排放计算 + 排放因子版本化（追加式哈希链账本）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// SQL 计数与慢查询日志
pub mod perf;

// 应用层 - 服务装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ChangeType, TargetKind};

// 领域实体
pub use domain::{
    ChainVerification, DataEntry, DataEntryEmission, EmissionResult, EmissionType, EntryType,
    Factor, FactorValues, LedgerEntry,
};

// 引擎
pub use engine::{
    BatchRecalculationService, CalculationStrategy, CancellationFlag, DataEntryService,
    EmissionCalculationService, EngineError, EngineResult, FactorManagementService,
    RecalcReport, StrategyRegistry, VersioningLedger,
};

// 应用
pub use app::AppState;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "排放核算引擎";
