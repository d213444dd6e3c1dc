// ==========================================
// 排放核算引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约束: 写入以 *_tx 关联函数暴露，由服务层统一开启事务
// ==========================================

pub mod data_entry_repo;
pub mod emission_repo;
pub mod error;
pub mod factor_repo;
pub mod ledger_repo;
pub(crate) mod row_utils;
pub mod taxonomy_repo;

// 重导出核心仓储
pub use data_entry_repo::DataEntryRepository;
pub use emission_repo::EmissionRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use factor_repo::FactorRepository;
pub use ledger_repo::LedgerRepository;
pub use taxonomy_repo::TaxonomyRepository;
