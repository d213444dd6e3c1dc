// ==========================================
// 排放核算引擎 - 应用状态
// ==========================================
// 职责: 管理共享连接、仓储与服务实例的装配
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::{ConfigManager, EngineConfig};
use crate::db::{init_schema, open_in_memory, open_sqlite_connection};
use crate::domain::{Factor, FactorValues};
use crate::engine::{
    BatchRecalculationService, DataEntryService, EmissionCalculationService, EngineResult,
    FactorManagementService, KeyedLocks, RecalcReport, StrategyRegistry, VersioningLedger,
};
use crate::repository::{
    DataEntryRepository, EmissionRepository, FactorRepository, LedgerRepository,
    TaxonomyRepository,
};

/// 应用状态
///
/// 所有仓储与服务共享同一条连接
pub struct AppState {
    /// 数据库路径（内存库为 ":memory:"）
    pub db_path: String,
    pub conn: Arc<Mutex<Connection>>,
    pub config: EngineConfig,

    // ===== 仓储 =====
    pub taxonomy_repo: Arc<TaxonomyRepository>,
    pub factor_repo: Arc<FactorRepository>,
    pub data_entry_repo: Arc<DataEntryRepository>,
    pub emission_repo: Arc<EmissionRepository>,
    pub ledger_repo: Arc<LedgerRepository>,

    // ===== 服务 =====
    pub ledger: Arc<VersioningLedger>,
    pub registry: Arc<StrategyRegistry>,
    pub calculation_service: Arc<EmissionCalculationService>,
    pub factor_service: Arc<FactorManagementService>,
    pub data_entry_service: Arc<DataEntryService>,
    pub batch_service: Arc<BatchRecalculationService>,
}

impl AppState {
    /// 打开（必要时创建）数据库并装配
    ///
    /// 该方法会：
    /// 1. 打开连接并应用统一 PRAGMA
    /// 2. 建表（幂等）
    /// 3. 从 config_kv 加载引擎配置
    /// 4. 创建仓储与服务
    pub fn new(db_path: String) -> EngineResult<Self> {
        tracing::info!(db_path = %db_path, "初始化 AppState");
        let conn = open_sqlite_connection(&db_path)?;
        init_schema(&conn)?;
        Self::from_connection(db_path, Arc::new(Mutex::new(conn)))
    }

    /// 内存库（测试 / 试算）
    pub fn in_memory() -> EngineResult<Self> {
        let conn = open_in_memory()?;
        Self::from_connection(":memory:".to_string(), Arc::new(Mutex::new(conn)))
    }

    /// 基于已建表的连接装配
    pub fn from_connection(db_path: String, conn: Arc<Mutex<Connection>>) -> EngineResult<Self> {
        let config_manager = ConfigManager::from_connection(conn.clone())?;
        let config = EngineConfig::load(&config_manager)?;
        Self::with_config(db_path, conn, config)
    }

    /// 使用显式配置装配（忽略 config_kv）
    pub fn with_config(
        db_path: String,
        conn: Arc<Mutex<Connection>>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        // ==========================================
        // 仓储层
        // ==========================================
        let taxonomy_repo = Arc::new(TaxonomyRepository::new(conn.clone()));
        let factor_repo = Arc::new(FactorRepository::new(conn.clone()));
        let data_entry_repo = Arc::new(DataEntryRepository::new(conn.clone()));
        let emission_repo = Arc::new(EmissionRepository::new(conn.clone()));
        let ledger_repo = Arc::new(LedgerRepository::new(conn.clone()));

        // ==========================================
        // 引擎层
        // ==========================================
        let ledger = Arc::new(VersioningLedger::new(
            conn.clone(),
            config.verify_chain_before_write,
        ));
        let registry = Arc::new(StrategyRegistry::from_config(&config)?);
        let entry_locks = Arc::new(KeyedLocks::new());

        let calculation_service = Arc::new(EmissionCalculationService::new(
            conn.clone(),
            registry.clone(),
            ledger.clone(),
            entry_locks.clone(),
        ));
        let factor_service = Arc::new(FactorManagementService::new(
            conn.clone(),
            factor_repo.clone(),
            ledger.clone(),
            registry.clone(),
        ));
        let data_entry_service = Arc::new(DataEntryService::new(
            conn.clone(),
            data_entry_repo.clone(),
            registry.clone(),
            ledger.clone(),
            calculation_service.clone(),
            entry_locks,
        ));
        let batch_service = Arc::new(BatchRecalculationService::new(
            factor_repo.clone(),
            emission_repo.clone(),
            ledger.clone(),
            calculation_service.clone(),
            config.batch_parallelism,
        ));

        tracing::info!(
            strategies = ?registry.entry_types(),
            parallelism = config.batch_parallelism,
            verify_chain_before_write = config.verify_chain_before_write,
            "AppState 初始化完成"
        );

        Ok(Self {
            db_path,
            conn,
            config,
            taxonomy_repo,
            factor_repo,
            data_entry_repo,
            emission_repo,
            ledger_repo,
            ledger,
            registry,
            calculation_service,
            factor_service,
            data_entry_service,
            batch_service,
        })
    }

    /// 更新因子后立即重算所有依赖条目
    ///
    /// 因子更新与批量重算分属不同事务：重算失败不回滚因子变更，
    /// 报告中的 failed / pending 可通过 `recalculate_entries` 补算
    pub fn update_factor_and_recalculate(
        &self,
        factor_id: &str,
        new_values: FactorValues,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<(Factor, RecalcReport)> {
        let factor = self.factor_service.update(factor_id, new_values, actor, reason)?;
        let report = self.batch_service.recalculate_for_factor(factor_id)?;
        Ok((factor, report))
    }
}

/// 获取默认数据库路径
///
/// 优先级: `EMISSION_LEDGER_DB_PATH` > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("EMISSION_LEDGER_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./emission_ledger.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("emission-ledger");
        // 目录创建失败时退回当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("emission_ledger.db");
        }
    }

    path.to_string_lossy().to_string()
}
