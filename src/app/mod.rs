// ==========================================
// 排放核算引擎 - 应用层
// ==========================================
// 职责: 装配共享连接、仓储与服务，供外部调用方使用
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
