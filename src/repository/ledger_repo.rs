// ==========================================
// 排放核算引擎 - 版本账本数据仓储
// ==========================================
// 红线: 只追加；历史记录写入后除 is_current 标志外不再修改
// ==========================================

mod core;
mod queries;


pub use self::core::LedgerRepository;
