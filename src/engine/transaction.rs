// ==========================================
// 排放核算引擎 - 事务边界
// ==========================================
// 红线: 实体写入与账本写入必须在同一事务内提交
// ==========================================

use crate::db::now_ts;
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::error::RepositoryError;
use crate::repository::LedgerRepository;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex};

/// 在 IMMEDIATE 事务中执行 `f`，成功则提交，失败则回滚
///
/// 账本断链错误在回滚之后单独落隔离记录，保证隔离状态不随业务事务一起丢失
pub(crate) fn run_in_transaction<T, F>(conn: &Arc<Mutex<Connection>>, f: F) -> EngineResult<T>
where
    F: FnOnce(&Transaction<'_>) -> EngineResult<T>,
{
    let mut guard = conn
        .lock()
        .map_err(|e| RepositoryError::LockError(e.to_string()))?;

    let outcome = {
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()
                    .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                Ok(value)
            }
            // tx drop 即回滚
            Err(e) => Err(e),
        }
    };

    if let Err(EngineError::LedgerIntegrity {
        target_kind,
        target_id,
        broken_version,
    }) = &outcome
    {
        if let Err(e) =
            LedgerRepository::quarantine_tx(&guard, *target_kind, target_id, *broken_version, &now_ts())
        {
            tracing::error!(
                target_kind = %target_kind,
                target_id = %target_id,
                error = %e,
                "隔离记录写入失败"
            );
        }
    }

    outcome
}
