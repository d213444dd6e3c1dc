// ==========================================
// 排放核算引擎 - 版本账本
// ==========================================
// 红线: 只追加；每个 target 版本号从 1 连续递增，恰有一条当前版本
// 红线: 哈希链断裂的 target 进入隔离，解除前拒绝写入
// ==========================================
// 职责: 记录变更 / 历史查询 / 时间点回溯 / 哈希链校验
// 输入: 实体快照 (JSON) + 变更类型 + 操作人
// 输出: LedgerEntry
// ==========================================

mod diff;
mod hashing;
#[cfg(test)]
mod tests;

pub(crate) use self::diff::json_diff;

use self::hashing::{entry_hash, recompute, HashInput};
use crate::db::now_ts;
use crate::domain::ledger::{ChainVerification, LedgerEntry};
use crate::domain::types::{ChangeType, TargetKind};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::error::RepositoryError;
use crate::repository::LedgerRepository;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use tracing::instrument;

// ==========================================
// ChangeRequest - 一次变更的写入参数
// ==========================================
#[derive(Debug, Clone)]
pub struct ChangeRequest<'a> {
    pub target_kind: TargetKind,
    pub target_id: &'a str,
    pub new_state: &'a JsonValue,
    pub change_type: ChangeType,
    pub actor: &'a str,
    pub reason: Option<&'a str>,
    /// 期望的当前版本号（乐观并发控制）
    pub expected_version: Option<i64>,
    /// 写入前的实体状态，用于核对当前账本版本与实体表一致
    pub live_state_before: Option<&'a JsonValue>,
}

impl<'a> ChangeRequest<'a> {
    pub fn new(
        target_kind: TargetKind,
        target_id: &'a str,
        new_state: &'a JsonValue,
        change_type: ChangeType,
        actor: &'a str,
    ) -> Self {
        Self {
            target_kind,
            target_id,
            new_state,
            change_type,
            actor,
            reason: None,
            expected_version: None,
            live_state_before: None,
        }
    }

    pub fn with_reason(mut self, reason: Option<&'a str>) -> Self {
        self.reason = reason;
        self
    }

    pub fn expecting_version(mut self, expected: Option<i64>) -> Self {
        self.expected_version = expected;
        self
    }

    pub fn with_live_state(mut self, live: &'a JsonValue) -> Self {
        self.live_state_before = Some(live);
        self
    }

    fn target_label(&self) -> String {
        format!("{}:{}", self.target_kind, self.target_id)
    }

    fn conflict(&self, expected: Option<i64>, actual: Option<i64>) -> EngineError {
        EngineError::ConcurrentModification {
            target_kind: self.target_kind,
            target_id: self.target_id.to_string(),
            expected,
            actual,
        }
    }
}

// ==========================================
// VersioningLedger - 版本账本
// ==========================================
pub struct VersioningLedger {
    conn: Arc<Mutex<Connection>>,
    repo: LedgerRepository,
    verify_before_write: bool,
}

impl VersioningLedger {
    /// # 参数
    /// - `verify_before_write`: 写入前是否复核当前版本的哈希与链接
    pub fn new(conn: Arc<Mutex<Connection>>, verify_before_write: bool) -> Self {
        let repo = LedgerRepository::new(conn.clone());
        Self {
            conn,
            repo,
            verify_before_write,
        }
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 记录一次变更（独立事务）
    pub fn record_change(&self, request: &ChangeRequest<'_>) -> EngineResult<LedgerEntry> {
        crate::engine::transaction::run_in_transaction(&self.conn, |tx| self.record_change_tx(tx, request))
    }

    /// 记录一次变更（调用方事务内）
    ///
    /// 调用方负责在同一事务内写入实体表，并在本函数成功后提交
    ///
    /// # 错误
    /// - `LedgerIntegrity`: target 已被隔离，或当前版本哈希 / 链接 / 实体状态不一致
    /// - `ConcurrentModification`: 期望版本不符，或并发写入抢先
    pub fn record_change_tx(
        &self,
        conn: &Connection,
        request: &ChangeRequest<'_>,
    ) -> EngineResult<LedgerEntry> {
        let kind = request.target_kind;
        let target_id = request.target_id;

        if let Some(broken_version) = LedgerRepository::find_quarantine_tx(conn, kind, target_id)? {
            return Err(EngineError::LedgerIntegrity {
                target_kind: kind,
                target_id: target_id.to_string(),
                broken_version,
            });
        }

        let head = LedgerRepository::find_current_tx(conn, kind, target_id)?;
        let actual_version = head.as_ref().map(|h| h.version);

        if let Some(expected) = request.expected_version {
            if actual_version != Some(expected) {
                return Err(request.conflict(Some(expected), actual_version));
            }
        }

        match (&head, request.change_type) {
            (Some(h), ChangeType::Create) => {
                return Err(request.conflict(None, Some(h.version)));
            }
            (None, change_type) if change_type != ChangeType::Create => {
                return Err(EngineError::Internal(format!(
                    "{} 无账本历史，不能记录 {}",
                    request.target_label(),
                    change_type
                )));
            }
            _ => {}
        }

        let previous_state = match &head {
            Some(h) => {
                if self.verify_before_write {
                    verify_head_tx(conn, h)?;
                }
                let recorded = h.snapshot()?;
                if let Some(live) = request.live_state_before {
                    if &recorded != live {
                        tracing::error!(
                            target_kind = %kind,
                            target_id = %target_id,
                            version = h.version,
                            "实体表状态与当前账本版本不一致"
                        );
                        return Err(EngineError::LedgerIntegrity {
                            target_kind: kind,
                            target_id: target_id.to_string(),
                            broken_version: h.version,
                        });
                    }
                }
                Some(recorded)
            }
            None => None,
        };

        let version = actual_version.map_or(1, |v| v + 1);
        let snapshot_raw = serde_json::to_string(request.new_state)?;
        let diff = previous_state
            .as_ref()
            .map(|old| json_diff(old, request.new_state));

        // changed_at 随版本单调不减
        let now = now_ts();
        let changed_at = match &head {
            Some(h) if h.changed_at > now => h.changed_at,
            _ => now,
        };
        let previous_hash = head.as_ref().map(|h| h.current_hash.clone());

        let current_hash = entry_hash(
            previous_hash.as_deref(),
            &snapshot_raw,
            &HashInput {
                target_kind: kind,
                target_id,
                version,
                change_type: request.change_type,
                actor: request.actor,
                reason: request.reason,
                changed_at: &changed_at,
            },
        );

        let entry = LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            target_kind: kind,
            target_id: target_id.to_string(),
            version,
            is_current: true,
            snapshot_raw,
            diff,
            change_type: request.change_type,
            reason: request.reason.map(str::to_string),
            actor: request.actor.to_string(),
            changed_at,
            previous_hash,
            current_hash,
        };

        if let Some(h) = &head {
            if LedgerRepository::supersede_tx(conn, &h.id)? == 0 {
                return Err(request.conflict(Some(h.version), None));
            }
        }

        LedgerRepository::insert_tx(conn, &entry).map_err(|e| match e {
            RepositoryError::VersionConflict { message } => {
                tracing::warn!(target_kind = %kind, target_id = %target_id, version, %message, "账本版本冲突");
                request.conflict(actual_version, None)
            }
            other => EngineError::from(other),
        })?;

        tracing::debug!(
            target_kind = %kind,
            target_id = %target_id,
            version,
            change_type = %request.change_type,
            actor = %request.actor,
            "账本记录已追加"
        );

        Ok(entry)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 全部历史（按版本升序）
    pub fn history(&self, target_kind: TargetKind, target_id: &str) -> EngineResult<Vec<LedgerEntry>> {
        Ok(self.repo.history(target_kind, target_id)?)
    }

    /// 当前版本
    pub fn current(&self, target_kind: TargetKind, target_id: &str) -> EngineResult<Option<LedgerEntry>> {
        Ok(self.repo.find_current(target_kind, target_id)?)
    }

    /// 指定版本
    pub fn version(&self, target_kind: TargetKind, target_id: &str, version: i64) -> EngineResult<LedgerEntry> {
        self.repo
            .find_version(target_kind, target_id, version)?
            .ok_or_else(|| {
                EngineError::not_found("LedgerEntry", &format!("{}:{}@v{}", target_kind, target_id, version))
            })
    }

    /// 时间点回溯: changed_at <= at 的最新快照
    ///
    /// # 错误
    /// - `NotFound`: 该时间点 target 尚未创建，或已被删除
    pub fn state_as_of(
        &self,
        target_kind: TargetKind,
        target_id: &str,
        at: &NaiveDateTime,
    ) -> EngineResult<JsonValue> {
        let missing = || EngineError::not_found("LedgerEntry", &format!("{}:{}@{}", target_kind, target_id, at));
        let entry = self
            .repo
            .find_as_of(target_kind, target_id, at)?
            .ok_or_else(missing)?;
        if entry.change_type == ChangeType::Delete {
            return Err(missing());
        }
        Ok(entry.snapshot()?)
    }

    /// 当前隔离状态（断链版本）
    pub fn quarantined_version(&self, target_kind: TargetKind, target_id: &str) -> EngineResult<Option<i64>> {
        Ok(self.repo.find_quarantine(target_kind, target_id)?)
    }

    // ==========================================
    // 完整性校验
    // ==========================================

    /// 全链校验；发现断链即隔离该 target
    #[instrument(skip(self), fields(target_kind = %target_kind, target_id = %target_id))]
    pub fn verify_chain(&self, target_kind: TargetKind, target_id: &str) -> EngineResult<ChainVerification> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let entries = LedgerRepository::history_tx(&conn, target_kind, target_id)?;
        let report = check_chain(target_kind, target_id, &entries);

        if let Some(broken_version) = report.first_broken_version {
            tracing::warn!(
                broken_version,
                checked = report.checked,
                "哈希链断裂，target 进入隔离"
            );
            LedgerRepository::quarantine_tx(&conn, target_kind, target_id, broken_version, &now_ts())?;
        }
        Ok(report)
    }

    pub fn is_chain_valid(&self, target_kind: TargetKind, target_id: &str) -> EngineResult<bool> {
        Ok(self.verify_chain(target_kind, target_id)?.valid)
    }

    /// 解除隔离（管理操作）
    ///
    /// # 返回
    /// - `true`: 存在隔离记录并已解除
    pub fn release_quarantine(
        &self,
        target_kind: TargetKind,
        target_id: &str,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let released = LedgerRepository::release_quarantine_tx(&conn, target_kind, target_id)? > 0;
        if released {
            tracing::warn!(
                target_kind = %target_kind,
                target_id = %target_id,
                actor = %actor,
                reason = reason.unwrap_or(""),
                "账本隔离已解除"
            );
        }
        Ok(released)
    }
}

/// 复核当前版本: 自身哈希 + 与前一版本的链接
fn verify_head_tx(conn: &Connection, head: &LedgerEntry) -> EngineResult<()> {
    let broken = |version: i64| EngineError::LedgerIntegrity {
        target_kind: head.target_kind,
        target_id: head.target_id.clone(),
        broken_version: version,
    };

    if recompute(head) != head.current_hash {
        return Err(broken(head.version));
    }

    if head.version == 1 {
        return match head.previous_hash {
            None => Ok(()),
            Some(_) => Err(broken(1)),
        };
    }

    let previous = LedgerRepository::find_version_tx(conn, head.target_kind, &head.target_id, head.version - 1)?
        .ok_or_else(|| broken(head.version))?;
    if head.previous_hash.as_deref() != Some(previous.current_hash.as_str()) {
        return Err(broken(head.version));
    }
    Ok(())
}

/// 纯函数全链校验
pub(crate) fn check_chain(target_kind: TargetKind, target_id: &str, entries: &[LedgerEntry]) -> ChainVerification {
    let mut report = ChainVerification {
        target_kind,
        target_id: target_id.to_string(),
        valid: true,
        checked: 0,
        first_broken_version: None,
    };

    let mut previous_hash: Option<&str> = None;
    for (idx, entry) in entries.iter().enumerate() {
        let expected_version = idx as i64 + 1;
        let linked = entry.previous_hash.as_deref() == previous_hash;
        if entry.version != expected_version || !linked || recompute(entry) != entry.current_hash {
            report.valid = false;
            report.first_broken_version = Some(entry.version.min(expected_version));
            return report;
        }
        previous_hash = Some(entry.current_hash.as_str());
        report.checked += 1;
    }

    // 当前版本必须恰为最后一条
    let current_count = entries.iter().filter(|e| e.is_current).count();
    if let Some(last) = entries.last() {
        if current_count != 1 || !last.is_current {
            report.valid = false;
            report.first_broken_version = Some(last.version);
        }
    }
    report
}
