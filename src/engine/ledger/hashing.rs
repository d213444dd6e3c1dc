use crate::db::format_ts;
use crate::domain::ledger::LedgerEntry;
use crate::domain::types::{ChangeType, TargetKind};
use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};

/// 参与哈希的元数据
pub(crate) struct HashInput<'a> {
    pub target_kind: TargetKind,
    pub target_id: &'a str,
    pub version: i64,
    pub change_type: ChangeType,
    pub actor: &'a str,
    pub reason: Option<&'a str>,
    pub changed_at: &'a NaiveDateTime,
}

impl<'a> HashInput<'a> {
    pub fn of(entry: &'a LedgerEntry) -> Self {
        Self {
            target_kind: entry.target_kind,
            target_id: &entry.target_id,
            version: entry.version,
            change_type: entry.change_type,
            actor: &entry.actor,
            reason: entry.reason.as_deref(),
            changed_at: &entry.changed_at,
        }
    }
}

/// current_hash = SHA-256(previous_hash ‖ snapshot ‖ metadata)，hex 编码
///
/// 每个字段以长度前缀写入，字段边界无歧义
pub(crate) fn entry_hash(previous_hash: Option<&str>, snapshot_raw: &str, input: &HashInput<'_>) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, previous_hash.unwrap_or("").as_bytes());
    feed(&mut hasher, snapshot_raw.as_bytes());
    feed(&mut hasher, input.target_kind.to_db_str().as_bytes());
    feed(&mut hasher, input.target_id.as_bytes());
    feed(&mut hasher, input.version.to_string().as_bytes());
    feed(&mut hasher, input.change_type.to_db_str().as_bytes());
    feed(&mut hasher, input.actor.as_bytes());
    feed(&mut hasher, input.reason.unwrap_or("").as_bytes());
    feed(&mut hasher, format_ts(input.changed_at).as_bytes());
    hex::encode(hasher.finalize())
}

/// 按已存储内容重算记录哈希
pub(crate) fn recompute(entry: &LedgerEntry) -> String {
    entry_hash(
        entry.previous_hash.as_deref(),
        &entry.snapshot_raw,
        &HashInput::of(entry),
    )
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}
