use super::{check_chain, ChangeRequest, VersioningLedger};
use crate::domain::types::{ChangeType, TargetKind};
use crate::engine::error::EngineError;
use chrono::Duration;
use rusqlite::{params, Connection};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn setup() -> (Arc<Mutex<Connection>>, VersioningLedger) {
    let conn = Arc::new(Mutex::new(crate::db::open_in_memory().unwrap()));
    let ledger = VersioningLedger::new(conn.clone(), true);
    (conn, ledger)
}

/// 写入 n 个版本: {"power": 100}, {"power": 200}, ...
fn write_versions(ledger: &VersioningLedger, target_id: &str, n: i64) {
    for v in 1..=n {
        let state = json!({"id": target_id, "power": v * 100});
        let change_type = if v == 1 { ChangeType::Create } else { ChangeType::Update };
        ledger
            .record_change(
                &ChangeRequest::new(TargetKind::Factor, target_id, &state, change_type, "alice")
                    .with_reason(Some("test")),
            )
            .unwrap();
    }
}

#[test]
fn test_versions_are_contiguous_and_chained() {
    let (_conn, ledger) = setup();
    write_versions(&ledger, "f1", 3);

    let history = ledger.history(TargetKind::Factor, "f1").unwrap();
    assert_eq!(history.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(history.iter().filter(|e| e.is_current).count(), 1);
    assert!(history[2].is_current);

    assert!(history[0].previous_hash.is_none());
    assert!(history[0].diff.is_none());
    assert_eq!(history[1].previous_hash.as_deref(), Some(history[0].current_hash.as_str()));
    assert_eq!(history[1].diff, Some(json!({"power": {"old": 100, "new": 200}})));
    assert!(history.windows(2).all(|w| w[0].changed_at <= w[1].changed_at));

    let report = ledger.verify_chain(TargetKind::Factor, "f1").unwrap();
    assert!(report.valid);
    assert_eq!(report.checked, 3);
    assert_eq!(report.first_broken_version, None);
}

#[test]
fn test_noop_update_records_empty_diff() {
    let (_conn, ledger) = setup();
    let state = json!({"id": "f1", "power": 1});
    ledger
        .record_change(&ChangeRequest::new(TargetKind::Factor, "f1", &state, ChangeType::Create, "a"))
        .unwrap();
    let entry = ledger
        .record_change(&ChangeRequest::new(TargetKind::Factor, "f1", &state, ChangeType::Update, "a"))
        .unwrap();
    assert_eq!(entry.version, 2);
    assert_eq!(entry.diff, Some(json!({})));
}

#[test]
fn test_tampered_snapshot_breaks_chain_at_that_version() {
    let (conn, ledger) = setup();
    write_versions(&ledger, "f1", 4);

    conn.lock()
        .unwrap()
        .execute(
            "UPDATE ledger_entry SET snapshot = ?1 WHERE target_id = 'f1' AND version = 2",
            params![r#"{"id":"f1","power":999}"#],
        )
        .unwrap();

    let report = ledger.verify_chain(TargetKind::Factor, "f1").unwrap();
    assert!(!report.valid);
    assert_eq!(report.first_broken_version, Some(2));
    assert_eq!(report.checked, 1);

    // 断链 target 被隔离，写入被拒绝
    assert_eq!(ledger.quarantined_version(TargetKind::Factor, "f1").unwrap(), Some(2));
    let state = json!({"id": "f1", "power": 500});
    let err = ledger
        .record_change(&ChangeRequest::new(TargetKind::Factor, "f1", &state, ChangeType::Update, "alice"))
        .unwrap_err();
    assert!(matches!(err, EngineError::LedgerIntegrity { broken_version: 2, .. }));

    // 其他 target 不受影响
    write_versions(&ledger, "f2", 1);
    assert!(ledger.is_chain_valid(TargetKind::Factor, "f2").unwrap());
}

#[test]
fn test_tampered_head_is_detected_before_write_and_quarantined() {
    let (conn, ledger) = setup();
    write_versions(&ledger, "f1", 2);

    conn.lock()
        .unwrap()
        .execute(
            "UPDATE ledger_entry SET actor = 'mallory' WHERE target_id = 'f1' AND version = 2",
            [],
        )
        .unwrap();

    let state = json!({"id": "f1", "power": 300});
    let err = ledger
        .record_change(&ChangeRequest::new(TargetKind::Factor, "f1", &state, ChangeType::Update, "alice"))
        .unwrap_err();
    assert!(matches!(err, EngineError::LedgerIntegrity { broken_version: 2, .. }));

    // 事务回滚后隔离记录仍然保留
    assert_eq!(ledger.quarantined_version(TargetKind::Factor, "f1").unwrap(), Some(2));
    assert_eq!(ledger.history(TargetKind::Factor, "f1").unwrap().len(), 2);
}

#[test]
fn test_release_quarantine_allows_writes_again() {
    let (conn, ledger) = setup();
    write_versions(&ledger, "f1", 2);
    crate::repository::LedgerRepository::quarantine_tx(
        &conn.lock().unwrap(),
        TargetKind::Factor,
        "f1",
        2,
        &crate::db::now_ts(),
    )
    .unwrap();

    assert!(ledger.release_quarantine(TargetKind::Factor, "f1", "admin", Some("repaired")).unwrap());
    assert!(!ledger.release_quarantine(TargetKind::Factor, "f1", "admin", Some("repaired")).unwrap());

    let state = json!({"id": "f1", "power": 300});
    let entry = ledger
        .record_change(&ChangeRequest::new(TargetKind::Factor, "f1", &state, ChangeType::Update, "alice"))
        .unwrap();
    assert_eq!(entry.version, 3);
}

#[test]
fn test_expected_version_mismatch_is_concurrent_modification() {
    let (_conn, ledger) = setup();
    write_versions(&ledger, "f1", 2);

    let state = json!({"id": "f1", "power": 300});
    let err = ledger
        .record_change(
            &ChangeRequest::new(TargetKind::Factor, "f1", &state, ChangeType::Update, "bob")
                .expecting_version(Some(1)),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::ConcurrentModification { .. }));

    let ok = ledger
        .record_change(
            &ChangeRequest::new(TargetKind::Factor, "f1", &state, ChangeType::Update, "bob")
                .expecting_version(Some(2)),
        )
        .unwrap();
    assert_eq!(ok.version, 3);
}

#[test]
fn test_create_twice_is_rejected() {
    let (_conn, ledger) = setup();
    write_versions(&ledger, "f1", 1);
    let state = json!({"id": "f1"});
    let err = ledger
        .record_change(&ChangeRequest::new(TargetKind::Factor, "f1", &state, ChangeType::Create, "a"))
        .unwrap_err();
    assert!(matches!(err, EngineError::ConcurrentModification { .. }));
}

#[test]
fn test_live_state_drift_is_integrity_failure() {
    let (_conn, ledger) = setup();
    write_versions(&ledger, "f1", 1);

    let drifted = json!({"id": "f1", "power": 12345});
    let next = json!({"id": "f1", "power": 200});
    let err = ledger
        .record_change(
            &ChangeRequest::new(TargetKind::Factor, "f1", &next, ChangeType::Update, "a")
                .with_live_state(&drifted),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::LedgerIntegrity { broken_version: 1, .. }));
}

#[test]
fn test_state_as_of_and_version_lookup() {
    let (_conn, ledger) = setup();
    write_versions(&ledger, "f1", 2);
    let history = ledger.history(TargetKind::Factor, "f1").unwrap();

    let before = history[0].changed_at - Duration::seconds(1);
    assert!(matches!(
        ledger.state_as_of(TargetKind::Factor, "f1", &before),
        Err(EngineError::NotFound { .. })
    ));

    let latest = ledger
        .state_as_of(TargetKind::Factor, "f1", &(history[1].changed_at + Duration::seconds(1)))
        .unwrap();
    assert_eq!(latest["power"], json!(200));

    assert_eq!(ledger.version(TargetKind::Factor, "f1", 1).unwrap().snapshot().unwrap()["power"], json!(100));
    assert!(matches!(
        ledger.version(TargetKind::Factor, "f1", 9),
        Err(EngineError::NotFound { .. })
    ));
    assert_eq!(ledger.current(TargetKind::Factor, "f1").unwrap().unwrap().version, 2);
}

#[test]
fn test_state_as_of_after_delete_is_not_found() {
    let (_conn, ledger) = setup();
    let state = json!({"id": "e1"});
    ledger
        .record_change(&ChangeRequest::new(TargetKind::DataEntry, "e1", &state, ChangeType::Create, "a"))
        .unwrap();
    let deleted = ledger
        .record_change(&ChangeRequest::new(TargetKind::DataEntry, "e1", &state, ChangeType::Delete, "a"))
        .unwrap();
    assert!(matches!(
        ledger.state_as_of(TargetKind::DataEntry, "e1", &deleted.changed_at),
        Err(EngineError::NotFound { .. })
    ));
}

#[test]
fn test_check_chain_on_empty_history() {
    let report = check_chain(TargetKind::Factor, "none", &[]);
    assert!(report.valid);
    assert_eq!(report.checked, 0);
}
