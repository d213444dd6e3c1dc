// ==========================================
// 版本账本 集成测试
// ==========================================
// 测试范围:
// 1. 版本连续 / 单一当前版本 / 哈希链接
// 2. 存储层篡改检测与隔离
// 3. 因子回滚与乐观并发
// 4. 时间点回溯
// ==========================================

mod test_helpers;

use emission_ledger::db::now_ts;
use emission_ledger::domain::{ChangeType, Factor, FactorValues, TargetKind};
use emission_ledger::engine::{EngineError, ErrorSeverity};
use serde_json::json;
use test_helpers::*;

fn factor_with_history(state: &emission_ledger::AppState) -> Factor {
    let factor = fte_factor(state, "member", "food", 100.0);
    for value in [200.0, 300.0] {
        state
            .factor_service
            .update(&factor.id, FactorValues::per_fte(value), ACTOR, Some("annual revision"))
            .unwrap();
    }
    factor
}

#[test]
fn test_factor_history_is_versioned_and_chained() {
    let (_tmp, state) = setup_state();
    let factor = factor_with_history(&state);

    let history = state.factor_service.history(&factor.id).unwrap();
    assert_eq!(history.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(
        history.iter().map(|e| e.change_type).collect::<Vec<_>>(),
        vec![ChangeType::Create, ChangeType::Update, ChangeType::Update]
    );
    assert_eq!(history.iter().filter(|e| e.is_current).count(), 1);
    assert!(history[2].is_current);

    assert!(history[0].previous_hash.is_none());
    assert!(history[0].diff.is_none());
    for pair in history.windows(2) {
        assert_eq!(pair[1].previous_hash.as_deref(), Some(pair[0].current_hash.as_str()));
        assert!(pair[1].changed_at >= pair[0].changed_at);
    }

    let diff = history[1].diff.as_ref().unwrap();
    assert_eq!(diff["values.kg_co2eq_per_fte"]["old"], json!(100.0));
    assert_eq!(diff["values.kg_co2eq_per_fte"]["new"], json!(200.0));

    let report = state.ledger.verify_chain(TargetKind::Factor, &factor.id).unwrap();
    assert!(report.is_valid());
    assert_eq!(report.first_broken_version, None);
    assert_eq!(report.checked, 3);
}

#[test]
fn test_tampered_snapshot_is_detected_and_quarantined() {
    let (_tmp, state) = setup_state();
    let factor = factor_with_history(&state);

    exec_sql(
        &state,
        "UPDATE ledger_entry SET snapshot = replace(snapshot, '200.0', '250.0')
         WHERE target_kind = 'factor' AND target_id = ?1 AND version = 2",
        &[&factor.id],
    );

    let report = state.ledger.verify_chain(TargetKind::Factor, &factor.id).unwrap();
    assert!(!report.valid);
    assert_eq!(report.first_broken_version, Some(2));
    assert_eq!(report.checked, 1);
    assert_eq!(
        state.ledger.quarantined_version(TargetKind::Factor, &factor.id).unwrap(),
        Some(2)
    );

    // 隔离期间拒绝写入，实体表保持原值
    let err = state
        .factor_service
        .update(&factor.id, FactorValues::per_fte(400.0), ACTOR, None)
        .unwrap_err();
    match &err {
        EngineError::LedgerIntegrity {
            target_kind,
            target_id,
            broken_version,
        } => {
            assert_eq!(*target_kind, TargetKind::Factor);
            assert_eq!(target_id, &factor.id);
            assert_eq!(*broken_version, 2);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.severity(), ErrorSeverity::AdministrativeAlert);
    assert_eq!(
        state.factor_service.get(&factor.id).unwrap().values.number("kg_co2eq_per_fte"),
        Some(300.0)
    );
    assert_eq!(state.factor_service.current_version(&factor.id).unwrap(), 3);

    // 解除隔离后，头部版本完好即可继续写入
    assert!(state
        .ledger
        .release_quarantine(TargetKind::Factor, &factor.id, "admin", Some("restored from backup"))
        .unwrap());
    state
        .factor_service
        .update(&factor.id, FactorValues::per_fte(400.0), ACTOR, None)
        .unwrap();
    assert_eq!(state.factor_service.current_version(&factor.id).unwrap(), 4);
}

#[test]
fn test_tampered_head_blocks_next_write() {
    let (_tmp, state) = setup_state();
    let factor = factor_with_history(&state);

    exec_sql(
        &state,
        "UPDATE ledger_entry SET actor = 'mallory' WHERE target_kind = 'factor' AND target_id = ?1 AND version = 3",
        &[&factor.id],
    );

    let err = state
        .factor_service
        .update(&factor.id, FactorValues::per_fte(999.0), ACTOR, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::LedgerIntegrity { broken_version: 3, .. }));

    // 写入回滚，但隔离记录保留
    assert_eq!(state.factor_service.history(&factor.id).unwrap().len(), 3);
    assert_eq!(
        state.ledger.quarantined_version(TargetKind::Factor, &factor.id).unwrap(),
        Some(3)
    );
}

#[test]
fn test_live_row_drift_is_integrity_error() {
    let (_tmp, state) = setup_state();
    let factor = fte_factor(&state, "member", "food", 100.0);

    exec_sql(
        &state,
        "UPDATE factor SET factor_values = '{\"kg_co2eq_per_fte\":1.0}' WHERE id = ?1",
        &[&factor.id],
    );

    let err = state
        .factor_service
        .update(&factor.id, FactorValues::per_fte(150.0), ACTOR, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::LedgerIntegrity { broken_version: 1, .. }));
}

#[test]
fn test_rollback_restores_prior_values_as_new_version() {
    let (_tmp, state) = setup_state();
    let factor = factor_with_history(&state);

    let restored = state
        .factor_service
        .rollback(&factor.id, 1, ACTOR, None)
        .unwrap();
    assert_eq!(restored.values.number("kg_co2eq_per_fte"), Some(100.0));
    assert_eq!(state.factor_service.get(&factor.id).unwrap(), restored);

    let history = state.factor_service.history(&factor.id).unwrap();
    assert_eq!(history.len(), 4);
    let head = &history[3];
    assert_eq!(head.change_type, ChangeType::Rollback);
    assert_eq!(head.reason.as_deref(), Some("rollback to v1"));
    assert_eq!(head.snapshot().unwrap(), history[0].snapshot().unwrap());
    assert!(state.ledger.is_chain_valid(TargetKind::Factor, &factor.id).unwrap());

    let err = state.factor_service.rollback(&factor.id, 9, ACTOR, None).unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[test]
fn test_stale_expected_version_is_concurrent_modification() {
    let (_tmp, state) = setup_state();
    let factor = fte_factor(&state, "member", "food", 100.0);

    state
        .factor_service
        .update_with_expected_version(&factor.id, FactorValues::per_fte(110.0), 1, ACTOR, None)
        .unwrap();

    let err = state
        .factor_service
        .update_with_expected_version(&factor.id, FactorValues::per_fte(120.0), 1, "bob", None)
        .unwrap_err();
    match err {
        EngineError::ConcurrentModification { expected, actual, .. } => {
            assert_eq!(expected, Some(1));
            assert_eq!(actual, Some(2));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(
        state.factor_service.get(&factor.id).unwrap().values.number("kg_co2eq_per_fte"),
        Some(110.0)
    );
}

#[test]
fn test_state_as_of_reconstructs_history() {
    let (_tmp, state) = setup_state();
    let before_create = now_ts();
    let factor = fte_factor(&state, "member", "food", 100.0);
    let after_create = now_ts();
    state
        .factor_service
        .update(&factor.id, FactorValues::per_fte(200.0), ACTOR, None)
        .unwrap();

    let err = state
        .ledger
        .state_as_of(TargetKind::Factor, &factor.id, &before_create)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));

    let v1 = state
        .ledger
        .state_as_of(TargetKind::Factor, &factor.id, &after_create)
        .unwrap();
    assert_eq!(v1["values"]["kg_co2eq_per_fte"], json!(100.0));

    let now = state
        .ledger
        .state_as_of(TargetKind::Factor, &factor.id, &now_ts())
        .unwrap();
    assert_eq!(now["values"]["kg_co2eq_per_fte"], json!(200.0));

    assert_eq!(
        state.ledger.version(TargetKind::Factor, &factor.id, 1).unwrap().snapshot().unwrap(),
        v1
    );
}

#[test]
fn test_factor_values_are_validated() {
    let (_tmp, state) = setup_state();

    let err = state
        .factor_service
        .create(
            "food",
            Some("member"),
            false,
            FactorValues::per_fte(-5.0),
            json!({}),
            ACTOR,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { ref field, .. } if field == "kg_co2eq_per_fte"));

    let err = state
        .factor_service
        .create(
            "equipment",
            None,
            true,
            FactorValues::per_fte(1.0),
            json!({}),
            ACTOR,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { ref field, .. } if field == "kg_co2eq_per_kwh"));

    let err = state
        .factor_service
        .create(
            "unknown",
            Some("member"),
            false,
            FactorValues::per_fte(1.0),
            json!({}),
            ACTOR,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { ref field, .. } if field == "emission_type"));

    assert!(state.factor_service.list_for_entry_type("member").unwrap().is_empty());
}

#[test]
fn test_factor_values_are_decoded_by_role() {
    let (_tmp, state) = setup_state();

    // 转换因子附带功率字段仍按电网强度解析
    let raw = json!({"kg_co2eq_per_kwh": 0.012, "active_power_w": 5.0});
    let mix = state
        .factor_service
        .create(
            "equipment",
            None,
            true,
            FactorValues::from_json(raw).unwrap(),
            json!({}),
            ACTOR,
            None,
        )
        .unwrap();
    assert!(matches!(mix.values, FactorValues::EnergyMix { .. }));

    let stored = state.factor_service.get(&mix.id).unwrap();
    assert!(matches!(stored.values, FactorValues::EnergyMix { .. }));
    assert_eq!(stored.values.number("kg_co2eq_per_kwh"), Some(0.012));
    assert_eq!(stored.values.number("active_power_w"), Some(5.0));

    // 设备主因子缺少功率系数在写入时即被拒绝
    let err = state
        .factor_service
        .create(
            "equipment",
            Some("scientific-equipment"),
            false,
            FactorValues::per_fte(1.0),
            json!({}),
            ACTOR,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { ref field, .. } if field == "active_power_w"));

    let power = power_factor(&state, "scientific-equipment", 1300.0, 130.0, json!({}));
    let err = state
        .factor_service
        .update(&power.id, FactorValues::energy_mix(0.5), ACTOR, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { ref field, .. } if field == "active_power_w"));
    assert_eq!(state.factor_service.current_version(&power.id).unwrap(), 1);

    // 两个因子均可用于计算
    let (_entry, rows) = state
        .data_entry_service
        .create_and_calculate("scientific-equipment", equipment_payload(40.0, 128.0), ACTOR, None)
        .unwrap();
    assert_eq!(rows[0].conversion_factor_id.as_deref(), Some(mix.id.as_str()));
    assert_close(rows[0].kg_co2eq, 42.83136);
}
