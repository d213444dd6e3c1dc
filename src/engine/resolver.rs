// ==========================================
// 排放核算引擎 - 因子解析
// ==========================================
// 职责: 按策略声明的需求，为数据条目挑选主因子 / 转换因子
// 规则: 因子声明的分类标签须全部与条目一致；声明键数多者优先；
//       同分时条目类型精确匹配优先，再按 id 升序（并记录告警）
// ==========================================

use crate::domain::data_entry::DataEntry;
use crate::domain::factor::Factor;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::strategy::{FactorRequirement, PrimaryScope, ResolvedFactors};
use crate::repository::FactorRepository;
use rusqlite::Connection;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// 在事务内解析条目所需的全部因子
///
/// # 错误
/// - `FactorNotFound`: 任一必需因子没有可用候选
pub fn resolve_tx(
    conn: &Connection,
    entry: &DataEntry,
    requirement: &FactorRequirement,
) -> EngineResult<ResolvedFactors> {
    let primary_keys: Vec<&str> = requirement
        .primary_classification_keys
        .iter()
        .map(String::as_str)
        .collect();

    let primary = match &requirement.primary {
        PrimaryScope::Single { emission_type } => {
            let candidates =
                FactorRepository::find_primary_candidates_tx(conn, &entry.entry_type, Some(emission_type))?;
            let best = pick_best(candidates, entry)
                .ok_or_else(|| not_found(entry, emission_type, &primary_keys))?;
            vec![best]
        }
        PrimaryScope::PerEmissionType => {
            let candidates = FactorRepository::find_primary_candidates_tx(conn, &entry.entry_type, None)?;
            let mut grouped: BTreeMap<String, Vec<Factor>> = BTreeMap::new();
            for factor in candidates {
                grouped.entry(factor.emission_type.clone()).or_default().push(factor);
            }
            let picked: Vec<Factor> = grouped
                .into_values()
                .filter_map(|group| pick_best(group, entry))
                .collect();
            if picked.is_empty() {
                return Err(not_found(entry, "*", &primary_keys));
            }
            picked
        }
    };

    let conversion = match &requirement.conversion {
        Some(conv) => {
            let keys: Vec<&str> = conv.classification_keys.iter().map(String::as_str).collect();
            let candidates =
                FactorRepository::find_conversion_candidates_tx(conn, &entry.entry_type, &conv.emission_type)?;
            let best = pick_best(candidates, entry)
                .ok_or_else(|| not_found(entry, &conv.emission_type, &keys))?;
            Some(best)
        }
        None => None,
    };

    Ok(ResolvedFactors { primary, conversion })
}

/// 候选中挑选最匹配的因子
pub(crate) fn pick_best(candidates: Vec<Factor>, entry: &DataEntry) -> Option<Factor> {
    let mut scored: Vec<(usize, bool, Factor)> = candidates
        .into_iter()
        .filter_map(|f| {
            let score = f.classification_score(&entry.data)?;
            let exact = f.entry_type.as_deref() == Some(entry.entry_type.as_str());
            Some((score, exact, f))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.1.cmp(&a.1))
            .then_with(|| a.2.id.cmp(&b.2.id))
    });

    if let [first, second, ..] = scored.as_slice() {
        if first.0 == second.0 && first.1 == second.1 {
            tracing::warn!(
                data_entry_id = %entry.id,
                emission_type = %first.2.emission_type,
                chosen = %first.2.id,
                other = %second.2.id,
                "多个因子同等匹配，按 id 取第一个"
            );
        }
    }

    scored.into_iter().next().map(|(_, _, f)| f)
}

fn not_found(entry: &DataEntry, emission_type: &str, keys: &[&str]) -> EngineError {
    let mut classification = Map::new();
    for key in keys {
        if let Some(v) = entry.data.get(*key) {
            classification.insert((*key).to_string(), v.clone());
        }
    }
    EngineError::FactorNotFound {
        entry_type: entry.entry_type.clone(),
        emission_type: emission_type.to_string(),
        classification: JsonValue::Object(classification).to_string(),
    }
}
