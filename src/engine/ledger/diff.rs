use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeSet;

const ROOT_PATH: &str = "$";

/// 结构化差异: `{ "a.b": { "old": .., "new": .. } }`
///
/// 对象逐键递归，其余类型整体比较；缺失键记为 null。
/// 键内的 `~` 写作 `~0`、`.` 写作 `~1`，路径按 `.` 切分即可还原
pub(crate) fn json_diff(old: &JsonValue, new: &JsonValue) -> JsonValue {
    let mut changes = Map::new();
    diff_into("", old, new, &mut changes);
    JsonValue::Object(changes)
}

fn diff_into(path: &str, old: &JsonValue, new: &JsonValue, out: &mut Map<String, JsonValue>) {
    match (old, new) {
        (JsonValue::Object(a), JsonValue::Object(b)) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                let segment = escape_segment(key);
                let child = if path.is_empty() {
                    segment
                } else {
                    format!("{}.{}", path, segment)
                };
                match (a.get(key), b.get(key)) {
                    (Some(x), Some(y)) => diff_into(&child, x, y, out),
                    (Some(x), None) => {
                        out.insert(child, json!({ "old": x, "new": JsonValue::Null }));
                    }
                    (None, Some(y)) => {
                        out.insert(child, json!({ "old": JsonValue::Null, "new": y }));
                    }
                    (None, None) => {}
                }
            }
        }
        _ if old == new => {}
        _ => {
            let key = if path.is_empty() { ROOT_PATH } else { path };
            out.insert(key.to_string(), json!({ "old": old, "new": new }));
        }
    }
}

fn escape_segment(key: &str) -> String {
    key.replace('~', "~0").replace('.', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_change_reports_dotted_path() {
        let old = json!({"values": {"active_power_w": 1300.0, "standby_power_w": 130.0}, "id": "f1"});
        let new = json!({"values": {"active_power_w": 1500.0, "standby_power_w": 130.0}, "id": "f1"});
        let diff = json_diff(&old, &new);
        assert_eq!(
            diff,
            json!({"values.active_power_w": {"old": 1300.0, "new": 1500.0}})
        );
    }

    #[test]
    fn test_identical_states_produce_empty_diff() {
        let state = json!({"a": [1, 2], "b": {"c": null}});
        assert_eq!(json_diff(&state, &state), json!({}));
    }

    #[test]
    fn test_added_and_removed_keys() {
        let diff = json_diff(&json!({"gone": 1}), &json!({"added": true}));
        assert_eq!(diff["gone"], json!({"old": 1, "new": null}));
        assert_eq!(diff["added"], json!({"old": null, "new": true}));
    }

    #[test]
    fn test_non_object_root() {
        assert_eq!(json_diff(&json!(1), &json!(2)), json!({"$": {"old": 1, "new": 2}}));
    }

    #[test]
    fn test_keys_containing_dots_are_escaped() {
        let old = json!({"meta": {"v1.2": 1, "a": {"b": 1}, "x~y": 0}});
        let new = json!({"meta": {"v1.2": 2, "a": {"b": 2}, "x~y": 1}});
        let diff = json_diff(&old, &new);
        assert_eq!(diff["meta.v1~12"], json!({"old": 1, "new": 2}));
        assert_eq!(diff["meta.a.b"], json!({"old": 1, "new": 2}));
        assert_eq!(diff["meta.x~0y"], json!({"old": 0, "new": 1}));
        assert_eq!(diff.as_object().unwrap().len(), 3);
    }
}
