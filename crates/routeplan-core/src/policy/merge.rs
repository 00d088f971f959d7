//! One-level override merge for generated documents.

use serde_json::Value;

/// Merge `overrides` onto `target`, overrides winning.
///
/// Top-level keys replace, except where both sides hold objects: those are
/// merged one level deeper (nested keys replace). Anything below that is
/// replaced wholesale. A non-object `overrides` replaces `target`.
pub fn merge_one_level(target: &mut Value, overrides: &Value) {
    let Some(override_map) = overrides.as_object() else {
        *target = overrides.clone();
        return;
    };
    if !target.is_object() {
        *target = overrides.clone();
        return;
    }
    let Some(target_map) = target.as_object_mut() else {
        return;
    };

    for (key, value) in override_map {
        if let (Some(Value::Object(existing)), Value::Object(nested)) =
            (target_map.get_mut(key), value)
        {
            for (nested_key, nested_value) in nested {
                existing.insert(nested_key.clone(), nested_value.clone());
            }
            continue;
        }
        target_map.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars_replace() {
        let mut target = json!({"a": 1, "b": 2});
        merge_one_level(&mut target, &json!({"b": 3, "c": 4}));
        assert_eq!(target, json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_objects_merge_one_level() {
        let mut target = json!({
            "healthCheck": {"enabled": true, "thresholds": {"unhealthy": 3, "healthy": 2}}
        });
        merge_one_level(
            &mut target,
            &json!({"healthCheck": {"enabled": false, "thresholds": {"unhealthy": 5}}}),
        );
        // second level is replaced, not merged
        assert_eq!(
            target,
            json!({"healthCheck": {"enabled": false, "thresholds": {"unhealthy": 5}}})
        );
    }

    #[test]
    fn test_arrays_replace() {
        let mut target = json!({"rules": [1, 2, 3]});
        merge_one_level(&mut target, &json!({"rules": [9]}));
        assert_eq!(target, json!({"rules": [9]}));
    }

    #[test]
    fn test_non_object_override_replaces_target() {
        let mut target = json!({"a": 1});
        merge_one_level(&mut target, &json!("replaced"));
        assert_eq!(target, json!("replaced"));
    }

    #[test]
    fn test_empty_override_is_noop() {
        let mut target = json!({"a": {"b": 1}});
        merge_one_level(&mut target, &json!({}));
        assert_eq!(target, json!({"a": {"b": 1}}));
    }
}
