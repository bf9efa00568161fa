// ── Condition operators ──
//
// Comparisons are number-aware: a numeric string compares as a number
// against a number, so `"36.5" gt 35` holds. Anything the operator cannot
// compare is simply false.

use std::cmp::Ordering;

use serde_json::Value;

use crate::model::ConditionOperator;

/// Apply `op` to `actual` (looked up on the event) and `expected` (from
/// the rule).
pub fn holds(op: ConditionOperator, actual: &Value, expected: &Value) -> bool {
    match op {
        ConditionOperator::Eq => equals(actual, expected),
        ConditionOperator::Ne => !equals(actual, expected),
        ConditionOperator::Gt => compare(actual, expected) == Some(Ordering::Greater),
        ConditionOperator::Gte => matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        ConditionOperator::Lt => compare(actual, expected) == Some(Ordering::Less),
        ConditionOperator::Lte => matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        ConditionOperator::Contains => contains(actual, expected),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn equals(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(_), _) | (_, Value::Number(_)) => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(b)) => (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0),
            _ => false,
        },
        _ => actual == expected,
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        if matches!(actual, Value::Number(_)) || matches!(expected, Value::Number(_)) {
            return a.partial_cmp(&b);
        }
    }
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(haystack) => match expected {
            Value::String(needle) => haystack.contains(needle.as_str()),
            Value::Number(n) => haystack.contains(&n.to_string()),
            Value::Bool(b) => haystack.contains(&b.to_string()),
            _ => false,
        },
        Value::Array(items) => items.iter().any(|item| equals(item, expected)),
        Value::Object(map) => expected.as_str().is_some_and(|k| map.contains_key(k)),
        _ => false,
    }
}

/// Resolve a dotted path (`a.b.0.c`) inside a JSON document.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_comparisons() {
        assert!(holds(ConditionOperator::Gt, &json!(36.5), &json!(35)));
        assert!(!holds(ConditionOperator::Gt, &json!(35), &json!(35)));
        assert!(holds(ConditionOperator::Gte, &json!(35), &json!(35)));
        assert!(holds(ConditionOperator::Lt, &json!(-1), &json!(0)));
        assert!(holds(ConditionOperator::Lte, &json!(0.0), &json!(0)));
    }

    #[test]
    fn numeric_strings_compare_as_numbers() {
        assert!(holds(ConditionOperator::Gt, &json!("100"), &json!(35)));
        assert!(holds(ConditionOperator::Eq, &json!("35.0"), &json!(35)));
    }

    #[test]
    fn string_and_bool_equality() {
        assert!(holds(ConditionOperator::Eq, &json!("offline"), &json!("offline")));
        assert!(holds(ConditionOperator::Ne, &json!("online"), &json!("offline")));
        assert!(holds(ConditionOperator::Eq, &json!(true), &json!(true)));
        assert!(!holds(ConditionOperator::Eq, &json!(true), &json!(1)));
    }

    #[test]
    fn incomparable_values_never_hold() {
        assert!(!holds(ConditionOperator::Gt, &json!(true), &json!(1)));
        assert!(!holds(ConditionOperator::Lt, &json!(null), &json!(1)));
        assert!(!holds(ConditionOperator::Gt, &json!("abc"), &json!(1)));
    }

    #[test]
    fn contains_on_strings_arrays_objects() {
        assert!(holds(ConditionOperator::Contains, &json!("door open"), &json!("open")));
        assert!(holds(ConditionOperator::Contains, &json!([1, 2, 3]), &json!(2)));
        assert!(holds(ConditionOperator::Contains, &json!({ "zone": 1 }), &json!("zone")));
        assert!(!holds(ConditionOperator::Contains, &json!(42), &json!(4)));
    }

    #[test]
    fn dotted_path_lookup() {
        let doc = json!({ "a": { "b": [ { "c": 7 } ] } });
        assert_eq!(lookup_path(&doc, "a.b.0.c"), Some(&json!(7)));
        assert_eq!(lookup_path(&doc, "a.x"), None);
        assert_eq!(lookup_path(&doc, "a.b.9"), None);
    }
}
