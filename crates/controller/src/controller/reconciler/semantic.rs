//! # Semantic derivative equality
//!
//! One-sided equality over the triple (payload, labels, annotations) of a
//! child resource. `expected` need not list every field present on
//! `current`; fields the server defaulted or other actors added never force
//! an update. Slices compare element-wise at equal length, maps compare per
//! present key, and absent/empty expected values are satisfied vacuously.

use kube::Resource;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Whether `expected` is a derivative of `current`: every field `expected`
/// sets is present and derivative-equal on `current`.
#[must_use]
pub fn is_derivative(expected: &Value, current: &Value) -> bool {
    match (expected, current) {
        (Value::Null, _) => true,
        (Value::Object(exp), Value::Object(cur)) => exp.iter().all(|(key, value)| {
            match cur.get(key) {
                Some(current_value) => is_derivative(value, current_value),
                None => is_vacuous(value),
            }
        }),
        (Value::Array(exp), Value::Array(cur)) => {
            exp.len() == cur.len() && exp.iter().zip(cur).all(|(e, c)| is_derivative(e, c))
        }
        (exp, cur) => exp == cur,
    }
}

/// Values that are satisfied by a missing counterpart: null, empty string,
/// empty map, empty list. Mirrors the admission chain's treatment of unset
/// fields.
fn is_vacuous(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Derivative map containment: every entry of `expected` appears verbatim in
/// `current`.
#[must_use]
pub fn is_map_subset(
    expected: Option<&BTreeMap<String, String>>,
    current: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    expected
        .iter()
        .all(|(k, v)| current.is_some_and(|cur| cur.get(k) == Some(v)))
}

/// Derivative equality of two typed objects over (payload, labels,
/// annotations). The payload is the serialized object minus type and object
/// metadata, so it covers `spec` for spec-carrying kinds and top-level
/// payload fields (`rules`, `subjects`, `data`, ...) for the rest. Status is
/// never compared.
#[must_use]
pub fn semantic_eq<K>(expected: &K, current: &K) -> bool
where
    K: Resource<DynamicType = ()> + Serialize,
{
    if !is_map_subset(
        expected.meta().labels.as_ref(),
        current.meta().labels.as_ref(),
    ) || !is_map_subset(
        expected.meta().annotations.as_ref(),
        current.meta().annotations.as_ref(),
    ) {
        return false;
    }
    is_derivative(&payload(expected), &payload(current))
}

fn payload<K: Serialize>(object: &K) -> Value {
    let mut value = serde_json::to_value(object).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.remove("apiVersion");
        map.remove("kind");
        map.remove("metadata");
        map.remove("status");
    }
    value
}
