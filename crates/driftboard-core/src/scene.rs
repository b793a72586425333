//! Conversion between the canvas's in-memory state and its persisted JSON form.
//!
//! The canvas keeps some of its view state in collections JSON has no notation
//! for (sets of viewer ids, keyed maps). [`serialize`] flattens those into
//! arrays and objects before the state is stored, and [`deserialize`] rebuilds
//! the fields the canvas expects as sets when the state is loaded back.

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Field rebuilt as a set on load.
pub const FOLLOWED_BY_KEY: &str = "followedBy";

/// Field dropped on load. The canvas expects a live map of peers here and
/// faults on the plain object a stored copy would produce.
pub const COLLABORATORS_KEY: &str = "collaborators";

/// A value as held by the canvas in memory.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneValue {
    /// Absent value. Omitted from objects when serialized.
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<SceneValue>),
    /// Plain object with string keys.
    Object(BTreeMap<String, SceneValue>),
    /// Set-like collection, in iteration order.
    Set(Vec<SceneValue>),
    /// Map-like collection, in iteration order.
    Map(Vec<(String, SceneValue)>),
}

impl SceneValue {
    /// Build an empty plain object.
    pub fn object() -> Self {
        SceneValue::Object(BTreeMap::new())
    }

    /// Look up a property of a plain object.
    pub fn get(&self, key: &str) -> Option<&SceneValue> {
        match self {
            SceneValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Insert a property, turning `self` into an object if needed.
    pub fn insert(&mut self, key: impl Into<String>, value: SceneValue) {
        if !matches!(self, SceneValue::Object(_)) {
            *self = SceneValue::object();
        }
        if let SceneValue::Object(map) = self {
            map.insert(key.into(), value);
        }
    }

    pub fn as_set(&self) -> Option<&[SceneValue]> {
        match self {
            SceneValue::Set(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, SceneValue::Undefined)
    }
}

impl From<&str> for SceneValue {
    fn from(s: &str) -> Self {
        SceneValue::String(s.to_string())
    }
}

impl From<String> for SceneValue {
    fn from(s: String) -> Self {
        SceneValue::String(s)
    }
}

impl From<f64> for SceneValue {
    fn from(n: f64) -> Self {
        SceneValue::Number(n)
    }
}

impl From<i64> for SceneValue {
    fn from(n: i64) -> Self {
        SceneValue::Number(n as f64)
    }
}

impl From<bool> for SceneValue {
    fn from(b: bool) -> Self {
        SceneValue::Bool(b)
    }
}

/// Produce the JSON-safe form of a canvas value.
///
/// Sets become arrays and maps become objects, recursively. Undefined turns
/// into `null` inside arrays and at the root, and is left out of objects.
pub fn serialize(value: &SceneValue) -> Value {
    match value {
        SceneValue::Undefined | SceneValue::Null => Value::Null,
        SceneValue::Bool(b) => Value::Bool(*b),
        SceneValue::Number(n) => number_to_json(*n),
        SceneValue::String(s) => Value::String(s.clone()),
        SceneValue::Array(items) | SceneValue::Set(items) => {
            Value::Array(items.iter().map(serialize).collect())
        }
        SceneValue::Object(props) => Value::Object(serialize_entries(
            props.iter().map(|(k, v)| (k.as_str(), v)),
        )),
        SceneValue::Map(entries) => Value::Object(serialize_entries(
            entries.iter().map(|(k, v)| (k.as_str(), v)),
        )),
    }
}

fn serialize_entries<'a>(entries: impl Iterator<Item = (&'a str, &'a SceneValue)>) -> Map<String, Value> {
    entries
        .filter(|(_, v)| !v.is_undefined())
        .map(|(k, v)| (k.to_string(), serialize(v)))
        .collect()
}

fn number_to_json(n: f64) -> Value {
    // Integral values keep their integer spelling in the stored document.
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

/// Rebuild a canvas value from its persisted JSON form.
///
/// `followedBy` arrays come back as sets and `collaborators` is dropped
/// whatever it holds. Every other field is rebuilt structurally.
pub fn deserialize(value: &Value) -> SceneValue {
    match value {
        Value::Null => SceneValue::Null,
        Value::Bool(b) => SceneValue::Bool(*b),
        Value::Number(n) => SceneValue::Number(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => SceneValue::String(s.clone()),
        Value::Array(items) => SceneValue::Array(items.iter().map(deserialize).collect()),
        Value::Object(props) => {
            let mut out = BTreeMap::new();
            for (key, v) in props {
                match (key.as_str(), v) {
                    (COLLABORATORS_KEY, _) => continue,
                    (FOLLOWED_BY_KEY, Value::Array(items)) => {
                        out.insert(key.clone(), SceneValue::Set(items.iter().map(deserialize).collect()));
                    }
                    _ => {
                        out.insert(key.clone(), deserialize(v));
                    }
                }
            }
            SceneValue::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(entries: Vec<(&str, SceneValue)>) -> SceneValue {
        SceneValue::Object(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn test_set_serializes_to_array_in_order() {
        let set = SceneValue::Set(vec![1.into(), 2.into(), 3.into()]);
        assert_eq!(serialize(&set), json!([1, 2, 3]));
    }

    #[test]
    fn test_map_serializes_to_object() {
        let map = SceneValue::Map(vec![
            ("alice".into(), SceneValue::from("viewer")),
            ("bob".into(), SceneValue::Set(vec!["x".into()])),
        ]);
        assert_eq!(serialize(&map), json!({ "alice": "viewer", "bob": ["x"] }));
    }

    #[test]
    fn test_nested_collections_are_flattened() {
        let state = obj(vec![
            ("theme", "dark".into()),
            ("scroll", obj(vec![("x", 10.5.into()), ("y", (-4).into())])),
            ("selected", SceneValue::Map(vec![("el-1".into(), true.into())])),
            ("layers", SceneValue::Array(vec![SceneValue::Set(vec!["a".into(), "b".into()])])),
        ]);
        assert_eq!(
            serialize(&state),
            json!({
                "theme": "dark",
                "scroll": { "x": 10.5, "y": -4 },
                "selected": { "el-1": true },
                "layers": [["a", "b"]],
            })
        );
    }

    #[test]
    fn test_undefined_and_null_pass_through() {
        let state = obj(vec![("gone", SceneValue::Undefined), ("empty", SceneValue::Null)]);
        assert_eq!(serialize(&state), json!({ "empty": null }));
        assert_eq!(serialize(&SceneValue::Array(vec![SceneValue::Undefined])), json!([null]));
    }

    #[test]
    fn test_non_finite_number_becomes_null() {
        assert_eq!(serialize(&SceneValue::Number(f64::NAN)), Value::Null);
        assert_eq!(serialize(&SceneValue::Number(f64::INFINITY)), Value::Null);
    }

    #[test]
    fn test_followed_by_rebuilt_as_set() {
        let restored = deserialize(&json!({ "followedBy": [1, 2, 3] }));
        let set = restored.get(FOLLOWED_BY_KEY).and_then(SceneValue::as_set).unwrap();
        assert_eq!(set.to_vec(), vec![SceneValue::from(1), SceneValue::from(2), SceneValue::from(3)]);
    }

    #[test]
    fn test_followed_by_non_array_left_alone() {
        let restored = deserialize(&json!({ "followedBy": null }));
        assert_eq!(restored.get(FOLLOWED_BY_KEY), Some(&SceneValue::Null));
    }

    #[test]
    fn test_collaborators_dropped() {
        let restored = deserialize(&json!({ "collaborators": { "a": 1 }, "other": "x" }));
        assert_eq!(restored, obj(vec![("other", "x".into())]));

        let nested = deserialize(&json!({ "inner": { "collaborators": [], "keep": 1 } }));
        assert_eq!(nested, obj(vec![("inner", obj(vec![("keep", 1.into())]))]));
    }

    #[test]
    fn test_plain_tree_round_trips() {
        let tree = obj(vec![
            ("name", "board".into()),
            ("zoom", 1.25.into()),
            ("grid", SceneValue::Null),
            ("flags", SceneValue::Array(vec![true.into(), false.into()])),
            ("view", obj(vec![("x", 0.into()), ("labels", SceneValue::Array(vec!["a".into()]))])),
        ]);
        assert_eq!(deserialize(&serialize(&tree)), tree);
    }

    #[test]
    fn test_round_trip_turns_collections_plain() {
        let tree = obj(vec![
            ("tags", SceneValue::Set(vec!["a".into(), "b".into()])),
            ("lookup", SceneValue::Map(vec![("k".into(), 2.into())])),
        ]);
        let expected = obj(vec![
            ("tags", SceneValue::Array(vec!["a".into(), "b".into()])),
            ("lookup", obj(vec![("k", 2.into())])),
        ]);
        assert_eq!(deserialize(&serialize(&tree)), expected);
    }

    #[test]
    fn test_followed_by_survives_round_trip() {
        let state = obj(vec![(FOLLOWED_BY_KEY, SceneValue::Set(vec!["peer-1".into()]))]);
        assert_eq!(deserialize(&serialize(&state)), state);
    }
}
