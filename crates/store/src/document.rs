//! Documents, identifiers and field path helpers.
//!
//! A [`Document`] is a JSON object. Fields are addressed with dotted paths
//! (`"address.city"`), which descend through nested objects. The `id` field is
//! owned by the store: it is assigned on insert and never rewritten by a
//! mutation.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// Name of the field holding the document identifier.
pub const ID_FIELD: &str = "id";

/// Opaque document identifier.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read the identifier of a stored document, if it carries one.
    pub fn of(document: &Document) -> Option<Self> {
        document.get(ID_FIELD).and_then(Value::as_str).map(Self::from)
    }
}
impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
impl From<String> for Id {
    fn from(value: String) -> Self {
        Self(value)
    }
}
impl From<Id> for Value {
    fn from(id: Id) -> Self {
        Value::String(id.0)
    }
}
impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Look up the value at a dotted path.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write `value` at a dotted path, creating intermediate objects as needed.
///
/// Returns `false` (leaving the document untouched) if an intermediate
/// segment exists but is not an object.
pub fn assign(document: &mut Document, path: &str, value: Value) -> bool {
    match path.split_once('.') {
        None => {
            document.insert(path.to_string(), value);
            true
        },
        Some((head, rest)) => {
            let child = document.entry(head.to_string()).or_insert_with(|| Value::Object(Map::new()));
            match child.as_object_mut() {
                Some(object) => assign(object, rest, value),
                None => false,
            }
        },
    }
}

/// Remove the value at a dotted path, returning it if it existed.
pub fn remove(document: &mut Document, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => remove(document.get_mut(head)?.as_object_mut()?, rest),
    }
}

// Cross-type ordering used for sorting and range comparisons: null, numbers,
// strings, objects, arrays, booleans.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values.
///
/// Numbers compare numerically regardless of their integer/float encoding.
pub fn compare(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                match compare(x, y) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            a.len().cmp(&b.len())
        },
        (Value::Object(a), Value::Object(b)) => {
            for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                match ka.cmp(kb).then_with(|| compare(va, vb)) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            a.len().cmp(&b.len())
        },
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.total_cmp(&y)
}

/// Equality consistent with [`compare`] (so `1` equals `1.0`).
pub fn equals(left: &Value, right: &Value) -> bool {
    compare(left, right) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    #[test]
    fn test_lookup_nested() {
        let document = doc(json!({"name": "Ann", "address": {"city": "Oslo"}}));
        assert_eq!(lookup(&document, "name"), Some(&json!("Ann")));
        assert_eq!(lookup(&document, "address.city"), Some(&json!("Oslo")));
        assert_eq!(lookup(&document, "address.zip"), None);
        assert_eq!(lookup(&document, "name.first"), None);
    }

    #[test]
    fn test_assign_creates_intermediate_objects() {
        let mut document = Document::new();
        assert!(assign(&mut document, "a.b.c", json!(1)));
        assert_eq!(Value::Object(document), json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_assign_refuses_to_descend_into_scalars() {
        let mut document = doc(json!({"a": 5}));
        assert!(!assign(&mut document, "a.b", json!(1)));
        assert_eq!(Value::Object(document), json!({"a": 5}));
    }

    #[test]
    fn test_remove_nested() {
        let mut document = doc(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(remove(&mut document, "a.b"), Some(json!(1)));
        assert_eq!(remove(&mut document, "a.missing"), None);
        assert_eq!(Value::Object(document), json!({"a": {"c": 2}}));
    }

    #[rstest]
    #[case(json!(1), json!(1.0), Ordering::Equal)]
    #[case(json!(2), json!(10), Ordering::Less)]
    #[case(json!(-1), json!(u64::MAX), Ordering::Less)]
    #[case(json!("b"), json!("a"), Ordering::Greater)]
    #[case(json!(null), json!(0), Ordering::Less)]
    #[case(json!(100), json!("1"), Ordering::Less)]
    #[case(json!([1, 2]), json!([1, 2, 3]), Ordering::Less)]
    #[case(json!(true), json!({"a": 1}), Ordering::Greater)]
    fn test_compare(#[case] left: Value, #[case] right: Value, #[case] expected: Ordering) {
        assert_eq!(compare(&left, &right), expected);
    }

    #[test]
    fn test_id_of_document() {
        let document = doc(json!({"id": "abc", "name": "Ann"}));
        assert_eq!(Id::of(&document), Some(Id::from("abc")));
        assert_eq!(Id::of(&Document::new()), None);
        assert_ne!(Id::generate(), Id::generate());
    }
}
