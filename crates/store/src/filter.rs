//! Filter expressions evaluated against documents.
//!
//! Filters are plain data so that every backend can evaluate them the same
//! way. Comparison operators follow document-store conventions: a field that
//! holds an array matches an equality test if any element is equal, range
//! operators only compare values of the same type class, and `Ne`/`Nin` match
//! documents where the field is missing.

use crate::document::{Document, ID_FIELD, Id, compare, equals, lookup};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A predicate over documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Matches every document.
    All,
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    Nin(String, Vec<Value>),
    /// `Exists(path, true)` matches documents where the path is present.
    Exists(String, bool),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Self::All
    }
}

impl Filter {
    /// Match a single document by identifier.
    pub fn id(id: &Id) -> Self {
        Self::Eq(ID_FIELD.to_string(), Value::from(id.clone()))
    }

    /// Combine with another filter; both must hold.
    ///
    /// `All` is the identity, and nested `And`s are flattened so that the
    /// result stays readable in logs.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Self::All, other) | (other, Self::All) => other,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            },
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            },
            (this, Self::And(mut right)) => {
                right.insert(0, this);
                Self::And(right)
            },
            (this, other) => Self::And(vec![this, other]),
        }
    }

    /// Combine with another filter; either may hold.
    pub fn or(self, other: Filter) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            },
            (this, other) => Self::Or(vec![this, other]),
        }
    }

    /// Negate this filter.
    pub fn negate(self) -> Self {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    /// Evaluate the filter against a document.
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::All => true,
            Self::Eq(path, expected) => field_equals(lookup(document, path), expected),
            Self::Ne(path, expected) => !field_equals(lookup(document, path), expected),
            Self::Gt(path, bound) => field_compares(lookup(document, path), bound, |o| o == Ordering::Greater),
            Self::Gte(path, bound) => field_compares(lookup(document, path), bound, |o| o != Ordering::Less),
            Self::Lt(path, bound) => field_compares(lookup(document, path), bound, |o| o == Ordering::Less),
            Self::Lte(path, bound) => field_compares(lookup(document, path), bound, |o| o != Ordering::Greater),
            Self::In(path, candidates) => {
                let actual = lookup(document, path);
                candidates.iter().any(|candidate| field_equals(actual, candidate))
            },
            Self::Nin(path, candidates) => {
                let actual = lookup(document, path);
                !candidates.iter().any(|candidate| field_equals(actual, candidate))
            },
            Self::Exists(path, expected) => lookup(document, path).is_some() == *expected,
            Self::And(filters) => filters.iter().all(|filter| filter.matches(document)),
            Self::Or(filters) => filters.iter().any(|filter| filter.matches(document)),
            Self::Not(filter) => !filter.matches(document),
        }
    }

    /// The identifier this filter pins the match to, if any.
    ///
    /// Backends use this to narrow a scan to a single row before evaluating
    /// the rest of the filter.
    pub fn pinned_id(&self) -> Option<&str> {
        match self {
            Self::Eq(path, Value::String(id)) if path == ID_FIELD => Some(id),
            Self::And(filters) => filters.iter().find_map(Filter::pinned_id),
            _ => None,
        }
    }

    /// Returns `true` when the filter matches every document.
    pub fn is_all(&self) -> bool {
        match self {
            Self::All => true,
            Self::And(filters) => filters.iter().all(Filter::is_all),
            _ => false,
        }
    }
}

// A missing field equals `null`, mirroring how document stores treat absent
// fields in equality tests.
fn field_equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => items.iter().any(|item| equals(item, expected)),
        Some(value) => equals(value, expected),
    }
}

fn same_class(left: &Value, right: &Value) -> bool {
    matches!(
        (left, right),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Array(_), Value::Array(_))
            | (Value::Object(_), Value::Object(_))
            | (Value::Null, Value::Null)
    )
}

fn field_compares(actual: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match actual {
        None => false,
        Some(Value::Array(items)) if !bound.is_array() => {
            items.iter().any(|item| same_class(item, bound) && accept(compare(item, bound)))
        },
        Some(value) => same_class(value, bound) && accept(compare(value, bound)),
    }
}

/// Fluent filter construction for a single field.
///
/// ```
/// use versa_store::filter::{Field, Filter};
///
/// let adults = Field::new("age").gte(18).and(Field::new("name").exists());
/// assert!(matches!(adults, Filter::And(_)));
/// ```
#[derive(Debug, Clone)]
pub struct Field(String);

impl Field {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn eq(self, value: impl Into<Value>) -> Filter {
        Filter::Eq(self.0, value.into())
    }

    pub fn ne(self, value: impl Into<Value>) -> Filter {
        Filter::Ne(self.0, value.into())
    }

    pub fn gt(self, value: impl Into<Value>) -> Filter {
        Filter::Gt(self.0, value.into())
    }

    pub fn gte(self, value: impl Into<Value>) -> Filter {
        Filter::Gte(self.0, value.into())
    }

    pub fn lt(self, value: impl Into<Value>) -> Filter {
        Filter::Lt(self.0, value.into())
    }

    pub fn lte(self, value: impl Into<Value>) -> Filter {
        Filter::Lte(self.0, value.into())
    }

    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Filter {
        Filter::In(self.0, values.into_iter().map(Into::into).collect())
    }

    pub fn not_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Filter {
        Filter::Nin(self.0, values.into_iter().map(Into::into).collect())
    }

    pub fn exists(self) -> Filter {
        Filter::Exists(self.0, true)
    }

    pub fn missing(self) -> Filter {
        Filter::Exists(self.0, false)
    }
}
