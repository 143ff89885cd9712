//! Mutations applied atomically to matched documents.

use crate::document::{Document, ID_FIELD, assign, lookup, remove};
use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// A set of field operators applied to a single document in one step.
///
/// Operators are applied in a fixed order: `replace`, then `set`, then
/// `unset`, then `inc`. The `id` field is never affected.
///
/// ```
/// use versa_store::Mutation;
///
/// let mutation = Mutation::new().set("name", "Bea").inc("version", 1);
/// assert!(!mutation.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    replace: Option<Replacement>,
    set: Vec<(String, Value)>,
    unset: Vec<String>,
    inc: Vec<(String, i64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Replacement {
    body: Document,
    preserve: Vec<String>,
}

impl Mutation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole document body, keeping `id` and any `preserve`d
    /// top-level fields from the stored document.
    pub fn replace(body: Document, preserve: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            replace: Some(Replacement { body, preserve: preserve.into_iter().map(Into::into).collect() }),
            ..Self::default()
        }
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((path.into(), value.into()));
        self
    }

    /// Set every top-level field of `fields`.
    pub fn set_all(mut self, fields: Document) -> Self {
        self.set.extend(fields);
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    /// Add `delta` to a numeric field; a missing field is treated as `0`.
    pub fn inc(mut self, path: impl Into<String>, delta: i64) -> Self {
        self.inc.push((path.into(), delta));
        self
    }

    /// Returns `true` if the mutation replaces the whole document body.
    pub fn is_replacement(&self) -> bool {
        self.replace.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.replace.is_none() && self.set.is_empty() && self.unset.is_empty() && self.inc.is_empty()
    }

    /// Every path this mutation writes to (top-level names for replacements).
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        let replaced = self.replace.iter().flat_map(|r| r.body.keys().map(String::as_str));
        replaced
            .chain(self.set.iter().map(|(path, _)| path.as_str()))
            .chain(self.unset.iter().map(String::as_str))
            .chain(self.inc.iter().map(|(path, _)| path.as_str()))
    }

    /// Values written by `set`, in order.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.set.iter().map(|(path, value)| (path.as_str(), value))
    }

    /// Append the operators of `other` after this mutation's own.
    pub fn merge(mut self, other: Mutation) -> Self {
        if other.replace.is_some() {
            self.replace = other.replace;
        }
        self.set.extend(other.set);
        self.unset.extend(other.unset);
        self.inc.extend(other.inc);
        self
    }

    /// Apply the mutation, returning the post-image.
    pub fn apply(&self, document: &Document) -> Result<Document> {
        let mut next = match &self.replace {
            None => document.clone(),
            Some(replacement) => {
                let mut body = replacement.body.clone();
                for key in &replacement.preserve {
                    match document.get(key) {
                        Some(value) => body.insert(key.clone(), value.clone()),
                        None => body.remove(key),
                    };
                }
                body
            },
        };
        if let Some(id) = document.get(ID_FIELD) {
            next.insert(ID_FIELD.to_string(), id.clone());
        }
        for (path, value) in &self.set {
            guard_id(path)?;
            if !assign(&mut next, path, value.clone()) {
                exn::bail!(ErrorKind::InvalidMutation(path.clone(), "parent is not an object"));
            }
        }
        for path in &self.unset {
            guard_id(path)?;
            remove(&mut next, path);
        }
        for (path, delta) in &self.inc {
            guard_id(path)?;
            let current = lookup(&next, path).cloned().unwrap_or_else(|| Value::from(0));
            let updated = increment(&current, *delta).ok_or_else(|| {
                exn::Exn::from(ErrorKind::InvalidMutation(path.clone(), "cannot increment a non-numeric value"))
            })?;
            if !assign(&mut next, path, updated) {
                exn::bail!(ErrorKind::InvalidMutation(path.clone(), "parent is not an object"));
            }
        }
        Ok(next)
    }
}

fn guard_id(path: &str) -> Result<()> {
    if path == ID_FIELD || path.starts_with("id.") {
        exn::bail!(ErrorKind::InvalidMutation(path.to_string(), "the id field is immutable"));
    }
    Ok(())
}

fn increment(current: &Value, delta: i64) -> Option<Value> {
    let Value::Number(number) = current else {
        return None;
    };
    if let Some(value) = number.as_i64() {
        return value.checked_add(delta).map(Value::from);
    }
    if let Some(value) = number.as_u64() {
        return match delta >= 0 {
            true => value.checked_add(delta.unsigned_abs()).map(Value::from),
            false => value.checked_sub(delta.unsigned_abs()).map(Value::from),
        };
    }
    number.as_f64().and_then(|value| Number::from_f64(value + delta as f64)).map(Value::Number)
}
