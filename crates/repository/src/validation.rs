//! Validation of payloads and stored documents.
//!
//! Rules are explicit: a repository is given a [`Validator`], usually a
//! [`Schema`] built from [`Rule`]s, and each toggle in the repository settings
//! decides whether it runs for adds, updates, replaces and reads.

use derive_more::Display;
use serde_json::Value;
use std::fmt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use versa_store::Document;
use versa_store::document::lookup;

use crate::model::is_reserved;

/// Which operation the document is being validated for.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A new record about to be inserted.
    #[display("create")]
    Create,
    /// A partial update: only the supplied fields are present, so missing
    /// fields are never reported.
    #[display("update")]
    Update,
    /// A full replacement of an existing record.
    #[display("replace")]
    Replace,
    /// A document read back from the store.
    #[display("read")]
    Read,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Do not report missing required fields in any mode.
    pub skip_missing: bool,
    /// Report top-level fields the schema does not describe.
    pub forbid_unknown: bool,
    /// Stop after the first violation.
    pub stop_at_first: bool,
}

/// A single broken rule.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("{path}: {message}")]
pub struct Violation {
    /// Dotted path of the offending field.
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

/// Every violation found in one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations(Vec<Violation>);

impl Violations {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.0.iter()
    }

    /// Returns `true` if any violation concerns `path`.
    pub fn mentions(&self, path: &str) -> bool {
        self.0.iter().any(|violation| violation.path == path)
    }
}

impl From<Vec<Violation>> for Violations {
    fn from(violations: Vec<Violation>) -> Self {
        Self(violations)
    }
}

impl IntoIterator for Violations {
    type Item = Violation;
    type IntoIter = std::vec::IntoIter<Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, violation) in self.0.iter().enumerate() {
            if position > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

/// Validates documents before they are written or after they are read.
pub trait Validator: Send + Sync {
    fn validate(&self, document: &Document, mode: Mode, options: &ValidationOptions) -> Vec<Violation>;
}

impl<F> Validator for F
where
    F: Fn(&Document, Mode, &ValidationOptions) -> Vec<Violation> + Send + Sync,
{
    fn validate(&self, document: &Document, mode: Mode, options: &ValidationOptions) -> Vec<Violation> {
        self(document, mode, options)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Any,
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// An RFC 3339 timestamp string.
    Timestamp,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Timestamp => value.as_str().is_some_and(|s| OffsetDateTime::parse(s, &Rfc3339).is_ok()),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Any => "any value",
            Self::String => "a string",
            Self::Integer => "an integer",
            Self::Number => "a number",
            Self::Boolean => "a boolean",
            Self::Array => "an array",
            Self::Object => "an object",
            Self::Timestamp => "an RFC 3339 timestamp",
        }
    }
}

/// Constraints on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    path: String,
    kind: FieldType,
    required: bool,
    nullable: bool,
    non_empty: bool,
    min: Option<f64>,
    max: Option<f64>,
}

impl Rule {
    pub fn required(path: impl Into<String>, kind: FieldType) -> Self {
        Self { path: path.into(), kind, required: true, nullable: false, non_empty: false, min: None, max: None }
    }

    pub fn optional(path: impl Into<String>, kind: FieldType) -> Self {
        Self { required: false, ..Self::required(path, kind) }
    }

    /// Accept an explicit `null`.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Strings and arrays must have at least one element.
    pub fn non_empty(mut self) -> Self {
        self.non_empty = true;
        self
    }

    /// Lower bound for numbers.
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Upper bound for numbers.
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    fn check(&self, document: &Document, mode: Mode, options: &ValidationOptions) -> Option<String> {
        let Some(value) = lookup(document, &self.path) else {
            let report = self.required && mode != Mode::Update && !options.skip_missing;
            return report.then(|| "is required".to_string());
        };
        if value.is_null() {
            return match self.nullable {
                true => None,
                false => Some("must not be null".to_string()),
            };
        }
        if !self.kind.accepts(value) {
            return Some(format!("must be {}", self.kind.describe()));
        }
        if self.non_empty {
            let empty = match value {
                Value::String(s) => s.is_empty(),
                Value::Array(items) => items.is_empty(),
                _ => false,
            };
            if empty {
                return Some("must not be empty".to_string());
            }
        }
        if let Some(number) = value.as_f64() {
            if self.min.is_some_and(|min| number < min) {
                return self.min.map(|min| format!("must be at least {min}"));
            }
            if self.max.is_some_and(|max| number > max) {
                return self.max.map(|max| format!("must be at most {max}"));
            }
        }
        None
    }
}

/// A declarative [`Validator`].
///
/// ```
/// use versa_repository::validation::{FieldType, Mode, Rule, Schema, ValidationOptions, Validator};
///
/// let schema = Schema::new()
///     .rule(Rule::required("name", FieldType::String).non_empty())
///     .rule(Rule::optional("age", FieldType::Integer).min(0.0));
/// let document = serde_json::json!({"age": -1}).as_object().cloned().unwrap_or_default();
/// let violations = schema.validate(&document, Mode::Create, &ValidationOptions::default());
/// assert_eq!(violations.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    rules: Vec<Rule>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    fn describes(&self, field: &str) -> bool {
        self.rules.iter().any(|rule| rule.path.split('.').next() == Some(field))
    }
}

impl Validator for Schema {
    fn validate(&self, document: &Document, mode: Mode, options: &ValidationOptions) -> Vec<Violation> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            if let Some(message) = rule.check(document, mode, options) {
                violations.push(Violation::new(rule.path.clone(), message));
                if options.stop_at_first {
                    return violations;
                }
            }
        }
        if options.forbid_unknown {
            let unknown = document.keys().filter(|field| !is_reserved(field) && !self.describes(field));
            for field in unknown {
                violations.push(Violation::new(field.clone(), "is not allowed"));
                if options.stop_at_first {
                    break;
                }
            }
        }
        violations
    }
}
