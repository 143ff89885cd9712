//! Query options and index specifications.

use crate::document::{Document, compare, lookup};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ascending,
    Descending,
}

/// Multi-key sort order. Earlier keys take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort(Vec<(String, Direction)>);

impl Sort {
    pub fn ascending(path: impl Into<String>) -> Self {
        Self(vec![(path.into(), Direction::Ascending)])
    }

    pub fn descending(path: impl Into<String>) -> Self {
        Self(vec![(path.into(), Direction::Descending)])
    }

    pub fn then_ascending(mut self, path: impl Into<String>) -> Self {
        self.0.push((path.into(), Direction::Ascending));
        self
    }

    pub fn then_descending(mut self, path: impl Into<String>) -> Self {
        self.0.push((path.into(), Direction::Descending));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> &[(String, Direction)] {
        &self.0
    }

    /// Compare two documents under this sort order. Missing fields sort as
    /// `null`.
    pub fn compare(&self, left: &Document, right: &Document) -> Ordering {
        static NULL: Value = Value::Null;
        for (path, direction) in &self.0 {
            let ordering = compare(lookup(left, path).unwrap_or(&NULL), lookup(right, path).unwrap_or(&NULL));
            let ordering = match direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Options for multi-document reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindOptions {
    /// Number of matching documents to skip.
    pub skip: u64,
    /// Maximum number of documents to return (`None` for unbounded).
    pub limit: Option<u64>,
    /// Sort order; insertion order when empty.
    pub sort: Sort,
}

impl FindOptions {
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    /// Sort, skip and truncate an already filtered result set.
    pub fn arrange(&self, mut documents: Vec<Document>) -> Vec<Document> {
        if !self.sort.is_empty() {
            // Stable sort keeps insertion order between equal keys.
            documents.sort_by(|a, b| self.sort.compare(a, b));
        }
        let skip = usize::try_from(self.skip).unwrap_or(usize::MAX);
        let limit = self.limit.map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        documents.into_iter().skip(skip).take(limit).collect()
    }
}

/// Secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<(String, Direction)>,
    /// Reject documents whose key tuple is already present. Documents with a
    /// missing or `null` key field are not constrained.
    pub unique: bool,
}

impl IndexSpec {
    /// Single-field ascending index named `<field>_1`.
    pub fn on(path: impl Into<String>) -> Self {
        let path = path.into();
        Self { name: format!("{path}_1"), keys: vec![(path, Direction::Ascending)], unique: false }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn and_on(mut self, path: impl Into<String>, direction: Direction) -> Self {
        self.keys.push((path.into(), direction));
        self
    }

    /// The key tuple of a document, or `None` when any key field is missing
    /// or `null`.
    pub fn key_of(&self, document: &Document) -> Option<Vec<Value>> {
        self.keys
            .iter()
            .map(|(path, _)| lookup(document, path).filter(|value| !value.is_null()).cloned())
            .collect()
    }
}
