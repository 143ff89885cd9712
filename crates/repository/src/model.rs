//! Persisted record shape and the generated fields the engine owns.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use versa_store::Id;
pub use versa_store::document::ID_FIELD;

pub const VERSION_FIELD: &str = "version";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const LAST_UPDATED_AT_FIELD: &str = "lastUpdatedAt";
pub const IS_DELETED_FIELD: &str = "isDeleted";

/// Field names generated by the engine. Payloads may not write them.
pub const RESERVED_FIELDS: [&str; 5] = [ID_FIELD, VERSION_FIELD, CREATED_AT_FIELD, LAST_UPDATED_AT_FIELD, IS_DELETED_FIELD];

/// Returns `true` if `path` is, or descends into, a generated field.
pub fn is_reserved(path: &str) -> bool {
    let head = path.split('.').next().unwrap_or(path);
    RESERVED_FIELDS.contains(&head)
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'_>] = time::macros::format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9][offset_hour sign:mandatory]:[offset_minute]"
);

time::serde::format_description!(
    pub timestamp,
    OffsetDateTime,
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9][offset_hour sign:mandatory]:[offset_minute]"
);

/// The current UTC time, formatted for storage.
pub(crate) fn now() -> Result<String, time::error::Format> {
    OffsetDateTime::now_utc().format(TIMESTAMP_FORMAT)
}

/// Anything with a store identifier; used to key cache entries.
pub trait Entity {
    fn id(&self) -> &Id;
}

/// A persisted, versioned record of payload `M`.
///
/// The generated fields sit alongside the payload fields in the stored
/// document. `Record` dereferences to the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<M> {
    pub id: Id,
    /// Starts at 0 and increases by exactly one on every mutation.
    pub version: u64,
    #[serde(with = "timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(with = "timestamp")]
    pub last_updated_at: OffsetDateTime,
    /// Only present in collections with soft delete enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
    #[serde(flatten)]
    pub data: M,
}

impl<M> Record<M> {
    pub fn into_data(self) -> M {
        self.data
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted.unwrap_or(false)
    }
}

impl<M> Entity for Record<M> {
    fn id(&self) -> &Id {
        &self.id
    }
}

impl<M> Deref for Record<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.data
    }
}

impl<M> DerefMut for Record<M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
    }

    #[test]
    fn test_record_document_shape() {
        let stored = json!({
            "id": "abc",
            "version": 2,
            "createdAt": "2024-01-02T03:04:05.000000006+00:00",
            "lastUpdatedAt": "2024-01-02T03:04:05.100000000+00:00",
            "name": "Ann",
        });
        let record: Record<User> = serde_json::from_value(stored.clone()).unwrap();
        assert_eq!(record.name, "Ann");
        assert_eq!(record.version, 2);
        assert_eq!(record.created_at.nanosecond(), 6);
        assert!(!record.is_deleted());
        assert_eq!(serde_json::to_value(&record).unwrap(), stored);
    }

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let earlier = now().unwrap();
        let later = OffsetDateTime::now_utc().saturating_add(time::Duration::seconds(1)).format(TIMESTAMP_FORMAT).unwrap();
        assert_eq!(earlier.len(), later.len());
        assert!(earlier < later);
        assert!(earlier.ends_with("+00:00"));
    }

    #[rstest]
    #[case("id", true)]
    #[case("version", true)]
    #[case("createdAt.year", true)]
    #[case("isDeleted", true)]
    #[case("name", false)]
    #[case("identity", false)]
    fn test_is_reserved(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_reserved(path), expected);
    }
}
