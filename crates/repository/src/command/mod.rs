//! Repository operations.
//!
//! Every operation is a plain async function of a [`Context`] and its
//! arguments. Commands share no state beyond what the context borrows, and
//! return records; presentation happens in the facade.

pub(crate) mod admin;
pub(crate) mod query;
pub(crate) mod read;
pub(crate) mod write;

use crate::error::{ErrorKind, Result};
use crate::model::{self, IS_DELETED_FIELD, LAST_UPDATED_AT_FIELD, Record, VERSION_FIELD, is_reserved};
use crate::settings::Settings;
use crate::validation::{Mode, Violation, Violations};
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use versa_store::{Collection, Document, Field, Filter, Mutation, Session};

/// Everything a command needs to know about the repository it runs for.
pub(crate) struct Context<'a> {
    pub collection: &'a Collection,
    pub settings: &'a Settings,
    pub session: Option<&'a Session>,
    /// Let reads see soft-deleted records.
    pub include_deleted: bool,
}

impl Context<'_> {
    pub fn name(&self) -> &str {
        self.collection.name()
    }

    /// Restrict a read to live records unless the view includes deleted ones.
    pub fn read_scope(&self, filter: Filter) -> Filter {
        match self.settings.soft_delete && !self.include_deleted {
            true => filter.and(not_deleted()),
            false => filter,
        }
    }

    /// Restrict a write to live records. Soft-deleted records are never
    /// mutated, whatever the view.
    pub fn write_scope(&self, filter: Filter) -> Filter {
        match self.settings.soft_delete {
            true => filter.and(not_deleted()),
            false => filter,
        }
    }

    /// Run the configured validator when `enabled`.
    pub fn validate(&self, enabled: bool, mode: Mode, document: &Document) -> Result<()> {
        let Some(validator) = self.settings.validator.as_ref().filter(|_| enabled) else {
            return Ok(());
        };
        let violations = validator.validate(document, mode, &self.settings.validation_options);
        if !violations.is_empty() {
            tracing::debug!(collection = self.name(), %mode, violations = violations.len(), "Validation failed");
            exn::bail!(ErrorKind::Validation(Violations::from(violations)));
        }
        Ok(())
    }

    /// Transform a stored document into a record.
    pub fn decode<M: DeserializeOwned>(&self, document: Document) -> Result<Record<M>> {
        serde_json::from_value(Value::Object(document))
            .or_raise(|| ErrorKind::InvalidData(format!("stored document in {} does not match the model", self.name())))
    }

    /// Transform a document returned by a read, validating it first when
    /// read validation is on.
    pub fn decode_read<M: DeserializeOwned>(&self, document: Document) -> Result<Record<M>> {
        self.validate(self.settings.validate_get, Mode::Read, &document)?;
        self.decode(document)
    }

    pub fn decode_all<M: DeserializeOwned>(&self, documents: Vec<Document>) -> Result<Vec<Record<M>>> {
        documents.into_iter().map(|document| self.decode_read(document)).collect()
    }
}

/// Records that were never deleted, or were soft-delete aware from the start.
pub(crate) fn not_deleted() -> Filter {
    Filter::Or(vec![Field::new(IS_DELETED_FIELD).eq(false), Field::new(IS_DELETED_FIELD).missing()])
}

/// Serialize a caller payload into a document, rejecting generated fields.
pub(crate) fn payload<T: Serialize + ?Sized>(value: &T) -> Result<Document> {
    let value = serde_json::to_value(value).or_raise(|| ErrorKind::InvalidData("payload is not serializable".into()))?;
    let Value::Object(document) = value else {
        exn::bail!(ErrorKind::InvalidData("payload must serialize to an object".into()));
    };
    reject_reserved(document.keys().map(String::as_str))?;
    Ok(document)
}

pub(crate) fn reject_reserved<'a>(paths: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let violations: Vec<_> = paths
        .into_iter()
        .filter(|path| is_reserved(path))
        .map(|path| Violation::new(path, "is generated by the repository and cannot be written"))
        .collect();
    if !violations.is_empty() {
        exn::bail!(ErrorKind::Validation(Violations::from(violations)));
    }
    Ok(())
}

/// Add the version increment and timestamp refresh to a mutation, so they
/// travel in the same atomic store request.
pub(crate) fn stamp(mutation: Mutation) -> Result<Mutation> {
    let now = model::now().or_raise(|| ErrorKind::InvalidData("timestamp".into()))?;
    Ok(mutation.merge(Mutation::new().set(LAST_UPDATED_AT_FIELD, now).inc(VERSION_FIELD, 1)))
}

/// The soft-delete mutation.
pub(crate) fn mark_deleted() -> Result<Mutation> {
    stamp(Mutation::new().set(IS_DELETED_FIELD, true))
}
