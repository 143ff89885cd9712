//! Single-record writes: add, replace, update and delete.

use super::{Context, mark_deleted, payload, reject_reserved, stamp};
use crate::error::{ErrorKind, Result};
use crate::model::{self, CREATED_AT_FIELD, IS_DELETED_FIELD, LAST_UPDATED_AT_FIELD, Record, VERSION_FIELD};
use crate::validation::Mode;
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::instrument;
use versa_store::document::assign;
use versa_store::{Document, Field, Filter, Id, Mutation};

/// Compose a draft from the payload and the generated fields, validate it,
/// then insert it.
#[instrument(skip_all, fields(collection = cx.name()))]
pub(crate) async fn add<M: Serialize>(cx: &Context<'_>, model: &M) -> Result<Id> {
    let mut draft = payload(model)?;
    let now = model::now().or_raise(|| ErrorKind::InvalidData("timestamp".into()))?;
    draft.insert(VERSION_FIELD.to_string(), Value::from(0));
    draft.insert(CREATED_AT_FIELD.to_string(), Value::from(now.clone()));
    draft.insert(LAST_UPDATED_AT_FIELD.to_string(), Value::from(now));
    if cx.settings.soft_delete {
        draft.insert(IS_DELETED_FIELD.to_string(), Value::from(false));
    }
    cx.validate(cx.settings.validate_add, Mode::Create, &draft)?;
    let id = cx.collection.insert(draft, cx.session).await.map_err(ErrorKind::store)?;
    tracing::debug!(collection = cx.name(), %id, "Record added");
    Ok(id)
}

/// Replace the payload of the record whose id and version both match.
///
/// `createdAt` and `isDeleted` are kept from the stored document; a stale
/// version, a missing id or a soft-deleted record all yield `None`.
#[instrument(skip_all, fields(collection = cx.name(), id = %record.id, version = record.version))]
pub(crate) async fn replace<M>(cx: &Context<'_>, record: &Record<M>) -> Result<Option<Record<M>>>
where
    M: Serialize + DeserializeOwned,
{
    let body = payload(&record.data)?;
    if cx.settings.validate_replace {
        let full = payload_with_generated(record)?;
        cx.validate(true, Mode::Replace, &full)?;
    }
    let filter = cx.write_scope(Filter::id(&record.id).and(Field::new(VERSION_FIELD).eq(record.version)));
    let mutation = stamp(Mutation::replace(body, [CREATED_AT_FIELD, IS_DELETED_FIELD, VERSION_FIELD]))?;
    let replaced = cx.collection.find_one_and_mutate(&filter, &mutation, cx.session).await.map_err(ErrorKind::store)?;
    tracing::debug!(
        collection = cx.name(),
        id = %record.id,
        expected_version = record.version,
        replaced = replaced.is_some(),
        "Replace"
    );
    replaced.map(|document| cx.decode(document)).transpose()
}

fn payload_with_generated<M: Serialize>(record: &Record<M>) -> Result<Document> {
    match serde_json::to_value(record).or_raise(|| ErrorKind::InvalidData("record is not serializable".into()))? {
        Value::Object(document) => Ok(document),
        _ => exn::bail!(ErrorKind::InvalidData("record must serialize to an object".into())),
    }
}

/// Merge the supplied fields into the record and bump its version.
#[instrument(skip_all, fields(collection = cx.name(), id = %id))]
pub(crate) async fn update<M, U>(cx: &Context<'_>, id: &Id, partial: &U) -> Result<Option<Record<M>>>
where
    M: DeserializeOwned,
    U: Serialize + ?Sized,
{
    let mutation = partial_mutation(cx, partial)?;
    mutate(cx, cx.write_scope(Filter::id(id)), mutation).await
}

/// Apply caller-supplied operators to the record and bump its version.
#[instrument(skip_all, fields(collection = cx.name(), id = %id))]
pub(crate) async fn update_with<M: DeserializeOwned>(
    cx: &Context<'_>,
    id: &Id,
    mutation: Mutation,
) -> Result<Option<Record<M>>> {
    let mutation = checked_mutation(cx, mutation)?;
    mutate(cx, cx.write_scope(Filter::id(id)), mutation).await
}

/// Validate a partial payload and turn it into a `set` mutation.
pub(crate) fn partial_mutation<U: Serialize + ?Sized>(cx: &Context<'_>, partial: &U) -> Result<Mutation> {
    let fields = payload(partial)?;
    cx.validate(cx.settings.validate_update, Mode::Update, &fields)?;
    Ok(Mutation::new().set_all(fields))
}

/// Reject raw operators on generated fields and validate the assigned values
/// as a partial update.
pub(crate) fn checked_mutation(cx: &Context<'_>, mutation: Mutation) -> Result<Mutation> {
    // A raw replacement chooses its own preserved fields and could drop the
    // generated ones; whole-record writes go through `replace`.
    if mutation.is_replacement() {
        exn::bail!(ErrorKind::InvalidData("raw mutations cannot replace the whole record".into()));
    }
    reject_reserved(mutation.paths())?;
    if cx.settings.validate_update {
        let mut assigned = Document::new();
        for (path, value) in mutation.assignments() {
            if !assign(&mut assigned, path, value.clone()) {
                exn::bail!(ErrorKind::InvalidData(format!("conflicting assignments to {path}")));
            }
        }
        cx.validate(true, Mode::Update, &assigned)?;
    }
    Ok(mutation)
}

/// Stamp and atomically apply a mutation to the first record matching the
/// (already scoped) filter.
pub(crate) async fn mutate<M: DeserializeOwned>(
    cx: &Context<'_>,
    filter: Filter,
    mutation: Mutation,
) -> Result<Option<Record<M>>> {
    let mutation = stamp(mutation)?;
    let updated = cx.collection.find_one_and_mutate(&filter, &mutation, cx.session).await.map_err(ErrorKind::store)?;
    tracing::debug!(collection = cx.name(), matched = updated.is_some(), "Update");
    updated.map(|document| cx.decode(document)).transpose()
}

/// Soft-delete (mark) or hard-delete (remove) a record.
#[instrument(skip_all, fields(collection = cx.name(), id = %id))]
pub(crate) async fn delete(cx: &Context<'_>, id: &Id) -> Result<bool> {
    let deleted = match cx.settings.soft_delete {
        true => {
            let filter = cx.write_scope(Filter::id(id));
            let marked = cx.collection.find_one_and_mutate(&filter, &mark_deleted()?, cx.session).await;
            marked.map_err(ErrorKind::store)?.is_some()
        },
        false => cx.collection.delete_one(&Filter::id(id), cx.session).await.map_err(ErrorKind::store)? > 0,
    };
    tracing::debug!(collection = cx.name(), %id, soft = cx.settings.soft_delete, deleted, "Delete");
    Ok(deleted)
}
