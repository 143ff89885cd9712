//! Specification-driven writes.

use super::write::{checked_mutation, mutate, partial_mutation};
use super::{Context, mark_deleted, stamp};
use crate::error::{ErrorKind, Result};
use crate::model::Record;
use crate::specification::Specification;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;
use versa_store::Mutation;

#[instrument(skip_all, fields(collection = cx.name()))]
pub(crate) async fn find_one_and_update<M, U>(
    cx: &Context<'_>,
    specification: &dyn Specification,
    partial: &U,
) -> Result<Option<Record<M>>>
where
    M: DeserializeOwned,
    U: Serialize + ?Sized,
{
    let mutation = partial_mutation(cx, partial)?;
    mutate(cx, cx.write_scope(specification.filter()), mutation).await
}

#[instrument(skip_all, fields(collection = cx.name()))]
pub(crate) async fn find_one_and_update_with<M: DeserializeOwned>(
    cx: &Context<'_>,
    specification: &dyn Specification,
    mutation: Mutation,
) -> Result<Option<Record<M>>> {
    let mutation = checked_mutation(cx, mutation)?;
    mutate(cx, cx.write_scope(specification.filter()), mutation).await
}

/// Update every matching record without reading them back. Returns the
/// number of records modified.
#[instrument(skip_all, fields(collection = cx.name()))]
pub(crate) async fn find_and_update<U: Serialize + ?Sized>(
    cx: &Context<'_>,
    specification: &dyn Specification,
    partial: &U,
) -> Result<u64> {
    let mutation = stamp(partial_mutation(cx, partial)?)?;
    let filter = cx.write_scope(specification.filter());
    let modified = cx.collection.update_many(&filter, &mutation, cx.session).await.map_err(ErrorKind::store)?;
    tracing::debug!(collection = cx.name(), modified, "Bulk update");
    Ok(modified)
}

/// Soft-delete or remove the first matching record and return it as it was
/// left in the store (soft) or as it was before removal (hard).
#[instrument(skip_all, fields(collection = cx.name()))]
pub(crate) async fn find_one_and_delete<M: DeserializeOwned>(
    cx: &Context<'_>,
    specification: &dyn Specification,
) -> Result<Option<Record<M>>> {
    let deleted = match cx.settings.soft_delete {
        true => {
            let filter = cx.write_scope(specification.filter());
            cx.collection.find_one_and_mutate(&filter, &mark_deleted()?, cx.session).await
        },
        false => cx.collection.find_one_and_delete(&specification.filter(), cx.session).await,
    };
    let deleted = deleted.map_err(ErrorKind::store)?;
    tracing::debug!(collection = cx.name(), deleted = deleted.is_some(), "Find one and delete");
    deleted.map(|document| cx.decode(document)).transpose()
}
