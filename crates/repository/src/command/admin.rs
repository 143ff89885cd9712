//! Collection-wide operations.

use super::{Context, mark_deleted, not_deleted};
use crate::error::{ErrorKind, Result};
use tracing::instrument;
use versa_store::{Filter, IndexSpec};

/// Soft-delete every live record, or remove every record. Returns the count.
#[instrument(skip_all, fields(collection = cx.name()))]
pub(crate) async fn clean(cx: &Context<'_>) -> Result<u64> {
    let affected = match cx.settings.soft_delete {
        true => cx.collection.update_many(&not_deleted(), &mark_deleted()?, cx.session).await,
        false => cx.collection.delete_many(&Filter::All, cx.session).await,
    };
    let affected = affected.map_err(ErrorKind::store)?;
    tracing::info!(collection = cx.name(), soft = cx.settings.soft_delete, affected, "Collection cleaned");
    Ok(affected)
}

/// Destroy the collection with its records and indexes.
#[instrument(skip_all, fields(collection = cx.name()))]
pub(crate) async fn drop(cx: &Context<'_>) -> Result<bool> {
    let dropped = cx.collection.drop_collection().await.map_err(ErrorKind::store)?;
    tracing::info!(collection = cx.name(), dropped, "Collection dropped");
    Ok(dropped)
}

#[instrument(skip_all, fields(collection = cx.name(), count = indexes.len()))]
pub(crate) async fn create_indexes(cx: &Context<'_>, indexes: &[IndexSpec]) -> Result<()> {
    cx.collection.create_indexes(indexes).await.map_err(ErrorKind::store)
}
