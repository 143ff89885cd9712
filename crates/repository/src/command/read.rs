//! Reads: get, find and find one.

use super::Context;
use crate::error::{ErrorKind, Result};
use crate::model::Record;
use crate::specification::Specification;
use serde::de::DeserializeOwned;
use tracing::instrument;
use versa_store::{FindOptions, Filter, Id};

#[instrument(level = "trace", skip_all, fields(collection = cx.name(), id = %id))]
pub(crate) async fn get<M: DeserializeOwned>(cx: &Context<'_>, id: &Id) -> Result<Option<Record<M>>> {
    let filter = cx.read_scope(Filter::id(id));
    let found = cx.collection.find_one(&filter, cx.session).await.map_err(ErrorKind::store)?;
    tracing::trace!(collection = cx.name(), %id, found = found.is_some(), "Get");
    found.map(|document| cx.decode_read(document)).transpose()
}

#[instrument(level = "trace", skip_all, fields(
    collection = cx.name(),
    skip = options.skip,
    limit = ?options.limit
))]
pub(crate) async fn find<M: DeserializeOwned>(
    cx: &Context<'_>,
    specification: &dyn Specification,
    options: &FindOptions,
) -> Result<Vec<Record<M>>> {
    let filter = cx.read_scope(specification.filter());
    let documents = cx.collection.find(&filter, options, cx.session).await.map_err(ErrorKind::store)?;
    tracing::trace!(collection = cx.name(), count = documents.len(), "Find");
    cx.decode_all(documents)
}

#[instrument(level = "trace", skip_all, fields(collection = cx.name()))]
pub(crate) async fn find_one<M: DeserializeOwned>(
    cx: &Context<'_>,
    specification: &dyn Specification,
) -> Result<Option<Record<M>>> {
    let filter = cx.read_scope(specification.filter());
    let found = cx.collection.find_one(&filter, cx.session).await.map_err(ErrorKind::store)?;
    found.map(|document| cx.decode_read(document)).transpose()
}
