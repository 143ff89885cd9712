//! Cache-aside decorator for repositories.

use crate::command;
use crate::error::{ErrorKind, Result};
use crate::model::Record;
use crate::repository::Repository;
use crate::specification::Specification;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use versa_cache::{CacheHandle, CacheNamespace};
use versa_config::Config;
use versa_store::{FindOptions, Id, IndexSpec, Mutation, Session};

/// A [`Repository`] that keeps a cache namespace, named after the
/// collection, coherent with the store.
///
/// `get` reads through the cache. Single-record writes invalidate the
/// `collection:id` entry before touching the store and repopulate it with the
/// result. Bulk writes clear the whole namespace first.
///
/// Views bound to a session never read from or populate the cache, they only
/// invalidate; [`transaction()`](Self::transaction) clears the namespace
/// once the session commits. The same holds for
/// [`including_deleted()`](Self::including_deleted) reads, since the cache
/// only ever holds live records.
///
/// A repository built by [`configured()`](Self::configured) for a collection
/// that has caching turned off passes every call straight through.
pub struct CachedRepository<M, P = Record<M>> {
    inner: Repository<M, P>,
    cache: Option<CacheNamespace>,
}

impl<M, P> Clone for CachedRepository<M, P> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), cache: self.cache.clone() }
    }
}

impl<M, P> std::fmt::Debug for CachedRepository<M, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedRepository").field("inner", &self.inner).field("cache", &self.cache).finish()
    }
}

impl<M, P> CachedRepository<M, P>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
    P: 'static,
{
    pub fn new(inner: Repository<M, P>, cache: CacheHandle) -> Result<Self> {
        let cache = CacheNamespace::new(cache, inner.collection_name()).map_err(ErrorKind::cache)?;
        Ok(Self { inner, cache: Some(cache) })
    }

    /// Decorate `inner` as the configuration asks: the cache is used only
    /// when caching is enabled globally, `cache` was opened, and the
    /// collection's own section does not opt out.
    pub fn configured(inner: Repository<M, P>, cache: Option<CacheHandle>, config: &Config) -> Result<Self> {
        let collection = config.collection(inner.collection_name());
        match cache.filter(|_| collection.uses_cache(&config.cache)) {
            Some(cache) => Self::new(inner, cache),
            None => {
                tracing::debug!(collection = inner.collection_name(), "Caching disabled for collection");
                Ok(Self { inner, cache: None })
            },
        }
    }

    /// The undecorated repository.
    pub fn inner(&self) -> &Repository<M, P> {
        &self.inner
    }

    /// Returns `true` if this repository keeps a cache at all.
    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    pub fn with_session(&self, session: &Session) -> Self {
        Self { inner: self.inner.with_session(session), cache: self.cache.clone() }
    }

    pub fn including_deleted(&self) -> Self {
        Self { inner: self.inner.including_deleted(), cache: self.cache.clone() }
    }

    /// The namespace, if this view may read from and populate it.
    fn readable(&self) -> Option<&CacheNamespace> {
        self.cache.as_ref().filter(|_| self.inner.session().is_none() && !self.inner.includes_deleted())
    }

    async fn invalidate(&self, id: &Id) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.invalidate(id.as_str()).await.map_err(ErrorKind::cache)?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.clear().await.map_err(ErrorKind::cache)?;
        }
        Ok(())
    }

    /// Cache a write's post-image, or drop the entry when this view must not
    /// populate.
    async fn settle(&self, record: Option<Record<M>>) -> Result<Option<P>> {
        if let Some(record) = &record {
            match self.readable().filter(|_| !record.is_deleted()) {
                Some(cache) => cache.put(record.id.as_str(), record).await.map_err(ErrorKind::cache)?,
                None => self.invalidate(&record.id).await?,
            }
        }
        Ok(self.inner.present(record))
    }

    pub async fn get(&self, id: &Id) -> Result<Option<P>> {
        let Some(cache) = self.readable() else {
            return self.inner.get(id).await;
        };
        if let Some(record) = cache.get::<Record<M>>(id.as_str()).await.map_err(ErrorKind::cache)? {
            return Ok(self.inner.present(Some(record)));
        }
        let record = command::read::get(&self.inner.context(), id).await?;
        if let Some(record) = &record {
            cache.put(id.as_str(), record).await.map_err(ErrorKind::cache)?;
        }
        Ok(self.inner.present(record))
    }

    pub async fn add(&self, model: &M) -> Result<Id> {
        self.inner.add(model).await
    }

    pub async fn replace(&self, record: &Record<M>) -> Result<Option<P>> {
        self.invalidate(&record.id).await?;
        self.settle(command::write::replace(&self.inner.context(), record).await?).await
    }

    pub async fn update<U: Serialize + ?Sized>(&self, id: &Id, partial: &U) -> Result<Option<P>> {
        self.invalidate(id).await?;
        self.settle(command::write::update(&self.inner.context(), id, partial).await?).await
    }

    pub async fn update_with(&self, id: &Id, mutation: Mutation) -> Result<Option<P>> {
        self.invalidate(id).await?;
        self.settle(command::write::update_with(&self.inner.context(), id, mutation).await?).await
    }

    pub async fn delete(&self, id: &Id) -> Result<bool> {
        self.invalidate(id).await?;
        self.inner.delete(id).await
    }

    pub async fn find(&self, specification: &dyn Specification, options: &FindOptions) -> Result<Vec<P>> {
        self.inner.find(specification, options).await
    }

    pub async fn find_all(&self, options: &FindOptions) -> Result<Vec<P>> {
        self.inner.find_all(options).await
    }

    pub async fn find_one(&self, specification: &dyn Specification) -> Result<Option<P>> {
        self.inner.find_one(specification).await
    }

    pub async fn find_one_and_update<U: Serialize + ?Sized>(
        &self,
        specification: &dyn Specification,
        partial: &U,
    ) -> Result<Option<P>> {
        let record = command::query::find_one_and_update(&self.inner.context(), specification, partial).await?;
        self.settle(record).await
    }

    pub async fn find_one_and_update_with(
        &self,
        specification: &dyn Specification,
        mutation: Mutation,
    ) -> Result<Option<P>> {
        let record = command::query::find_one_and_update_with(&self.inner.context(), specification, mutation).await?;
        self.settle(record).await
    }

    pub async fn find_and_update<U: Serialize + ?Sized>(
        &self,
        specification: &dyn Specification,
        partial: &U,
    ) -> Result<u64> {
        self.clear().await?;
        self.inner.find_and_update(specification, partial).await
    }

    pub async fn find_one_and_delete(&self, specification: &dyn Specification) -> Result<Option<P>> {
        let record = command::query::find_one_and_delete::<M>(&self.inner.context(), specification).await?;
        if let Some(record) = &record {
            self.invalidate(&record.id).await?;
        }
        Ok(self.inner.present(record))
    }

    pub async fn clean(&self) -> Result<u64> {
        self.clear().await?;
        self.inner.clean().await
    }

    pub async fn drop(&self) -> Result<bool> {
        self.clear().await?;
        self.inner.drop().await
    }

    pub async fn create_indexes(&self, indexes: &[IndexSpec]) -> Result<()> {
        self.inner.create_indexes(indexes).await
    }

    /// Run `work` inside a new store session, clearing the cache namespace
    /// after a successful commit.
    pub async fn transaction<T, F, Fut>(&self, work: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let value = self.inner.transaction(work).await?;
        self.clear().await?;
        Ok(value)
    }
}
