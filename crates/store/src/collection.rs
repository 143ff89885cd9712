//! Named collection handle.

use crate::StoreHandle;
use crate::document::{Document, Id};
use crate::error::Result;
use crate::filter::Filter;
use crate::mutation::Mutation;
use crate::options::{FindOptions, IndexSpec};
use crate::session::Session;

/// A store backend bound to one collection name.
///
/// Cloning is cheap: the backend is shared.
#[derive(Clone)]
pub struct Collection {
    store: StoreHandle,
    name: String,
}

impl Collection {
    pub fn new(store: StoreHandle, name: impl Into<String>) -> Self {
        Self { store, name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub async fn insert(&self, document: Document, session: Option<&Session>) -> Result<Id> {
        self.store.insert(&self.name, document, session).await
    }

    pub async fn find_one(&self, filter: &Filter, session: Option<&Session>) -> Result<Option<Document>> {
        self.store.find_one(&self.name, filter, session).await
    }

    pub async fn find(&self, filter: &Filter, options: &FindOptions, session: Option<&Session>) -> Result<Vec<Document>> {
        self.store.find(&self.name, filter, options, session).await
    }

    pub async fn delete_one(&self, filter: &Filter, session: Option<&Session>) -> Result<u64> {
        self.store.delete_one(&self.name, filter, session).await
    }

    pub async fn delete_many(&self, filter: &Filter, session: Option<&Session>) -> Result<u64> {
        self.store.delete_many(&self.name, filter, session).await
    }

    pub async fn find_one_and_mutate(
        &self,
        filter: &Filter,
        mutation: &Mutation,
        session: Option<&Session>,
    ) -> Result<Option<Document>> {
        self.store.find_one_and_mutate(&self.name, filter, mutation, session).await
    }

    pub async fn find_one_and_delete(&self, filter: &Filter, session: Option<&Session>) -> Result<Option<Document>> {
        self.store.find_one_and_delete(&self.name, filter, session).await
    }

    pub async fn update_many(&self, filter: &Filter, mutation: &Mutation, session: Option<&Session>) -> Result<u64> {
        self.store.update_many(&self.name, filter, mutation, session).await
    }

    pub async fn create_indexes(&self, indexes: &[IndexSpec]) -> Result<()> {
        self.store.create_indexes(&self.name, indexes).await
    }

    pub async fn drop_collection(&self) -> Result<bool> {
        self.store.drop_collection(&self.name).await
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("store", &self.store.name()).field("name", &self.name).finish()
    }
}
