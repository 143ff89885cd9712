//! Store backend trait and implementations.
//!
//! This module defines the `StoreBackend` trait, which provides a unified
//! interface for document operations across different backends (in-memory,
//! SQLite, etc.).

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use self::memory::MemoryBackend;
#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteBackend;
use crate::document::{Document, Id};
use crate::error::Result;
use crate::filter::Filter;
use crate::mutation::Mutation;
use crate::options::{FindOptions, IndexSpec};
use crate::session::Session;
use async_trait::async_trait;

/// Unified interface for document store backends.
///
/// Every data operation is scoped to a named collection and may take part in
/// a transaction by passing the [`Session`] returned from
/// [`start_session()`](Self::start_session). Operations without a session
/// are applied immediately.
///
/// # Atomicity
/// [`find_one_and_mutate()`](Self::find_one_and_mutate) and
/// [`find_one_and_delete()`](Self::find_one_and_delete) are the conditional
/// primitives the repository engine builds on: matching the filter and
/// applying the change must be observed as a single step by other callers.
/// Multi-document operations are atomic per document only.
///
/// # Examples
///
/// ```
/// use versa_store::{Field, Mutation, StoreBackend, error::Result};
///
/// async fn rename(store: &dyn StoreBackend, from: &str, to: &str) -> Result<bool> {
///     let filter = Field::new("name").eq(from);
///     let mutation = Mutation::new().set("name", to).inc("version", 1);
///     Ok(store.find_one_and_mutate("users", &filter, &mutation, None).await?.is_some())
/// }
/// ```
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// Insert a document, assigning an identifier unless it already carries
    /// one. Returns the identifier.
    async fn insert(&self, collection: &str, document: Document, session: Option<&Session>) -> Result<Id>;

    /// First matching document in insertion order.
    async fn find_one(&self, collection: &str, filter: &Filter, session: Option<&Session>)
    -> Result<Option<Document>>;

    /// All matching documents, arranged by `options`.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
        session: Option<&Session>,
    ) -> Result<Vec<Document>>;

    /// Delete the first matching document. Returns the number deleted (0 or 1).
    async fn delete_one(&self, collection: &str, filter: &Filter, session: Option<&Session>) -> Result<u64>;

    /// Delete every matching document. Returns the number deleted.
    async fn delete_many(&self, collection: &str, filter: &Filter, session: Option<&Session>) -> Result<u64>;

    /// Atomically apply `mutation` to the first matching document and return
    /// the post-image, or `None` when nothing matched.
    async fn find_one_and_mutate(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
        session: Option<&Session>,
    ) -> Result<Option<Document>>;

    /// Atomically delete the first matching document and return it.
    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<Option<Document>>;

    /// Apply `mutation` to every matching document. Returns the number of
    /// documents modified.
    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
        session: Option<&Session>,
    ) -> Result<u64>;

    /// Create indexes; specifications whose name already exists are skipped.
    async fn create_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()>;

    /// Remove the collection with all its documents and indexes. Returns
    /// `false` if the collection did not exist.
    async fn drop_collection(&self, collection: &str) -> Result<bool>;

    /// Begin a transaction.
    async fn start_session(&self) -> Result<Session>;

    /// Make the session's changes visible and end it.
    async fn commit(&self, session: &Session) -> Result<()>;

    /// Discard the session's changes and end it.
    async fn abort(&self, session: &Session) -> Result<()>;
}
