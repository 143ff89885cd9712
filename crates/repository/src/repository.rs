//! The repository facade.

use crate::command::{self, Context};
use crate::error::{ErrorKind, Result};
use crate::model::Record;
use crate::settings::Settings;
use crate::specification::{MatchAll, Specification};
use crate::validation::{ValidationOptions, Validator};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use versa_config::CollectionConfig;
use versa_store::{Collection, FindOptions, Id, IndexSpec, Mutation, Session, StoreHandle};

/// Turns a decoded record into the value handed to callers.
pub type Presenter<M, P> = Arc<dyn Fn(Record<M>) -> P + Send + Sync>;

/// Versioned CRUD over one collection of records with payload `M`.
///
/// Every mutation bumps the record's `version` by one and refreshes
/// `lastUpdatedAt` in the same atomic store request. With soft delete on,
/// deletes only mark records, and reads skip marked records unless the view
/// was made with [`including_deleted()`](Self::including_deleted).
///
/// Results are passed through the presenter, which by default returns the
/// [`Record`] unchanged.
///
/// Repositories are cheap to clone; clones share the store and settings.
///
/// # Examples
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use std::sync::Arc;
/// use versa_repository::Repository;
/// use versa_store::MemoryBackend;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct User {
///     name: String,
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let users = Repository::<User>::builder(Arc::new(MemoryBackend::default()), "users").soft_delete(true).build()?;
/// let id = users.add(&User { name: "Ann".into() }).await?;
/// let ann = users.get(&id).await?.ok_or("missing")?;
/// assert_eq!((ann.name.as_str(), ann.version), ("Ann", 0));
/// # Ok(())
/// # }
/// ```
pub struct Repository<M, P = Record<M>> {
    collection: Collection,
    settings: Arc<Settings>,
    presenter: Presenter<M, P>,
    session: Option<Session>,
    include_deleted: bool,
    _model: PhantomData<fn() -> M>,
}

impl<M, P> Clone for Repository<M, P> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            settings: self.settings.clone(),
            presenter: self.presenter.clone(),
            session: self.session,
            include_deleted: self.include_deleted,
            _model: PhantomData,
        }
    }
}

impl<M, P> fmt::Debug for Repository<M, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("collection", &self.collection)
            .field("settings", &self.settings)
            .field("session", &self.session)
            .field("include_deleted", &self.include_deleted)
            .finish_non_exhaustive()
    }
}

impl<M> Repository<M, Record<M>>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Start configuring a repository over `collection`.
    pub fn builder(store: StoreHandle, collection: impl Into<String>) -> RepositoryBuilder<M, Record<M>> {
        RepositoryBuilder {
            store,
            settings: Settings::new(collection.into()),
            presenter: Arc::new(|record: Record<M>| record),
        }
    }
}

impl<M, P> Repository<M, P>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
    P: 'static,
{
    pub(crate) fn context(&self) -> Context<'_> {
        Context {
            collection: &self.collection,
            settings: &self.settings,
            session: self.session.as_ref(),
            include_deleted: self.include_deleted,
        }
    }

    pub(crate) fn present(&self, record: Option<Record<M>>) -> Option<P> {
        record.map(|record| (self.presenter)(record))
    }

    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The session this view is bound to, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Returns `true` if reads through this view see soft-deleted records.
    pub fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    /// A view of this repository whose operations run inside `session`.
    pub fn with_session(&self, session: &Session) -> Self {
        Self { session: Some(*session), ..self.clone() }
    }

    /// A view of this repository whose reads also return soft-deleted
    /// records. Writes still never touch them.
    pub fn including_deleted(&self) -> Self {
        Self { include_deleted: true, ..self.clone() }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a new record at version 0. Returns its identifier.
    pub async fn add(&self, model: &M) -> Result<Id> {
        command::write::add(&self.context(), model).await
    }

    /// Replace the payload of `record`, provided the stored version still
    /// equals `record.version`.
    ///
    /// Returns `None` when the record is missing, soft-deleted or was
    /// modified since it was read; re-read and retry in that case.
    pub async fn replace(&self, record: &Record<M>) -> Result<Option<P>> {
        Ok(self.present(command::write::replace(&self.context(), record).await?))
    }

    /// Merge the fields of `partial` into the record.
    ///
    /// `partial` is any value serializing to an object whose keys are payload
    /// fields, typically a struct of `Option`s skipped when `None`.
    pub async fn update<U: Serialize + ?Sized>(&self, id: &Id, partial: &U) -> Result<Option<P>> {
        Ok(self.present(command::write::update(&self.context(), id, partial).await?))
    }

    /// Apply raw field operators to the record.
    pub async fn update_with(&self, id: &Id, mutation: Mutation) -> Result<Option<P>> {
        Ok(self.present(command::write::update_with(&self.context(), id, mutation).await?))
    }

    /// Delete the record. Returns whether a record was affected.
    pub async fn delete(&self, id: &Id) -> Result<bool> {
        command::write::delete(&self.context(), id).await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, id: &Id) -> Result<Option<P>> {
        Ok(self.present(command::read::get(&self.context(), id).await?))
    }

    pub async fn find(&self, specification: &dyn Specification, options: &FindOptions) -> Result<Vec<P>> {
        let records = command::read::find(&self.context(), specification, options).await?;
        Ok(records.into_iter().map(|record| (self.presenter)(record)).collect())
    }

    /// Every record, arranged by `options`.
    pub async fn find_all(&self, options: &FindOptions) -> Result<Vec<P>> {
        self.find(&MatchAll, options).await
    }

    pub async fn find_one(&self, specification: &dyn Specification) -> Result<Option<P>> {
        Ok(self.present(command::read::find_one(&self.context(), specification).await?))
    }

    // =========================================================================
    // Specification-driven writes
    // =========================================================================

    pub async fn find_one_and_update<U: Serialize + ?Sized>(
        &self,
        specification: &dyn Specification,
        partial: &U,
    ) -> Result<Option<P>> {
        Ok(self.present(command::query::find_one_and_update(&self.context(), specification, partial).await?))
    }

    pub async fn find_one_and_update_with(
        &self,
        specification: &dyn Specification,
        mutation: Mutation,
    ) -> Result<Option<P>> {
        Ok(self.present(command::query::find_one_and_update_with(&self.context(), specification, mutation).await?))
    }

    /// Update every matching record. Returns the number modified.
    pub async fn find_and_update<U: Serialize + ?Sized>(
        &self,
        specification: &dyn Specification,
        partial: &U,
    ) -> Result<u64> {
        command::query::find_and_update(&self.context(), specification, partial).await
    }

    pub async fn find_one_and_delete(&self, specification: &dyn Specification) -> Result<Option<P>> {
        Ok(self.present(command::query::find_one_and_delete(&self.context(), specification).await?))
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Delete every record (soft or hard, per the settings). Returns the count.
    pub async fn clean(&self) -> Result<u64> {
        command::admin::clean(&self.context()).await
    }

    /// Destroy the collection, including indexes and soft-deleted records.
    pub async fn drop(&self) -> Result<bool> {
        command::admin::drop(&self.context()).await
    }

    pub async fn create_indexes(&self, indexes: &[IndexSpec]) -> Result<()> {
        command::admin::create_indexes(&self.context(), indexes).await
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Run `work` inside a new store session.
    ///
    /// `work` receives the session and binds repositories to it with
    /// [`with_session()`](Self::with_session). Its value is returned after a
    /// successful commit. If it fails the session is aborted and the original
    /// error is returned unchanged.
    pub async fn transaction<T, F, Fut>(&self, work: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let store = self.collection.store();
        let session = store.start_session().await.map_err(ErrorKind::store)?;
        tracing::debug!(collection = self.collection_name(), %session, "Transaction started");
        match work(session).await {
            Ok(value) => {
                store.commit(&session).await.map_err(ErrorKind::store)?;
                tracing::debug!(collection = self.collection_name(), %session, "Transaction committed");
                Ok(value)
            },
            Err(err) => {
                if let Err(abort) = store.abort(&session).await {
                    tracing::warn!(%session, error = ?abort, "Failed to abort transaction");
                }
                tracing::debug!(collection = self.collection_name(), %session, "Transaction aborted");
                Err(err)
            },
        }
    }
}

/// Configures and validates repository settings.
pub struct RepositoryBuilder<M, P = Record<M>> {
    store: StoreHandle,
    settings: Settings,
    presenter: Presenter<M, P>,
}

impl<M, P> RepositoryBuilder<M, P>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
    P: 'static,
{
    pub fn validate_add(mut self, enabled: bool) -> Self {
        self.settings.validate_add = enabled;
        self
    }

    pub fn validate_update(mut self, enabled: bool) -> Self {
        self.settings.validate_update = enabled;
        self
    }

    pub fn validate_replace(mut self, enabled: bool) -> Self {
        self.settings.validate_replace = enabled;
        self
    }

    pub fn validate_get(mut self, enabled: bool) -> Self {
        self.settings.validate_get = enabled;
        self
    }

    pub fn soft_delete(mut self, enabled: bool) -> Self {
        self.settings.soft_delete = enabled;
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.settings.validator = Some(Arc::new(validator));
        self
    }

    pub fn validation_options(mut self, options: ValidationOptions) -> Self {
        self.settings.validation_options = options;
        self
    }

    /// Apply a collection's section of the configuration file.
    pub fn settings(mut self, config: &CollectionConfig) -> Self {
        self.settings.validate_add = config.validate_add;
        self.settings.validate_update = config.validate_update;
        self.settings.validate_replace = config.validate_replace;
        self.settings.validate_get = config.validate_get;
        self.settings.soft_delete = config.soft_delete;
        self
    }

    /// Hand callers `present(record)` instead of the record itself.
    pub fn present<Q: 'static>(self, presenter: impl Fn(Record<M>) -> Q + Send + Sync + 'static) -> RepositoryBuilder<M, Q> {
        RepositoryBuilder { store: self.store, settings: self.settings, presenter: Arc::new(presenter) }
    }

    pub fn build(self) -> Result<Repository<M, P>> {
        let name = &self.settings.collection;
        if name.is_empty() || name.contains(':') || name.chars().any(char::is_whitespace) {
            exn::bail!(ErrorKind::Config(format!("invalid collection name {name:?}")));
        }
        if self.settings.validates() && self.settings.validator.is_none() {
            exn::bail!(ErrorKind::Config(format!("validation is enabled for {name} but no validator was given")));
        }
        tracing::debug!(settings = ?self.settings, "Repository configured");
        Ok(Repository {
            collection: Collection::new(self.store, name.clone()),
            settings: Arc::new(self.settings),
            presenter: self.presenter,
            session: None,
            include_deleted: false,
            _model: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specification::{FilterSpecification, IdSpecification};
    use crate::validation::{FieldType, Rule, Schema};
    use rstest::rstest;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;
    use versa_store::{Document, Field, Filter, MemoryBackend, SqliteBackend, Sort, StoreBackend};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        age: Option<u32>,
    }

    #[derive(Debug, Default, Serialize)]
    struct UserPatch {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        age: Option<u32>,
    }

    fn ann() -> User {
        User { name: "Ann".into(), age: None }
    }

    fn rename(name: &str) -> UserPatch {
        UserPatch { name: Some(name.into()), ..UserPatch::default() }
    }

    fn memory() -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::default())
    }

    fn users(store: StoreHandle, soft_delete: bool) -> Repository<User> {
        Repository::<User>::builder(store, "users").soft_delete(soft_delete).build().unwrap()
    }

    async fn settle() {
        // Keep successive timestamps apart.
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    #[tokio::test]
    async fn test_add_then_get(#[case] soft_delete: bool) {
        let repo = users(memory(), soft_delete);
        let id = repo.add(&ann()).await.unwrap();
        let record = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(record.data, ann());
        assert_eq!(record.id, id);
        assert_eq!(record.version, 0);
        assert_eq!(record.created_at, record.last_updated_at);
        assert_eq!(record.is_deleted, soft_delete.then_some(false));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_changes_only_supplied_fields() {
        let repo = users(memory(), false);
        let id = repo.add(&User { name: "Ann".into(), age: Some(30) }).await.unwrap();
        let before = repo.get(&id).await.unwrap().unwrap();
        settle().await;
        let after = repo.update(&id, &rename("Bea")).await.unwrap().unwrap();
        assert_eq!(after.version, before.version + 1);
        assert!(after.last_updated_at > before.last_updated_at);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.data, User { name: "Bea".into(), age: Some(30) });
        assert_eq!(repo.get(&id).await.unwrap(), Some(after));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let repo = users(memory(), false);
        assert_eq!(repo.update(&Id::from("nope"), &rename("Bea")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_with_raw_operators() {
        let repo = users(memory(), false);
        let id = repo.add(&User { name: "Ann".into(), age: Some(30) }).await.unwrap();
        let record = repo.update_with(&id, Mutation::new().inc("age", 2)).await.unwrap().unwrap();
        assert_eq!((record.age, record.version), (Some(32), 1));
        let record = repo.update_with(&id, Mutation::new().unset("age")).await.unwrap().unwrap();
        assert_eq!((record.age, record.version), (None, 2));
    }

    #[rstest]
    #[case(Mutation::new().set("version", 0))]
    #[case(Mutation::new().inc("version", 5))]
    #[case(Mutation::new().unset("isDeleted"))]
    #[case(Mutation::new().set("createdAt.year", 1999))]
    #[tokio::test]
    async fn test_update_with_rejects_reserved_fields(#[case] mutation: Mutation) {
        let repo = users(memory(), true);
        let id = repo.add(&ann()).await.unwrap();
        let err = repo.update_with(&id, mutation).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation(_)));
        assert_eq!(repo.get(&id).await.unwrap().unwrap().version, 0);
    }

    #[rstest]
    #[case(Mutation::replace(doc(json!({"name": "Bea"})), Vec::<String>::new()))]
    #[case(Mutation::replace(doc(json!({"name": "Bea"})), ["createdAt", "isDeleted", "version"]))]
    #[case(Mutation::new().set("name", "Bea").merge(Mutation::replace(doc(json!({"name": "Bea"})), ["id"])))]
    #[tokio::test]
    async fn test_update_with_rejects_whole_record_replacement(#[case] mutation: Mutation) {
        let store = memory();
        let repo = users(store.clone(), true);
        let id = repo.add(&ann()).await.unwrap();
        repo.update(&id, &rename("Ann")).await.unwrap();
        let before = store.find_one("users", &Filter::id(&id), None).await.unwrap().unwrap();

        let err = repo.update_with(&id, mutation.clone()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(_)));
        let spec = IdSpecification(id.clone());
        let err = repo.find_one_and_update_with(&spec, mutation).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(_)));

        let after = store.find_one("users", &Filter::id(&id), None).await.unwrap().unwrap();
        assert_eq!(after, before, "nothing was written");
        let record = repo.get(&id).await.unwrap().unwrap();
        assert_eq!((record.name.as_str(), record.version, record.is_deleted), ("Ann", 1, Some(false)));
    }

    #[tokio::test]
    async fn test_update_rejects_reserved_payload_fields() {
        let repo = users(memory(), false);
        let id = repo.add(&ann()).await.unwrap();
        let err = repo.update(&id, &json!({"name": "Bea", "version": 7})).await.unwrap_err();
        let ErrorKind::Validation(violations) = &*err else {
            panic!("expected a validation error, got {err:?}");
        };
        assert!(violations.mentions("version"));
        assert_eq!(repo.get(&id).await.unwrap().unwrap().name, "Ann");
    }

    #[tokio::test]
    async fn test_replace_uses_optimistic_version() {
        let repo = users(memory(), true);
        let id = repo.add(&ann()).await.unwrap();
        let mut record = repo.get(&id).await.unwrap().unwrap();
        record.name = "Bea".into();
        settle().await;
        let replaced = repo.replace(&record).await.unwrap().unwrap();
        assert_eq!((replaced.name.as_str(), replaced.version), ("Bea", 1));
        assert_eq!(replaced.created_at, record.created_at);
        assert!(replaced.last_updated_at > record.last_updated_at);
        assert_eq!(replaced.is_deleted, Some(false));
        // `record` still carries version 0 and is now stale.
        record.name = "Cid".into();
        assert_eq!(repo.replace(&record).await.unwrap(), None);
        assert_eq!(repo.get(&id).await.unwrap().unwrap().name, "Bea");
    }

    #[tokio::test]
    async fn test_replace_never_creates() {
        let store = memory();
        let repo = users(store.clone(), false);
        let id = repo.add(&ann()).await.unwrap();
        let mut ghost = repo.get(&id).await.unwrap().unwrap();
        ghost.id = Id::from("ghost");
        assert_eq!(repo.replace(&ghost).await.unwrap(), None);
        let all = store.find("users", &Filter::All, &FindOptions::default(), None).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_replace_exactly_one_wins() {
        let repo = users(memory(), false);
        let id = repo.add(&ann()).await.unwrap();
        let record = repo.get(&id).await.unwrap().unwrap();
        let mut left = record.clone();
        left.name = "Left".into();
        let mut right = record;
        right.name = "Right".into();
        let (left, right) = tokio::join!(repo.replace(&left), repo.replace(&right));
        let (left, right) = (left.unwrap(), right.unwrap());
        assert!(left.is_some() != right.is_some(), "exactly one replace must succeed");
        assert_eq!(repo.get(&id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_soft_delete() {
        let store = memory();
        let repo = users(store.clone(), true);
        let id = repo.add(&ann()).await.unwrap();
        assert!(repo.delete(&id).await.unwrap());
        assert_eq!(repo.get(&id).await.unwrap(), None);
        assert!(!repo.delete(&id).await.unwrap(), "already deleted");
        assert_eq!(repo.update(&id, &rename("Bea")).await.unwrap(), None);
        let raw = store.find_one("users", &Filter::id(&id), None).await.unwrap().unwrap();
        assert_eq!(raw.get("isDeleted"), Some(&json!(true)));
        assert_eq!(raw.get("version"), Some(&json!(1)));
        let deleted = repo.including_deleted().get(&id).await.unwrap().unwrap();
        assert!(deleted.is_deleted());
    }

    #[tokio::test]
    async fn test_hard_delete() {
        let store = memory();
        let repo = users(store.clone(), false);
        let id = repo.add(&ann()).await.unwrap();
        assert!(repo.delete(&id).await.unwrap());
        assert_eq!(repo.get(&id).await.unwrap(), None);
        assert!(store.find_one("users", &Filter::id(&id), None).await.unwrap().is_none());
        assert!(!repo.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_records_without_deleted_flag_count_as_live() {
        let store = memory();
        let plain = users(store.clone(), false);
        let id = plain.add(&ann()).await.unwrap();
        let soft = users(store, true);
        assert!(soft.get(&id).await.unwrap().is_some());
        assert!(soft.delete(&id).await.unwrap());
        assert!(soft.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_with_specification_and_options() {
        let repo = users(memory(), true);
        for (name, age) in [("Ann", 30), ("Bea", 20), ("Cid", 40), ("Dee", 25)] {
            repo.add(&User { name: name.into(), age: Some(age) }).await.unwrap();
        }
        let cid = repo.find_one(&Field::new("name").eq("Cid")).await.unwrap().unwrap();
        repo.delete(&cid.id).await.unwrap();

        let names = |records: Vec<Record<User>>| records.into_iter().map(|r| r.data.name).collect::<Vec<_>>();
        let options = FindOptions::default().sort(Sort::descending("age"));
        assert_eq!(names(repo.find_all(&options).await.unwrap()), vec!["Ann", "Dee", "Bea"]);
        let adults = FilterSpecification(Field::new("age").gte(25));
        assert_eq!(names(repo.find(&adults, &options.clone().limit(1)).await.unwrap()), vec!["Ann"]);
        // A caller `Or` group is combined with, not replaced by, the soft-delete clause.
        let either = Field::new("name").eq("Bea").or(Field::new("name").eq("Cid"));
        assert_eq!(names(repo.find(&either, &FindOptions::default()).await.unwrap()), vec!["Bea"]);
        let with_deleted = repo.including_deleted().find(&either, &FindOptions::default()).await.unwrap();
        assert_eq!(names(with_deleted), vec!["Bea", "Cid"]);
        assert!(repo.find_one(&IdSpecification(cid.id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_one_and_update() {
        let repo = users(memory(), false);
        repo.add(&ann()).await.unwrap();
        let spec = FilterSpecification(Field::new("name").eq("Ann"));
        let updated = repo.find_one_and_update(&spec, &UserPatch { age: Some(31), ..UserPatch::default() }).await;
        let updated = updated.unwrap().unwrap();
        assert_eq!((updated.age, updated.version), (Some(31), 1));
        let bumped = repo.find_one_and_update_with(&spec, Mutation::new().inc("age", 1)).await.unwrap().unwrap();
        assert_eq!((bumped.age, bumped.version), (Some(32), 2));
        let none = repo.find_one_and_update(&Field::new("name").eq("Zed"), &rename("Bea")).await.unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn test_find_and_update() {
        let repo = users(memory(), false);
        for name in ["Ann", "Bea", "Cid"] {
            repo.add(&User { name: name.into(), age: Some(1) }).await.unwrap();
        }
        let spec = Field::new("name").is_in(["Ann", "Bea"]);
        let modified = repo.find_and_update(&spec, &UserPatch { age: Some(2), ..UserPatch::default() }).await.unwrap();
        assert_eq!(modified, 2);
        let records = repo.find_all(&FindOptions::default()).await.unwrap();
        let summary: Vec<_> = records.iter().map(|r| (r.name.as_str(), r.age, r.version)).collect();
        assert_eq!(summary, vec![("Ann", Some(2), 1), ("Bea", Some(2), 1), ("Cid", Some(1), 0)]);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    #[tokio::test]
    async fn test_find_one_and_delete(#[case] soft_delete: bool) {
        let repo = users(memory(), soft_delete);
        let id = repo.add(&ann()).await.unwrap();
        let deleted = repo.find_one_and_delete(&Field::new("name").eq("Ann")).await.unwrap().unwrap();
        assert_eq!(deleted.id, id);
        assert_eq!(deleted.is_deleted(), soft_delete);
        assert_eq!(repo.get(&id).await.unwrap(), None);
        assert_eq!(repo.find_one_and_delete(&Field::new("name").eq("Ann")).await.unwrap(), None);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    #[tokio::test]
    async fn test_clean(#[case] soft_delete: bool) {
        let store = memory();
        let repo = users(store.clone(), soft_delete);
        for name in ["Ann", "Bea"] {
            repo.add(&User { name: name.into(), age: None }).await.unwrap();
        }
        assert_eq!(repo.clean().await.unwrap(), 2);
        assert!(repo.find_all(&FindOptions::default()).await.unwrap().is_empty());
        let raw = store.find("users", &Filter::All, &FindOptions::default(), None).await.unwrap();
        assert_eq!(raw.len(), if soft_delete { 2 } else { 0 });
        assert_eq!(repo.clean().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drop_bypasses_soft_delete() {
        let store = memory();
        let repo = users(store.clone(), true);
        let id = repo.add(&ann()).await.unwrap();
        repo.delete(&id).await.unwrap();
        assert!(repo.drop().await.unwrap());
        assert!(store.find("users", &Filter::All, &FindOptions::default(), None).await.unwrap().is_empty());
        assert!(!repo.drop().await.unwrap());
    }

    #[tokio::test]
    async fn test_create_indexes_enforces_uniqueness() {
        let repo = users(memory(), false);
        repo.create_indexes(&[IndexSpec::on("name").unique()]).await.unwrap();
        repo.add(&ann()).await.unwrap();
        let err = repo.add(&ann()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Duplicate(index) if index == "name_1"));
    }

    #[tokio::test]
    async fn test_scenario_lifecycle() {
        let repo = users(memory(), true);
        let id = repo.add(&ann()).await.unwrap();
        let updated = repo.update(&id, &rename("Bea")).await.unwrap().unwrap();
        assert_eq!(updated.version, 1);
        let fetched = repo.get(&id).await.unwrap().unwrap();
        assert_eq!((fetched.name.as_str(), fetched.version), ("Bea", 1));
        assert!(repo.delete(&id).await.unwrap());
        assert_eq!(repo.get(&id).await.unwrap(), None);
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn schema() -> Schema {
        Schema::new()
            .rule(Rule::required("name", FieldType::String).non_empty())
            .rule(Rule::optional("age", FieldType::Integer).max(150.0))
    }

    fn validated(store: StoreHandle) -> Repository<Document> {
        Repository::<Document>::builder(store, "people")
            .validate_add(true)
            .validate_update(true)
            .validate_replace(true)
            .validator(schema())
            .build()
            .unwrap()
    }

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_add_missing_required_field_touches_nothing() {
        let store = memory();
        let repo = validated(store.clone());
        let err = repo.add(&doc(json!({"age": 3}))).await.unwrap_err();
        let ErrorKind::Validation(violations) = &*err else {
            panic!("expected a validation error, got {err:?}");
        };
        assert!(violations.mentions("name"));
        assert!(store.find("people", &Filter::All, &FindOptions::default(), None).await.unwrap().is_empty());
        assert!(!store.drop_collection("people").await.unwrap(), "the collection was never created");
    }

    #[tokio::test]
    async fn test_update_validates_supplied_fields_only() {
        let repo = validated(memory());
        let id = repo.add(&doc(json!({"name": "Ann"}))).await.unwrap();
        assert!(repo.update(&id, &json!({"age": 40})).await.unwrap().is_some());
        let err = repo.update(&id, &json!({"age": 400})).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation(v) if v.mentions("age")));
        let err = repo.update_with(&id, Mutation::new().set("name", "")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation(v) if v.mentions("name")));
        assert_eq!(repo.get(&id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_replace_validates_full_record() {
        let repo = validated(memory());
        let id = repo.add(&doc(json!({"name": "Ann", "age": 3}))).await.unwrap();
        let mut record = repo.get(&id).await.unwrap().unwrap();
        record.data.remove("name");
        let err = repo.replace(&record).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation(v) if v.mentions("name")));
        assert_eq!(repo.get(&id).await.unwrap().unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_validate_get_rejects_malformed_records() {
        let store = memory();
        let raw = Repository::<Document>::builder(store.clone(), "people").build().unwrap();
        let id = raw.add(&doc(json!({"name": ""}))).await.unwrap();
        let checked = Repository::<Document>::builder(store, "people")
            .validate_get(true)
            .validator(schema())
            .build()
            .unwrap();
        let err = checked.get(&id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation(v) if v.mentions("name")));
        assert!(checked.find_all(&FindOptions::default()).await.is_err());
        assert!(checked.find_one(&MatchAll).await.is_err());
    }

    #[tokio::test]
    async fn test_undecodable_record_is_invalid_data() {
        let store = memory();
        let raw = Repository::<Document>::builder(store.clone(), "users").build().unwrap();
        let id = raw.add(&doc(json!({"nickname": "A"}))).await.unwrap();
        let err = users(store, false).get(&id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(_)));
    }

    // =========================================================================
    // Builder and presenter
    // =========================================================================

    #[rstest]
    #[case("")]
    #[case("users:archive")]
    #[case("user profiles")]
    fn test_build_rejects_collection_names(#[case] name: &str) {
        let err = Repository::<User>::builder(memory(), name).build().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }

    #[test]
    fn test_build_requires_validator_when_validating() {
        let err = Repository::<User>::builder(memory(), "users").validate_get(true).build().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }

    #[test]
    fn test_settings_from_config() {
        let config = CollectionConfig { soft_delete: true, ..CollectionConfig::default() };
        let repo = Repository::<User>::builder(memory(), "users").settings(&config).build().unwrap();
        assert!(repo.settings().soft_delete());
        assert_eq!(repo.collection_name(), "users");
    }

    #[tokio::test]
    async fn test_presenter() {
        let repo = Repository::<User>::builder(memory(), "users")
            .present(|record| format!("{}@{}", record.name, record.version))
            .build()
            .unwrap();
        let id = repo.add(&ann()).await.unwrap();
        assert_eq!(repo.get(&id).await.unwrap().as_deref(), Some("Ann@0"));
        assert_eq!(repo.update(&id, &rename("Bea")).await.unwrap().as_deref(), Some("Bea@1"));
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    #[tokio::test]
    async fn test_transaction_commits() {
        let repo = users(memory(), false);
        let id = repo
            .transaction(|session| {
                let repo = repo.with_session(&session);
                async move {
                    let id = repo.add(&ann()).await?;
                    repo.update(&id, &rename("Bea")).await?;
                    Ok(id)
                }
            })
            .await
            .unwrap();
        let record = repo.get(&id).await.unwrap().unwrap();
        assert_eq!((record.name.as_str(), record.version), ("Bea", 1));
    }

    #[tokio::test]
    async fn test_transaction_aborts_and_returns_original_error() {
        let repo = users(memory(), false);
        let err = repo
            .transaction(|session| {
                let repo = repo.with_session(&session);
                async move {
                    repo.add(&ann()).await?;
                    Err::<(), _>(exn::Exn::from(ErrorKind::InvalidData("boom".into())))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(message) if message == "boom"));
        assert!(repo.find_all(&FindOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transaction_fails_on_interleaved_write() {
        let repo = users(memory(), false);
        let id = repo.add(&ann()).await.unwrap();
        let outside = repo.clone();
        let err = repo
            .transaction(|session| {
                let inside = repo.with_session(&session);
                let id = id.clone();
                async move {
                    inside.get(&id).await?;
                    outside.update(&id, &rename("Outside")).await?;
                    inside.update(&id, &rename("Inside")).await?;
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Conflict));
        assert!(err.is_retryable());
        assert_eq!(repo.get(&id).await.unwrap().unwrap().name, "Outside");
    }

    #[tokio::test]
    async fn test_sqlite_backed_repository() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteBackend::connect(dir.path().join("versa.db"), None).await.unwrap());
        let repo = users(store.clone(), true);
        let id = repo.add(&ann()).await.unwrap();
        let updated = repo.update(&id, &rename("Bea")).await.unwrap().unwrap();
        assert_eq!(updated.version, 1);
        let committed = repo
            .transaction(|session| {
                let repo = repo.with_session(&session);
                let id = id.clone();
                async move { repo.delete(&id).await }
            })
            .await
            .unwrap();
        assert!(committed);
        assert_eq!(repo.get(&id).await.unwrap(), None);
        assert_eq!(repo.including_deleted().get(&id).await.unwrap().map(|r| r.version), Some(2));
        store.close().await;
    }
}
