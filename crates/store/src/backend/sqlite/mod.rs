//! SQLite store backend.
//!
//! Documents are stored as JSON text in a single `documents` table keyed by
//! `(collection, id)`. Filters are evaluated in Rust after the rows are read;
//! a filter that pins an identifier narrows the scan to that row first.
//!
//! Single-document writes are compare-and-swap updates guarded by a
//! per-row `revision` counter, so two writers racing on the same document
//! never both succeed against the same pre-image.

mod pool;

use self::pool::Location;
use crate::StoreBackend;
use crate::document::{Document, ID_FIELD, Id};
use crate::error::{ErrorKind, Result};
use crate::filter::Filter;
use crate::mutation::Mutation;
use crate::options::{Direction, FindOptions, IndexSpec};
use crate::session::Session;
use async_trait::async_trait;
use exn::ResultExt;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;

type Row = (String, i64, String);

/// Attempts at a compare-and-swap write before reporting a conflict.
const MAX_ATTEMPTS: usize = 16;
const INDEX_PREFIX: &str = "ix__";

/// Run `$body` with `$conn` bound to the session's transaction, or to a
/// pooled connection when there is no session.
macro_rules! with_connection {
    ($backend:expr, $session:expr, |$conn:ident| $body:expr) => {
        match $session {
            Some(session) => {
                let mut sessions = $backend.sessions.lock().await;
                let tx = sessions
                    .get_mut(&session.id())
                    .ok_or_else(|| exn::Exn::from(ErrorKind::UnknownSession(session.id())))?;
                let $conn: &mut SqliteConnection = &mut **tx;
                $body
            },
            None => {
                let mut pooled = $backend.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
                let $conn: &mut SqliteConnection = &mut *pooled;
                $body
            },
        }
    };
}

struct Stored {
    id: String,
    revision: i64,
    document: Document,
}

impl TryFrom<Row> for Stored {
    type Error = crate::error::Error;

    fn try_from((id, revision, body): Row) -> Result<Self> {
        let document = serde_json::from_str(&body).or_raise(|| ErrorKind::InvalidData("document body"))?;
        Ok(Self { id, revision, document })
    }
}

/// SQLite-backed document store.
///
/// Sessions map onto SQLite transactions. A session that read a snapshot
/// and then tries to write after another connection committed fails with
/// [`WriteConflict`](ErrorKind::WriteConflict) (`SQLITE_BUSY_SNAPSHOT`), as
/// does a writer that times out waiting for the write lock.
pub struct SqliteBackend {
    name: String,
    pool: SqlitePool,
    sessions: Mutex<HashMap<u64, Transaction<'static, Sqlite>>>,
}

impl SqliteBackend {
    /// Open (or create) the database file at `path` and run migrations.
    ///
    /// Each open session holds one connection until it ends, so the pool
    /// never shrinks below two connections.
    pub async fn connect(path: impl AsRef<Path>, max_connections: Option<u32>) -> Result<Self> {
        let pool = pool::open(Location::File(path.as_ref()), max_connections).await?;
        Ok(Self::from_pool(pool))
    }

    /// Open a private in-memory database.
    ///
    /// The database lives on a single connection, so an open session blocks
    /// every other caller until it commits or aborts.
    pub async fn connect_in_memory() -> Result<Self> {
        Ok(Self::from_pool(pool::open(Location::Memory, None).await?))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self { name: "sqlite".to_string(), pool, sessions: Mutex::new(HashMap::new()) }
    }

    /// Change the name of the backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Roll back any open sessions and close the connection pool.
    pub async fn close(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (id, tx) in sessions {
            if let Err(err) = tx.rollback().await {
                tracing::warn!(session = id, error = %err, "Failed to roll back session on close");
            }
        }
        pool::close(&self.pool).await;
    }

    // =========================================================================
    // Row Access
    // =========================================================================

    async fn ensure_collection(conn: &mut SqliteConnection, collection: &str) -> Result<()> {
        sqlx::query(include_str!("../../../queries/ensure_collection.sql"))
            .bind(collection)
            .execute(conn)
            .await
            .map_err(|e| classify(e, collection))?;
        Ok(())
    }

    /// Matching rows in insertion order, stopping after `limit` matches.
    async fn select(
        conn: &mut SqliteConnection,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Stored>> {
        let query = match filter.pinned_id() {
            Some(id) => sqlx::query_as::<_, Row>(include_str!("../../../queries/select_document.sql"))
                .bind(collection)
                .bind(id),
            None => sqlx::query_as::<_, Row>(include_str!("../../../queries/select_documents.sql")).bind(collection),
        };
        let mut matched = Vec::new();
        let mut rows = query.fetch(&mut *conn);
        while let Some(row) = rows.try_next().await.map_err(|e| classify(e, collection))? {
            let stored = Stored::try_from(row)?;
            if !filter.matches(&stored.document) {
                continue;
            }
            matched.push(stored);
            if limit.is_some_and(|limit| matched.len() >= limit) {
                break;
            }
        }
        Ok(matched)
    }

    async fn insert_row(conn: &mut SqliteConnection, collection: &str, id: &Id, document: &Document) -> Result<()> {
        let body = serde_json::to_string(document).or_raise(|| ErrorKind::InvalidData("document body"))?;
        Self::ensure_collection(&mut *conn, collection).await?;
        sqlx::query(include_str!("../../../queries/insert_document.sql"))
            .bind(collection)
            .bind(id.as_str())
            .bind(body)
            .execute(&mut *conn)
            .await
            .map_err(|e| classify(e, collection))?;
        Ok(())
    }

    /// Apply `mutation` to the first matching row with compare-and-swap,
    /// re-reading and retrying when the row changed underneath.
    async fn mutate_first(
        conn: &mut SqliteConnection,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
    ) -> Result<Option<Document>> {
        for _ in 0..MAX_ATTEMPTS {
            let Some(current) = Self::select(&mut *conn, collection, filter, Some(1)).await?.pop() else {
                return Ok(None);
            };
            let next = mutation.apply(&current.document)?;
            let body = serde_json::to_string(&next).or_raise(|| ErrorKind::InvalidData("document body"))?;
            let result = sqlx::query(include_str!("../../../queries/update_document.sql"))
                .bind(body)
                .bind(collection)
                .bind(&current.id)
                .bind(current.revision)
                .execute(&mut *conn)
                .await
                .map_err(|e| classify(e, collection))?;
            if result.rows_affected() == 1 {
                return Ok(Some(next));
            }
            tracing::debug!(collection, id = %current.id, "Document changed concurrently; retrying");
        }
        exn::bail!(ErrorKind::WriteConflict(collection.to_string()))
    }

    async fn delete_first(conn: &mut SqliteConnection, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        for _ in 0..MAX_ATTEMPTS {
            let Some(current) = Self::select(&mut *conn, collection, filter, Some(1)).await?.pop() else {
                return Ok(None);
            };
            let result = sqlx::query(include_str!("../../../queries/delete_document.sql"))
                .bind(collection)
                .bind(&current.id)
                .bind(current.revision)
                .execute(&mut *conn)
                .await
                .map_err(|e| classify(e, collection))?;
            if result.rows_affected() == 1 {
                return Ok(Some(current.document));
            }
            tracing::debug!(collection, id = %current.id, "Document changed concurrently; retrying");
        }
        exn::bail!(ErrorKind::WriteConflict(collection.to_string()))
    }

    /// Identifiers of every matching row; each is then re-checked as it is
    /// written.
    async fn matching_ids(conn: &mut SqliteConnection, collection: &str, filter: &Filter) -> Result<Vec<Id>> {
        let rows = Self::select(conn, collection, filter, None).await?;
        Ok(rows.into_iter().map(|stored| Id::from(stored.id)).collect())
    }
}

#[async_trait]
impl StoreBackend for SqliteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, collection: &str, mut document: Document, session: Option<&Session>) -> Result<Id> {
        check_name(collection)?;
        let id = match Id::of(&document) {
            Some(id) => id,
            None => {
                let id = Id::generate();
                document.insert(ID_FIELD.to_string(), Value::from(id.clone()));
                id
            },
        };
        with_connection!(self, session, |conn| Self::insert_row(conn, collection, &id, &document).await)?;
        Ok(id)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<Option<Document>> {
        let mut rows = with_connection!(self, session, |conn| Self::select(conn, collection, filter, Some(1)).await)?;
        Ok(rows.pop().map(|stored| stored.document))
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
        session: Option<&Session>,
    ) -> Result<Vec<Document>> {
        let rows = with_connection!(self, session, |conn| Self::select(conn, collection, filter, None).await)?;
        Ok(options.arrange(rows.into_iter().map(|stored| stored.document).collect()))
    }

    async fn delete_one(&self, collection: &str, filter: &Filter, session: Option<&Session>) -> Result<u64> {
        let deleted = with_connection!(self, session, |conn| Self::delete_first(conn, collection, filter).await)?;
        Ok(u64::from(deleted.is_some()))
    }

    async fn delete_many(&self, collection: &str, filter: &Filter, session: Option<&Session>) -> Result<u64> {
        with_connection!(self, session, |conn| {
            let mut deleted = 0;
            for id in Self::matching_ids(&mut *conn, collection, filter).await? {
                let pinned = Filter::id(&id).and(filter.clone());
                if Self::delete_first(&mut *conn, collection, &pinned).await?.is_some() {
                    deleted += 1;
                }
            }
            Ok(deleted)
        })
    }

    async fn find_one_and_mutate(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
        session: Option<&Session>,
    ) -> Result<Option<Document>> {
        with_connection!(self, session, |conn| Self::mutate_first(conn, collection, filter, mutation).await)
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<&Session>,
    ) -> Result<Option<Document>> {
        with_connection!(self, session, |conn| Self::delete_first(conn, collection, filter).await)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
        session: Option<&Session>,
    ) -> Result<u64> {
        with_connection!(self, session, |conn| {
            let mut modified = 0;
            for id in Self::matching_ids(&mut *conn, collection, filter).await? {
                let pinned = Filter::id(&id).and(filter.clone());
                if Self::mutate_first(&mut *conn, collection, &pinned, mutation).await?.is_some() {
                    modified += 1;
                }
            }
            Ok(modified)
        })
    }

    async fn create_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()> {
        check_name(collection)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Self::ensure_collection(&mut *tx, collection).await?;
        let existing: Vec<(String, String)> = sqlx::query_as(include_str!("../../../queries/select_indexes.sql"))
            .bind(collection)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| classify(e, collection))?;
        for index in indexes {
            if existing.iter().any(|(name, _)| name == &index.name) {
                tracing::debug!(collection, index = %index.name, "Index already exists; skipping");
                continue;
            }
            check_name(&index.name)?;
            let sql_name = format!("{INDEX_PREFIX}{collection}__{}", index.name);
            let columns = index
                .keys
                .iter()
                .map(|(path, direction)| {
                    let direction = match direction {
                        Direction::Ascending => "ASC",
                        Direction::Descending => "DESC",
                    };
                    Ok(format!("json_extract(body, '$.{}') {direction}", check_path(path)?))
                })
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            let unique = if index.unique { "UNIQUE " } else { "" };
            // Names were checked above, so interpolating them is safe. SQLite
            // does not accept bound parameters in DDL.
            let ddl = format!(
                r#"CREATE {unique}INDEX IF NOT EXISTS "{sql_name}" ON documents ({columns}) WHERE collection = '{collection}'"#
            );
            sqlx::query(&ddl).execute(&mut *tx).await.map_err(|e| classify(e, collection))?;
            let spec = serde_json::to_string(index).or_raise(|| ErrorKind::InvalidData("index spec"))?;
            sqlx::query(include_str!("../../../queries/insert_index.sql"))
                .bind(collection)
                .bind(&index.name)
                .bind(&sql_name)
                .bind(spec)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(e, collection))?;
            tracing::info!(collection, index = %index.name, unique = index.unique, "Created index");
        }
        tx.commit().await.map_err(|e| classify(e, collection))?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let indexes: Vec<(String, String)> = sqlx::query_as(include_str!("../../../queries/select_indexes.sql"))
            .bind(collection)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| classify(e, collection))?;
        for (_, sql_name) in &indexes {
            sqlx::query(&format!(r#"DROP INDEX IF EXISTS "{sql_name}""#))
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(e, collection))?;
        }
        let result = sqlx::query(include_str!("../../../queries/delete_collection.sql"))
            .bind(collection)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(e, collection))?;
        tx.commit().await.map_err(|e| classify(e, collection))?;
        Ok(result.rows_affected() > 0)
    }

    async fn start_session(&self) -> Result<Session> {
        let tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let session = Session::allocate();
        self.sessions.lock().await.insert(session.id(), tx);
        tracing::trace!(%session, "Started SQLite session");
        Ok(session)
    }

    async fn commit(&self, session: &Session) -> Result<()> {
        let tx = self.take(session).await?;
        tx.commit().await.map_err(|e| classify(e, &session.to_string()))?;
        tracing::trace!(%session, "Committed SQLite session");
        Ok(())
    }

    async fn abort(&self, session: &Session) -> Result<()> {
        let tx = self.take(session).await?;
        tx.rollback().await.or_raise(|| ErrorKind::Database)?;
        tracing::trace!(%session, "Aborted SQLite session");
        Ok(())
    }
}

impl SqliteBackend {
    async fn take(&self, session: &Session) -> Result<Transaction<'static, Sqlite>> {
        self.sessions
            .lock()
            .await
            .remove(&session.id())
            .ok_or_else(|| exn::Exn::from(ErrorKind::UnknownSession(session.id())))
    }
}

/// Map a SQLite error onto the store's error categories.
fn classify(err: sqlx::Error, collection: &str) -> ErrorKind {
    if let Some(db) = err.as_database_error() {
        if db.is_unique_violation() {
            return ErrorKind::DuplicateKey(violated_index(db.message(), collection), collection.to_string());
        }
        // SQLITE_BUSY, SQLITE_LOCKED and their extended codes (BUSY_RECOVERY,
        // LOCKED_SHAREDCACHE, BUSY_SNAPSHOT).
        if matches!(db.code().as_deref(), Some("5" | "6" | "261" | "262" | "517")) {
            return ErrorKind::WriteConflict(collection.to_string());
        }
    }
    tracing::debug!(collection, error = %err, "SQLite error");
    ErrorKind::Database
}

/// Recover the index name from a SQLite unique constraint message.
fn violated_index(message: &str, collection: &str) -> String {
    if message.contains("documents.collection, documents.id") {
        return "id_".to_string();
    }
    let prefix = format!("{INDEX_PREFIX}{collection}__");
    message
        .split('\'')
        .nth(1)
        .map(|name| name.strip_prefix(&prefix).unwrap_or(name).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Collection and index names are interpolated into DDL.
fn check_name(name: &str) -> Result<&str> {
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        exn::bail!(ErrorKind::InvalidName(name.to_string()));
    }
    Ok(name)
}

fn check_path(path: &str) -> Result<&str> {
    let valid =
        path.split('.').all(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if !valid {
        exn::bail!(ErrorKind::InvalidName(path.to_string()));
    }
    Ok(path)
}
