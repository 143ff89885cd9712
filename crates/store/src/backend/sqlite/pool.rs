//! Pool sizing and connection setup for the SQLite backend.
//!
//! Every open session pins one pooled connection until it commits or aborts,
//! so the pool is sized around sessions rather than raw throughput.

use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const DEFAULT_CONNECTIONS: u32 = 5;
/// One session plus one caller outside it.
const MIN_FILE_CONNECTIONS: u32 = 2;
/// How long a caller waits for a connection while sessions hold the rest.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a writer waits for the WAL write lock before it is reported as a
/// write conflict.
const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

/// Where the documents live.
#[derive(Debug, Clone, Copy)]
pub(super) enum Location<'a> {
    File(&'a Path),
    /// A private database that exists only as long as its single connection.
    Memory,
}

impl Location<'_> {
    fn connect_options(self) -> SqliteConnectOptions {
        let options = SqliteConnectOptions::new()
            // Documents and indexes cascade from their collection row.
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            // Sorting and index builds spill here.
            .pragma("temp_store", "memory");
        match self {
            Self::File(path) => options
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
            Self::Memory => options.filename(":memory:"),
        }
    }

    fn pool_options(self, requested: Option<u32>) -> SqlitePoolOptions {
        let options = SqlitePoolOptions::new().acquire_timeout(ACQUIRE_TIMEOUT);
        match self {
            Self::File(_) => options.max_connections(requested.unwrap_or(DEFAULT_CONNECTIONS).max(MIN_FILE_CONNECTIONS)),
            // Closing the connection would discard the database, so it is
            // opened eagerly and never recycled.
            Self::Memory => options.max_connections(1).min_connections(1).idle_timeout(None).max_lifetime(None),
        }
    }
}

/// Open a pool for `location` and bring its schema up to date.
///
/// `requested` is ignored for in-memory databases, which always get exactly
/// one connection.
#[instrument(level = "debug", skip_all, fields(location = ?location))]
pub(super) async fn open(location: Location<'_>, requested: Option<u32>) -> Result<SqlitePool> {
    if matches!(location, Location::Memory) && requested.is_some_and(|max| max != 1) {
        tracing::warn!(?requested, "In-memory SQLite is limited to one connection");
    }
    let pool = location
        .pool_options(requested)
        .connect_with(location.connect_options())
        .await
        .or_raise(|| ErrorKind::Database)?;
    MIGRATOR.run(&pool).await.or_raise(|| ErrorKind::Migration)?;
    tracing::debug!(max_connections = pool.options().get_max_connections(), "SQLite pool ready");
    Ok(pool)
}

/// Refresh planner statistics, then wait for connections to be returned and
/// close the pool.
pub(super) async fn close(pool: &SqlitePool) {
    if let Err(err) = sqlx::query("PRAGMA optimize").execute(pool).await {
        tracing::debug!(error = %err, "Skipped PRAGMA optimize");
    }
    pool.close().await;
}
