//! Moderation store backed by SQLite.
pub mod comments;
pub mod groups;
pub mod users;

use std::{str::FromStr as _, time::Duration};

use anyhow::{Context as _, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

/// The database pool type.
pub type Db = sqlx::SqlitePool;

/// A transaction on the moderation database.
pub type Tx = sqlx::Transaction<'static, sqlx::Sqlite>;

/// Begin a transaction holding the write lock from its first statement.
///
/// Transactions that read before they write must start here. A deferred
/// transaction cannot upgrade once another writer has committed under WAL and
/// fails with `SQLITE_BUSY_SNAPSHOT` instead of waiting out the busy timeout.
pub async fn begin_immediate(db: &Db) -> Result<Tx> {
    db.begin_with("BEGIN IMMEDIATE")
        .await
        .context("failed to begin transaction")
}

/// Open (creating if needed) the database at `url` and apply pending migrations.
pub async fn establish_pool(url: &str) -> Result<Db> {
    let opts = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("failed to parse database url {url:?}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        // Verify workers write concurrently; let them queue instead of failing.
        .busy_timeout(Duration::from_secs(30));

    if let Some(parent) = opts.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to apply migrations")?;

    Ok(pool)
}
