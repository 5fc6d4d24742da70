use std::str::FromStr;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::{
    auth::repo::SqliteUserStore,
    config::DatabaseConfig,
    groups::repo::SqliteGroupStore,
    quotes::repo::SqliteQuoteStore,
    storage::{GroupStore, QuoteStore, Store, UserStore},
};

/// Open the SQLite pool described by `cfg` and bring the schema up to date.
pub async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = cfg.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database directory {}", parent.display()))?;
    }

    let opts = SqliteConnectOptions::new()
        .filename(&cfg.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let db = SqlitePoolOptions::new()
        .max_connections(cfg.max_connections.max(1))
        .connect_with(opts)
        .await
        .context("connect to database")?;

    migrate(&db).await?;
    Ok(db)
}

/// Single-connection in-memory database; the connection is never recycled so
/// the data lives as long as the pool.
pub async fn connect_in_memory() -> anyhow::Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .context("parse in-memory url")?
        .foreign_keys(true);

    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .context("open in-memory database")?;

    migrate(&db).await?;
    Ok(db)
}

pub async fn migrate(db: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")?;
    Ok(())
}

/// SQLite-backed [`Store`].
#[derive(Clone)]
pub struct SqliteStore {
    users: SqliteUserStore,
    groups: SqliteGroupStore,
    quotes: SqliteQuoteStore,
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            users: SqliteUserStore::new(db.clone()),
            groups: SqliteGroupStore::new(db.clone()),
            quotes: SqliteQuoteStore::new(db),
        }
    }
}

impl Store for SqliteStore {
    fn users(&self) -> &dyn UserStore {
        &self.users
    }

    fn groups(&self) -> &dyn GroupStore {
        &self.groups
    }

    fn quotes(&self) -> &dyn QuoteStore {
        &self.quotes
    }
}
