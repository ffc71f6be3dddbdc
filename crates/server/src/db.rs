use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use initializer::{Context, Initialize, UnitResult};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::AppConfig;
use crate::error::Result;
use crate::{CONFIG, DB, STARTUP};

/// Open a sqlite pool for `database_url`.
///
/// An in-memory database lives in a single connection, so those pools are
/// capped at one connection that is never reaped.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30))
        .foreign_keys(true);

    let pool = if is_in_memory(database_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .idle_timeout(Duration::from_secs(600))
    };

    Ok(pool
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?)
}

const POOL_SIZE: u32 = 10;

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Apply the migrations found in `dir`. Returns `false` if `dir` does not exist.
pub async fn run_migrations(pool: &SqlitePool, dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    let migrator = Migrator::new(dir).await?;
    migrator.run(pool).await?;
    Ok(true)
}

/// Opens the connection pool and installs it as the `db` capability.
pub struct DatabaseInitializer;

#[async_trait]
impl Initialize for DatabaseInitializer {
    fn phase(&self) -> &str {
        STARTUP
    }

    fn name(&self) -> &str {
        "db"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["config".to_string(), "logging".to_string()]
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(30))
    }

    async fn run(&self, ctx: &mut Context) -> UnitResult {
        let url = ctx.get::<AppConfig>(CONFIG)?.database_url.clone();
        let pool = create_pool(&url)
            .await
            .with_context(|| format!("opening database {url}"))?;

        info!(database_url = %url, "Database pool ready");
        ctx.insert(DB, pool)?;
        Ok(())
    }
}

pub struct MigrateInitializer;

#[async_trait]
impl Initialize for MigrateInitializer {
    fn phase(&self) -> &str {
        STARTUP
    }

    fn name(&self) -> &str {
        "db.migrate"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["config".to_string(), "db".to_string()]
    }

    async fn run(&self, ctx: &mut Context) -> UnitResult {
        let dir = ctx.get::<AppConfig>(CONFIG)?.migrations_dir.clone();
        let pool = ctx.get::<SqlitePool>(DB)?.clone();

        if run_migrations(&pool, &dir).await? {
            info!(dir = %dir.display(), "Migrations applied");
        } else {
            info!(dir = %dir.display(), "No migrations directory, skipping");
        }
        Ok(())
    }
}
