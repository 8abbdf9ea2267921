use std::str::FromStr;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// Shared SQLite handle for snapshot, performance-record and alert storage.
#[derive(Clone)]
pub struct GovernanceDb {
    pool: SqlitePool,
}

impl GovernanceDb {
    /// Connect and apply the schema.
    ///
    /// In-memory URLs are pinned to a single long-lived connection, since every
    /// SQLite connection would otherwise open its own private database.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let db = Self { pool };
        db.init_schema().await?;
        tracing::debug!("Governance schema ready at {}", database_url);

        Ok(db)
    }

    /// Connect when a URL is configured and reachable. `None` means the
    /// caller keeps its state in memory; the reason is warn-logged.
    pub async fn connect_optional(database_url: Option<&str>) -> Option<Self> {
        let Some(url) = database_url.filter(|url| !url.trim().is_empty()) else {
            tracing::warn!("No DATABASE_URL configured, governance state is in-memory only");
            return None;
        };

        match Self::new(url).await {
            Ok(db) => Some(db),
            Err(e) => {
                tracing::warn!(
                    "Governance database unavailable ({}), falling back to in-memory storage",
                    e
                );
                None
            }
        }
    }

    /// Initialize database schema
    async fn init_schema(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");

        // sqlx executes one statement per query
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }

        Ok(())
    }

    /// Get the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
