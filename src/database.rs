use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

/// Owns the connection pool shared by the engine, the SQL collaborators and
/// the document pipeline.
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Open (creating if missing) the database and optionally run migrations.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let url = if config.url.starts_with("sqlite:") {
            config.url.clone()
        } else {
            if let Some(parent) = std::path::Path::new(&config.url).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            format!("sqlite://{}", config.url)
        };

        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        // The document worker holds its own connection alongside transitions.
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(2))
            .connect_with(options)
            .await?;
        info!(url = %config.url, "Connected to database");

        let manager = Self { pool };
        if config.auto_migrate {
            manager.migrate().await?;
        }
        Ok(manager)
    }

    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get database pool for queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_creates_and_migrates_nested_path() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            url: dir.path().join("nested/flow.db").display().to_string(),
            ..DatabaseConfig::default()
        };

        let manager = DatabaseManager::new(&config).await.unwrap();
        let seeded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM petition_types")
            .fetch_one(manager.pool())
            .await
            .unwrap();
        assert_eq!(seeded, 2);

        // Migrations are idempotent.
        manager.migrate().await.unwrap();
        manager.shutdown().await;
        assert!(manager.pool().is_closed());
    }
}
