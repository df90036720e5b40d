/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Database connection management.
//!
//! Wraps an async `deadpool-diesel` pool of SQLite connections. Every
//! connection handed out by [`Database::get_connection`] has foreign keys
//! enabled and a busy timeout set, so concurrent pollers wait on the write
//! lock instead of failing immediately.
//!
//! # Example
//!
//! ```rust,ignore
//! use tickerd::database::Database;
//!
//! let db = Database::try_new("sqlite://tickerd.db", 4)?;
//! db.run_migrations().await?;
//! ```

use deadpool_diesel::sqlite::{Manager as SqliteManager, Pool as SqlitePool, Runtime};
use diesel::connection::SimpleConnection;
use tracing::{debug, info};

use crate::error::{DatabaseError, ValidationError};

/// Pooled SQLite connection.
pub type PooledConnection = deadpool::managed::Object<SqliteManager>;

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;";

/// Thread-safe handle to the connection pool.
///
/// `Database` is `Clone`; clones share the same pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    url: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("url", &self.url).finish()
    }
}

impl Database {
    /// Creates a new connection pool.
    ///
    /// Accepts `sqlite://path`, a bare file path, or a `file:` URI.
    pub fn try_new(connection_string: &str, max_size: u32) -> Result<Self, DatabaseError> {
        let url = Self::build_sqlite_url(connection_string)?;
        let manager = SqliteManager::new(url.clone(), Runtime::Tokio1);
        let pool = SqlitePool::builder(manager)
            .max_size(max_size.max(1) as usize)
            .build()
            .map_err(|e| DatabaseError::PoolCreation(e.to_string()))?;

        info!("SQLite connection pool initialized (size: {})", max_size.max(1));

        Ok(Self { pool, url })
    }

    /// The resolved connection path.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns a clone of the connection pool.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    /// Checks a connection out of the pool and applies per-connection pragmas.
    pub async fn get_connection(&self) -> Result<PooledConnection, ValidationError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        conn.interact(|conn| conn.batch_execute(CONNECTION_PRAGMAS))
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(conn)
    }

    /// Runs pending migrations.
    ///
    /// Switches the database file to WAL mode first so readers are not
    /// blocked by the single writer.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        use diesel_migrations::MigrationHarness;

        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        conn.interact(|conn| {
            conn.batch_execute("PRAGMA journal_mode = WAL;")
                .map_err(|e| DatabaseError::Migration(format!("failed to enable WAL: {}", e)))?;
            conn.batch_execute(CONNECTION_PRAGMAS)
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;

            let applied = conn
                .run_pending_migrations(crate::database::SQLITE_MIGRATIONS)
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            debug!("Applied {} migration(s)", applied.len());
            Ok::<_, DatabaseError>(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))??;

        info!("Database migrations complete");
        Ok(())
    }

    fn build_sqlite_url(connection_string: &str) -> Result<String, DatabaseError> {
        let trimmed = connection_string.trim();
        if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
            return Err(DatabaseError::UnsupportedUrl(trimmed.to_string()));
        }

        let path = trimmed.strip_prefix("sqlite://").unwrap_or(trimmed);
        if path.is_empty() {
            return Err(DatabaseError::UnsupportedUrl(connection_string.to_string()));
        }
        Ok(path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_sqlite_scheme() {
        assert_eq!(
            Database::build_sqlite_url("sqlite:///var/lib/tickerd.db").unwrap(),
            "/var/lib/tickerd.db"
        );
        assert_eq!(
            Database::build_sqlite_url("./local.db").unwrap(),
            "./local.db"
        );
    }

    #[test]
    fn test_rejects_postgres_urls() {
        let err = Database::build_sqlite_url("postgres://localhost/db").unwrap_err();
        assert!(matches!(err, DatabaseError::UnsupportedUrl(_)));
    }

    #[test]
    fn test_rejects_empty_path() {
        assert!(Database::build_sqlite_url("sqlite://").is_err());
    }

    #[tokio::test]
    async fn test_connection_has_foreign_keys_enabled() {
        use diesel::prelude::*;
        use diesel::sql_types::Integer;

        #[derive(QueryableByName)]
        struct Pragma {
            #[diesel(sql_type = Integer)]
            foreign_keys: i32,
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pragma.db");
        let db = Database::try_new(path.to_str().unwrap(), 1).unwrap();

        let conn = db.get_connection().await.unwrap();
        let pragma: Pragma = conn
            .interact(|conn| diesel::sql_query("PRAGMA foreign_keys").get_result(conn))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pragma.foreign_keys, 1);
    }
}
