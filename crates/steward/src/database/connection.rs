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

//! SQLite connection pooling.
//!
//! Connections are pooled with `deadpool-diesel`. Each DAL operation checks a
//! connection out, runs its Diesel query inside `interact`, and returns it.
//!
//! # Example
//!
//! ```rust,ignore
//! use steward::database::Database;
//!
//! let db = Database::new("path/to/steward.db", 1)?;
//! db.run_migrations().await?;
//!
//! // Shared in-memory database, useful for tests
//! let db = Database::new("file:steward_test?mode=memory&cache=shared", 1)?;
//! ```

use deadpool_diesel::sqlite::{Manager as SqliteManager, Pool as SqlitePool, Runtime};
use tracing::info;

use crate::error::StoreError;

/// Pooled SQLite connection handle.
pub type PooledConnection = deadpool::managed::Object<SqliteManager>;

/// A pool of SQLite connections.
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
    /// Creates a connection pool for the given SQLite path or URL.
    ///
    /// Accepts a plain file path, a `sqlite://` prefixed path, `:memory:`, or a
    /// `file:` URI. SQLite handles concurrent writers poorly, so pool sizes
    /// above one trade throughput for `database is locked` retries.
    pub fn new(connection_string: &str, max_size: usize) -> Result<Self, StoreError> {
        let url = Self::build_sqlite_url(connection_string);
        let manager = SqliteManager::new(url.clone(), Runtime::Tokio1);
        let pool = SqlitePool::builder(manager)
            .max_size(max_size.max(1))
            .build()
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        info!("SQLite connection pool initialized (size: {})", max_size.max(1));

        Ok(Self { pool, url })
    }

    /// Strips a `sqlite://` scheme if present.
    pub fn build_sqlite_url(connection_string: &str) -> String {
        if let Some(path) = connection_string.strip_prefix("sqlite://") {
            path.to_string()
        } else {
            connection_string.to_string()
        }
    }

    /// The normalised connection string.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Checks a connection out of the pool.
    pub async fn get_connection(&self) -> Result<PooledConnection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))
    }

    /// Applies connection pragmas and runs all pending migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        use diesel::prelude::*;
        use diesel_migrations::MigrationHarness;

        let conn = self.get_connection().await?;
        conn.interact(|conn| {
            // WAL allows readers during a write; busy_timeout waits on locks
            // instead of failing immediately.
            diesel::sql_query("PRAGMA journal_mode=WAL;")
                .execute(conn)
                .map_err(|e| StoreError::Migration(e.to_string()))?;
            diesel::sql_query("PRAGMA busy_timeout=30000;")
                .execute(conn)
                .map_err(|e| StoreError::Migration(e.to_string()))?;
            diesel::sql_query("PRAGMA foreign_keys=ON;")
                .execute(conn)
                .map_err(|e| StoreError::Migration(e.to_string()))?;

            conn.run_pending_migrations(super::MIGRATIONS)
                .map(|applied| applied.len())
                .map_err(|e| StoreError::Migration(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
        .map(|applied| {
            info!("Applied {} pending migration(s)", applied);
        })
    }
}
