// donation_app/src/db/mod.rs

//! SQLite pool setup and the `ConversionStore` backed by it.

pub mod sqlite_store;

pub use sqlite_store::SqliteStore;

use crate::errors::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Opens a pool for `database_url`.
///
/// An in-memory database exists per connection, so it gets exactly one connection that
/// is never recycled.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
  let options = if database_url.contains(":memory:") {
    SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
  } else {
    SqlitePoolOptions::new().max_connections(5)
  };
  Ok(options.connect(database_url).await?)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
  sqlx::migrate!("./migrations").run(pool).await?;
  Ok(())
}

#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
  let pool = connect("sqlite::memory:").await.unwrap();
  migrate(&pool).await.unwrap();
  pool
}
