use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::errors::{DbError, DbResult};

/// Open (creating if necessary) the local database at the given path.
///
/// SQLite gives us single-writer semantics; the pool exists so independent
/// read paths do not block behind a long drain.
pub async fn connect(db_path: &str) -> DbResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_path)
        .map_err(DbError::Sqlx)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(DbError::Sqlx)?;

    Ok(pool)
}

/// Wipe every entity and control table in a single transaction.
///
/// Used on logout. Mapping entries are only ever removed here.
pub async fn clear_local_data(pool: &SqlitePool) -> DbResult<()> {
    const TABLES: &[&str] = &[
        "workouts",
        "workout_sets",
        "exercises",
        "profiles",
        "favorites",
        "sync_queue",
        "id_mappings",
        "sync_metadata",
    ];

    let mut tx = pool.begin().await.map_err(DbError::Sqlx)?;
    for table in TABLES {
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;
    }
    tx.commit().await.map_err(DbError::Sqlx)?;

    Ok(())
}

/// In-memory pool with migrations applied, for repository and service tests.
#[cfg(test)]
pub(crate) async fn new_test_pool() -> SqlitePool {
    // A single connection: every :memory: connection is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");

    crate::db_migration::initialize_database(&pool)
        .await
        .expect("migrations");

    pool
}
