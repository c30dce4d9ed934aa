use chrono::Utc;
use log::{debug, info};
use sqlx::SqlitePool;

use crate::errors::{DbError, DomainError, DomainResult};

// Embed all migration SQL files at compile time
const MIGRATION_CORE_TABLES: &str = include_str!("../migrations/20250601000000_core_tables.sql");
const MIGRATION_SYNC_CONTROL: &str = include_str!("../migrations/20250612000000_sync_control.sql");

// List of migrations with their names and SQL content
const MIGRATIONS: &[(&str, &str)] = &[
    ("20250601000000_core_tables.sql", MIGRATION_CORE_TABLES),
    ("20250612000000_sync_control.sql", MIGRATION_SYNC_CONTROL),
];

/// Apply any migrations not yet recorded in the `_migrations` table.
pub async fn initialize_database(pool: &SqlitePool) -> DomainResult<()> {
    create_migrations_table(pool).await?;

    for (name, sql) in MIGRATIONS {
        if migration_applied(pool, name).await? {
            debug!("Migration {} already applied", name);
            continue;
        }
        apply_migration(pool, name, sql).await?;
        info!("Applied migration {}", name);
    }

    Ok(())
}

async fn create_migrations_table(pool: &SqlitePool) -> DomainResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(DbError::from)?;

    Ok(())
}

async fn migration_applied(pool: &SqlitePool, name: &str) -> DomainResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migrations WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(DbError::from)?;

    Ok(count > 0)
}

/// Run one migration script and record it, all within a single transaction.
async fn apply_migration(pool: &SqlitePool, name: &str, sql: &str) -> DomainResult<()> {
    let mut tx = pool.begin().await.map_err(DbError::from)?;

    // SQLite can only execute one statement per prepared query.
    for statement in split_statements(sql) {
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                DomainError::Database(DbError::Migration(format!(
                    "{} failed: {} (statement: {})",
                    name, e, statement
                )))
            })?;
    }

    sqlx::query("INSERT INTO _migrations (name, applied_at) VALUES (?, ?)")
        .bind(name)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

    tx.commit().await.map_err(DbError::from)?;

    Ok(())
}

/// Split a migration script on statement-terminating semicolons, dropping
/// comment-only and empty fragments. Our migrations do not use triggers, so
/// a plain split is sufficient.
fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|fragment| {
            fragment
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_statements_skips_comments() {
        let sql = "-- a comment\nCREATE TABLE t (id TEXT);\n\n-- another\nINSERT INTO t VALUES ('x');\n";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE"));
        assert!(statements[1].starts_with("INSERT INTO"));
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = crate::database::new_test_pool().await;
        // new_test_pool ran them once; a second run must be a no-op.
        initialize_database(&pool).await.unwrap();

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_preset_exercises_seeded() {
        let pool = crate::database::new_test_pool().await;
        let presets: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM exercises WHERE is_preset = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(presets >= 6);
    }
}
