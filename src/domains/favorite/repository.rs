use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query, query_as, SqlitePool};

use crate::domains::core::repository::FindById;
use crate::domains::favorite::types::{Favorite, FavoriteRow};
use crate::errors::{DbError, DomainError, DomainResult};

#[async_trait]
pub trait FavoriteRepository: FindById<Favorite> + Send + Sync {
    async fn insert(&self, favorite: &Favorite) -> DomainResult<()>;

    async fn delete(&self, id: &str) -> DomainResult<()>;

    async fn find_by_user(&self, user_id: &str) -> DomainResult<Vec<Favorite>>;

    async fn mark_synced(&self, id: &str) -> DomainResult<()>;

    async fn mark_unsynced(&self, id: &str) -> DomainResult<()>;

    async fn update_owner(&self, id: &str, new_user_id: &str) -> DomainResult<()>;

    async fn adopt_server_identity(&self, local_id: &str, server_id: &str) -> DomainResult<()>;

    /// Point stored favorites at an exercise's server identifier.
    async fn rewrite_exercise_ref(&self, old_id: &str, new_id: &str) -> DomainResult<u64>;

    async fn delete_by_user(&self, user_id: &str) -> DomainResult<u64>;

    async fn upsert_many(&self, favorites: &[Favorite]) -> DomainResult<u64>;
}

/// SQLite implementation for FavoriteRepository
#[derive(Debug, Clone)]
pub struct SqliteFavoriteRepository {
    pool: SqlitePool,
}

impl SqliteFavoriteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FindById<Favorite> for SqliteFavoriteRepository {
    async fn find_by_id(&self, id: &str) -> DomainResult<Favorite> {
        let row = query_as::<_, FavoriteRow>("SELECT * FROM favorites WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| DomainError::EntityNotFound("Favorite".to_string(), id.to_string()))?;

        Favorite::try_from(row)
    }
}

#[async_trait]
impl FavoriteRepository for SqliteFavoriteRepository {
    async fn insert(&self, favorite: &Favorite) -> DomainResult<()> {
        query(
            "INSERT INTO favorites (id, user_id, exercise_id, created_at, synced, last_modified)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&favorite.id)
        .bind(&favorite.user_id)
        .bind(&favorite.exercise_id)
        .bind(favorite.created_at.to_rfc3339())
        .bind(favorite.synced as i64)
        .bind(favorite.last_modified.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        let result = query("DELETE FROM favorites WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "Favorite".to_string(),
                id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn find_by_user(&self, user_id: &str) -> DomainResult<Vec<Favorite>> {
        let rows = query_as::<_, FavoriteRow>(
            "SELECT * FROM favorites WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        rows.into_iter().map(Favorite::try_from).collect()
    }

    async fn mark_synced(&self, id: &str) -> DomainResult<()> {
        query("UPDATE favorites SET synced = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn mark_unsynced(&self, id: &str) -> DomainResult<()> {
        query("UPDATE favorites SET synced = 0, last_modified = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn update_owner(&self, id: &str, new_user_id: &str) -> DomainResult<()> {
        let result = query("UPDATE favorites SET user_id = ?, last_modified = ? WHERE id = ?")
            .bind(new_user_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "Favorite".to_string(),
                id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn adopt_server_identity(&self, local_id: &str, server_id: &str) -> DomainResult<()> {
        let result =
            query("UPDATE favorites SET id = ?, synced = 1, last_modified = ? WHERE id = ?")
                .bind(server_id)
                .bind(Utc::now().to_rfc3339())
                .bind(local_id)
                .execute(&self.pool)
                .await
                .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "Favorite".to_string(),
                local_id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn rewrite_exercise_ref(&self, old_id: &str, new_id: &str) -> DomainResult<u64> {
        let result = query("UPDATE favorites SET exercise_id = ? WHERE exercise_id = ?")
            .bind(new_id)
            .bind(old_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }

    async fn delete_by_user(&self, user_id: &str) -> DomainResult<u64> {
        let result = query("DELETE FROM favorites WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }

    async fn upsert_many(&self, favorites: &[Favorite]) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        for favorite in favorites {
            query(
                "INSERT OR REPLACE INTO favorites (id, user_id, exercise_id, created_at, synced, last_modified)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&favorite.id)
            .bind(&favorite.user_id)
            .bind(&favorite.exercise_id)
            .bind(favorite.created_at.to_rfc3339())
            .bind(favorite.synced as i64)
            .bind(favorite.last_modified.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;
        }
        tx.commit().await.map_err(DbError::from)?;

        Ok(favorites.len() as u64)
    }
}
