use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query, query_as, SqlitePool};

use crate::domains::core::repository::FindById;
use crate::domains::profile::types::{Profile, ProfileRow};
use crate::errors::{DbError, DomainError, DomainResult};

#[async_trait]
pub trait ProfileRepository: FindById<Profile> + Send + Sync {
    /// Insert or replace the profile row for its owning identity.
    async fn upsert(&self, profile: &Profile) -> DomainResult<()>;

    async fn find_by_user(&self, user_id: &str) -> DomainResult<Option<Profile>>;

    async fn delete(&self, id: &str) -> DomainResult<()>;

    async fn delete_by_user(&self, user_id: &str) -> DomainResult<u64>;

    async fn mark_synced(&self, id: &str) -> DomainResult<()>;

    async fn adopt_server_identity(&self, local_id: &str, server_id: &str) -> DomainResult<()>;

    async fn upsert_many(&self, profiles: &[Profile]) -> DomainResult<u64>;
}

/// SQLite implementation for ProfileRepository
#[derive(Debug, Clone)]
pub struct SqliteProfileRepository {
    pool: SqlitePool,
}

impl SqliteProfileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FindById<Profile> for SqliteProfileRepository {
    async fn find_by_id(&self, id: &str) -> DomainResult<Profile> {
        let row = query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| DomainError::EntityNotFound("Profile".to_string(), id.to_string()))?;

        Profile::try_from(row)
    }
}

#[async_trait]
impl ProfileRepository for SqliteProfileRepository {
    async fn upsert(&self, profile: &Profile) -> DomainResult<()> {
        query(
            "INSERT OR REPLACE INTO profiles (id, user_id, display_name, body_weight_kg, preferred_unit, synced, last_modified)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&profile.id)
        .bind(&profile.user_id)
        .bind(&profile.display_name)
        .bind(profile.body_weight_kg)
        .bind(&profile.preferred_unit)
        .bind(profile.synced as i64)
        .bind(profile.last_modified.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(())
    }

    async fn find_by_user(&self, user_id: &str) -> DomainResult<Option<Profile>> {
        let row = query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?;

        row.map(Profile::try_from).transpose()
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        let result = query("DELETE FROM profiles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "Profile".to_string(),
                id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn delete_by_user(&self, user_id: &str) -> DomainResult<u64> {
        let result = query("DELETE FROM profiles WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }

    async fn mark_synced(&self, id: &str) -> DomainResult<()> {
        query("UPDATE profiles SET synced = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn adopt_server_identity(&self, local_id: &str, server_id: &str) -> DomainResult<()> {
        let result =
            query("UPDATE profiles SET id = ?, synced = 1, last_modified = ? WHERE id = ?")
                .bind(server_id)
                .bind(Utc::now().to_rfc3339())
                .bind(local_id)
                .execute(&self.pool)
                .await
                .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "Profile".to_string(),
                local_id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn upsert_many(&self, profiles: &[Profile]) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        for profile in profiles {
            query(
                "INSERT OR REPLACE INTO profiles (id, user_id, display_name, body_weight_kg, preferred_unit, synced, last_modified)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&profile.id)
            .bind(&profile.user_id)
            .bind(&profile.display_name)
            .bind(profile.body_weight_kg)
            .bind(&profile.preferred_unit)
            .bind(profile.synced as i64)
            .bind(profile.last_modified.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;
        }
        tx.commit().await.map_err(DbError::from)?;

        Ok(profiles.len() as u64)
    }
}
