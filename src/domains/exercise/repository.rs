use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query, query_as, QueryBuilder, Sqlite, SqlitePool};

use crate::domains::core::repository::FindById;
use crate::domains::exercise::types::{Exercise, ExerciseRow};
use crate::domains::sync::types::ExercisePayload;
use crate::errors::{DbError, DomainError, DomainResult};

#[async_trait]
pub trait ExerciseRepository: FindById<Exercise> + Send + Sync {
    async fn insert(&self, exercise: &Exercise) -> DomainResult<()>;

    async fn update_fields(&self, id: &str, patch: &ExercisePayload) -> DomainResult<Exercise>;

    async fn delete(&self, id: &str) -> DomainResult<()>;

    /// Custom (non-preset) exercises owned by a user.
    async fn find_custom_by_user(&self, user_id: &str) -> DomainResult<Vec<Exercise>>;

    async fn find_presets(&self) -> DomainResult<Vec<Exercise>>;

    async fn find_unsynced(&self) -> DomainResult<Vec<Exercise>>;

    async fn mark_synced(&self, id: &str) -> DomainResult<()>;

    async fn mark_unsynced(&self, id: &str) -> DomainResult<()>;

    async fn update_owner(&self, id: &str, new_user_id: &str) -> DomainResult<()>;

    async fn adopt_server_identity(&self, local_id: &str, server_id: &str) -> DomainResult<()>;

    async fn upsert_many(&self, exercises: &[Exercise]) -> DomainResult<u64>;
}

/// SQLite implementation for ExerciseRepository
#[derive(Debug, Clone)]
pub struct SqliteExerciseRepository {
    pool: SqlitePool,
}

impl SqliteExerciseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_rows(rows: Vec<ExerciseRow>) -> DomainResult<Vec<Exercise>> {
        rows.into_iter().map(Exercise::try_from).collect()
    }
}

#[async_trait]
impl FindById<Exercise> for SqliteExerciseRepository {
    async fn find_by_id(&self, id: &str) -> DomainResult<Exercise> {
        let row = query_as::<_, ExerciseRow>("SELECT * FROM exercises WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| DomainError::EntityNotFound("Exercise".to_string(), id.to_string()))?;

        Exercise::try_from(row)
    }
}

#[async_trait]
impl ExerciseRepository for SqliteExerciseRepository {
    async fn insert(&self, exercise: &Exercise) -> DomainResult<()> {
        query(
            "INSERT INTO exercises (id, user_id, name, muscle_group, is_preset, synced, last_modified)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&exercise.id)
        .bind(&exercise.user_id)
        .bind(&exercise.name)
        .bind(&exercise.muscle_group)
        .bind(exercise.is_preset as i64)
        .bind(exercise.synced as i64)
        .bind(exercise.last_modified.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(())
    }

    async fn update_fields(&self, id: &str, patch: &ExercisePayload) -> DomainResult<Exercise> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("UPDATE exercises SET synced = 0, last_modified = ");
        builder.push_bind(Utc::now().to_rfc3339());
        if let Some(user_id) = &patch.user_id {
            builder.push(", user_id = ");
            builder.push_bind(user_id);
        }
        if let Some(name) = &patch.name {
            builder.push(", name = ");
            builder.push_bind(name);
        }
        if let Some(muscle_group) = &patch.muscle_group {
            builder.push(", muscle_group = ");
            builder.push_bind(muscle_group);
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::EntityNotFound(
                "Exercise".to_string(),
                id.to_string(),
            ));
        }

        self.find_by_id(id).await
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        let result = query("DELETE FROM exercises WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "Exercise".to_string(),
                id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn find_custom_by_user(&self, user_id: &str) -> DomainResult<Vec<Exercise>> {
        let rows = query_as::<_, ExerciseRow>(
            "SELECT * FROM exercises WHERE user_id = ? AND is_preset = 0 ORDER BY name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Self::map_rows(rows)
    }

    async fn find_presets(&self) -> DomainResult<Vec<Exercise>> {
        let rows =
            query_as::<_, ExerciseRow>("SELECT * FROM exercises WHERE is_preset = 1 ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(DbError::from)?;

        Self::map_rows(rows)
    }

    async fn find_unsynced(&self) -> DomainResult<Vec<Exercise>> {
        let rows = query_as::<_, ExerciseRow>(
            "SELECT * FROM exercises WHERE synced = 0 ORDER BY last_modified",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Self::map_rows(rows)
    }

    async fn mark_synced(&self, id: &str) -> DomainResult<()> {
        query("UPDATE exercises SET synced = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn mark_unsynced(&self, id: &str) -> DomainResult<()> {
        query("UPDATE exercises SET synced = 0, last_modified = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn update_owner(&self, id: &str, new_user_id: &str) -> DomainResult<()> {
        let result = query("UPDATE exercises SET user_id = ?, last_modified = ? WHERE id = ?")
            .bind(new_user_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "Exercise".to_string(),
                id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn adopt_server_identity(&self, local_id: &str, server_id: &str) -> DomainResult<()> {
        let result =
            query("UPDATE exercises SET id = ?, synced = 1, last_modified = ? WHERE id = ?")
                .bind(server_id)
                .bind(Utc::now().to_rfc3339())
                .bind(local_id)
                .execute(&self.pool)
                .await
                .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "Exercise".to_string(),
                local_id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn upsert_many(&self, exercises: &[Exercise]) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        for exercise in exercises {
            query(
                "INSERT OR REPLACE INTO exercises (id, user_id, name, muscle_group, is_preset, synced, last_modified)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&exercise.id)
            .bind(&exercise.user_id)
            .bind(&exercise.name)
            .bind(&exercise.muscle_group)
            .bind(exercise.is_preset as i64)
            .bind(exercise.synced as i64)
            .bind(exercise.last_modified.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;
        }
        tx.commit().await.map_err(DbError::from)?;

        Ok(exercises.len() as u64)
    }
}
