use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query, query_as, QueryBuilder, Sqlite, SqlitePool};

use crate::domains::core::repository::FindById;
use crate::domains::sync::types::WorkoutPayload;
use crate::domains::workout::types::{Workout, WorkoutRow};
use crate::errors::{DbError, DomainError, DomainResult};

/// Trait defining workout repository operations
#[async_trait]
pub trait WorkoutRepository: FindById<Workout> + Send + Sync {
    async fn insert(&self, workout: &Workout) -> DomainResult<()>;

    /// Apply a partial update locally, flagging the record unsynced.
    async fn update_fields(&self, id: &str, patch: &WorkoutPayload) -> DomainResult<Workout>;

    async fn delete(&self, id: &str) -> DomainResult<()>;

    async fn find_by_user(&self, user_id: &str) -> DomainResult<Vec<Workout>>;

    async fn find_unsynced(&self) -> DomainResult<Vec<Workout>>;

    async fn mark_synced(&self, id: &str) -> DomainResult<()>;

    async fn mark_unsynced(&self, id: &str) -> DomainResult<()>;

    async fn update_owner(&self, id: &str, new_user_id: &str) -> DomainResult<()>;

    /// Re-key a record under the identifier the server assigned and mark it
    /// synced. The local identifier must still be present.
    async fn adopt_server_identity(&self, local_id: &str, server_id: &str) -> DomainResult<()>;

    /// Bulk write-through used to hydrate from the remote backend.
    async fn upsert_many(&self, workouts: &[Workout]) -> DomainResult<u64>;
}

/// SQLite implementation for WorkoutRepository
#[derive(Debug, Clone)]
pub struct SqliteWorkoutRepository {
    pool: SqlitePool,
}

impl SqliteWorkoutRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_rows(rows: Vec<WorkoutRow>) -> DomainResult<Vec<Workout>> {
        rows.into_iter().map(Workout::try_from).collect()
    }
}

#[async_trait]
impl FindById<Workout> for SqliteWorkoutRepository {
    async fn find_by_id(&self, id: &str) -> DomainResult<Workout> {
        let row = query_as::<_, WorkoutRow>("SELECT * FROM workouts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| DomainError::EntityNotFound("Workout".to_string(), id.to_string()))?;

        Workout::try_from(row)
    }
}

#[async_trait]
impl WorkoutRepository for SqliteWorkoutRepository {
    async fn insert(&self, workout: &Workout) -> DomainResult<()> {
        query(
            "INSERT INTO workouts (id, user_id, name, notes, started_at, duration_seconds, synced, last_modified)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&workout.id)
        .bind(&workout.user_id)
        .bind(&workout.name)
        .bind(&workout.notes)
        .bind(workout.started_at.to_rfc3339())
        .bind(workout.duration_seconds)
        .bind(workout.synced as i64)
        .bind(workout.last_modified.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(())
    }

    async fn update_fields(&self, id: &str, patch: &WorkoutPayload) -> DomainResult<Workout> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("UPDATE workouts SET synced = 0, last_modified = ");
        builder.push_bind(Utc::now().to_rfc3339());
        if let Some(user_id) = &patch.user_id {
            builder.push(", user_id = ");
            builder.push_bind(user_id);
        }
        if let Some(name) = &patch.name {
            builder.push(", name = ");
            builder.push_bind(name);
        }
        if let Some(notes) = &patch.notes {
            builder.push(", notes = ");
            builder.push_bind(notes);
        }
        if let Some(started_at) = &patch.started_at {
            builder.push(", started_at = ");
            builder.push_bind(started_at.to_rfc3339());
        }
        if let Some(duration) = patch.duration_seconds {
            builder.push(", duration_seconds = ");
            builder.push_bind(duration);
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
                "Workout".to_string(),
                id.to_string(),
            ));
        }

        self.find_by_id(id).await
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        let result = query("DELETE FROM workouts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "Workout".to_string(),
                id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn find_by_user(&self, user_id: &str) -> DomainResult<Vec<Workout>> {
        let rows = query_as::<_, WorkoutRow>(
            "SELECT * FROM workouts WHERE user_id = ? ORDER BY started_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Self::map_rows(rows)
    }

    async fn find_unsynced(&self) -> DomainResult<Vec<Workout>> {
        let rows =
            query_as::<_, WorkoutRow>("SELECT * FROM workouts WHERE synced = 0 ORDER BY last_modified")
                .fetch_all(&self.pool)
                .await
                .map_err(DbError::from)?;

        Self::map_rows(rows)
    }

    async fn mark_synced(&self, id: &str) -> DomainResult<()> {
        query("UPDATE workouts SET synced = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn mark_unsynced(&self, id: &str) -> DomainResult<()> {
        query("UPDATE workouts SET synced = 0, last_modified = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn update_owner(&self, id: &str, new_user_id: &str) -> DomainResult<()> {
        let result = query("UPDATE workouts SET user_id = ?, last_modified = ? WHERE id = ?")
            .bind(new_user_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "Workout".to_string(),
                id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn adopt_server_identity(&self, local_id: &str, server_id: &str) -> DomainResult<()> {
        let result =
            query("UPDATE workouts SET id = ?, synced = 1, last_modified = ? WHERE id = ?")
                .bind(server_id)
                .bind(Utc::now().to_rfc3339())
                .bind(local_id)
                .execute(&self.pool)
                .await
                .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "Workout".to_string(),
                local_id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn upsert_many(&self, workouts: &[Workout]) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        for workout in workouts {
            query(
                "INSERT OR REPLACE INTO workouts (id, user_id, name, notes, started_at, duration_seconds, synced, last_modified)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&workout.id)
            .bind(&workout.user_id)
            .bind(&workout.name)
            .bind(&workout.notes)
            .bind(workout.started_at.to_rfc3339())
            .bind(workout.duration_seconds)
            .bind(workout.synced as i64)
            .bind(workout.last_modified.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;
        }
        tx.commit().await.map_err(DbError::from)?;

        Ok(workouts.len() as u64)
    }
}
