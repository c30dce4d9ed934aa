use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query, query_as, QueryBuilder, Sqlite, SqlitePool};

use crate::domains::core::repository::FindById;
use crate::domains::sync::types::WorkoutSetPayload;
use crate::domains::workout_set::types::{WorkoutSet, WorkoutSetRow};
use crate::errors::{DbError, DomainError, DomainResult};

#[async_trait]
pub trait WorkoutSetRepository: FindById<WorkoutSet> + Send + Sync {
    async fn insert(&self, set: &WorkoutSet) -> DomainResult<()>;

    async fn update_fields(&self, id: &str, patch: &WorkoutSetPayload) -> DomainResult<WorkoutSet>;

    async fn delete(&self, id: &str) -> DomainResult<()>;

    async fn find_by_workout(&self, workout_id: &str) -> DomainResult<Vec<WorkoutSet>>;

    async fn find_unsynced(&self) -> DomainResult<Vec<WorkoutSet>>;

    async fn mark_synced(&self, id: &str) -> DomainResult<()>;

    async fn mark_unsynced(&self, id: &str) -> DomainResult<()>;

    async fn adopt_server_identity(&self, local_id: &str, server_id: &str) -> DomainResult<()>;

    /// Point stored sets at a parent workout's server identifier.
    async fn rewrite_workout_ref(&self, old_id: &str, new_id: &str) -> DomainResult<u64>;

    /// Point stored sets at an exercise's server identifier.
    async fn rewrite_exercise_ref(&self, old_id: &str, new_id: &str) -> DomainResult<u64>;

    async fn delete_by_workout(&self, workout_id: &str) -> DomainResult<u64>;

    async fn upsert_many(&self, sets: &[WorkoutSet]) -> DomainResult<u64>;
}

/// SQLite implementation for WorkoutSetRepository
#[derive(Debug, Clone)]
pub struct SqliteWorkoutSetRepository {
    pool: SqlitePool,
}

impl SqliteWorkoutSetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_rows(rows: Vec<WorkoutSetRow>) -> DomainResult<Vec<WorkoutSet>> {
        rows.into_iter().map(WorkoutSet::try_from).collect()
    }
}

#[async_trait]
impl FindById<WorkoutSet> for SqliteWorkoutSetRepository {
    async fn find_by_id(&self, id: &str) -> DomainResult<WorkoutSet> {
        let row = query_as::<_, WorkoutSetRow>("SELECT * FROM workout_sets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| DomainError::EntityNotFound("WorkoutSet".to_string(), id.to_string()))?;

        WorkoutSet::try_from(row)
    }
}

#[async_trait]
impl WorkoutSetRepository for SqliteWorkoutSetRepository {
    async fn insert(&self, set: &WorkoutSet) -> DomainResult<()> {
        query(
            "INSERT INTO workout_sets (id, workout_id, exercise_id, set_number, reps, weight_kg, completed, synced, last_modified)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&set.id)
        .bind(&set.workout_id)
        .bind(&set.exercise_id)
        .bind(set.set_number)
        .bind(set.reps)
        .bind(set.weight_kg)
        .bind(set.completed as i64)
        .bind(set.synced as i64)
        .bind(set.last_modified.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(())
    }

    async fn update_fields(&self, id: &str, patch: &WorkoutSetPayload) -> DomainResult<WorkoutSet> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("UPDATE workout_sets SET synced = 0, last_modified = ");
        builder.push_bind(Utc::now().to_rfc3339());
        if let Some(workout_id) = &patch.workout_id {
            builder.push(", workout_id = ");
            builder.push_bind(workout_id);
        }
        if let Some(exercise_id) = &patch.exercise_id {
            builder.push(", exercise_id = ");
            builder.push_bind(exercise_id);
        }
        if let Some(set_number) = patch.set_number {
            builder.push(", set_number = ");
            builder.push_bind(set_number);
        }
        if let Some(reps) = patch.reps {
            builder.push(", reps = ");
            builder.push_bind(reps);
        }
        if let Some(weight_kg) = patch.weight_kg {
            builder.push(", weight_kg = ");
            builder.push_bind(weight_kg);
        }
        if let Some(completed) = patch.completed {
            builder.push(", completed = ");
            builder.push_bind(completed as i64);
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
                "WorkoutSet".to_string(),
                id.to_string(),
            ));
        }

        self.find_by_id(id).await
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        let result = query("DELETE FROM workout_sets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "WorkoutSet".to_string(),
                id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn find_by_workout(&self, workout_id: &str) -> DomainResult<Vec<WorkoutSet>> {
        let rows = query_as::<_, WorkoutSetRow>(
            "SELECT * FROM workout_sets WHERE workout_id = ? ORDER BY set_number",
        )
        .bind(workout_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Self::map_rows(rows)
    }

    async fn find_unsynced(&self) -> DomainResult<Vec<WorkoutSet>> {
        let rows = query_as::<_, WorkoutSetRow>(
            "SELECT * FROM workout_sets WHERE synced = 0 ORDER BY last_modified",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Self::map_rows(rows)
    }

    async fn mark_synced(&self, id: &str) -> DomainResult<()> {
        query("UPDATE workout_sets SET synced = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn mark_unsynced(&self, id: &str) -> DomainResult<()> {
        query("UPDATE workout_sets SET synced = 0, last_modified = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn adopt_server_identity(&self, local_id: &str, server_id: &str) -> DomainResult<()> {
        let result =
            query("UPDATE workout_sets SET id = ?, synced = 1, last_modified = ? WHERE id = ?")
                .bind(server_id)
                .bind(Utc::now().to_rfc3339())
                .bind(local_id)
                .execute(&self.pool)
                .await
                .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound(
                "WorkoutSet".to_string(),
                local_id.to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn rewrite_workout_ref(&self, old_id: &str, new_id: &str) -> DomainResult<u64> {
        let result = query("UPDATE workout_sets SET workout_id = ? WHERE workout_id = ?")
            .bind(new_id)
            .bind(old_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }

    async fn rewrite_exercise_ref(&self, old_id: &str, new_id: &str) -> DomainResult<u64> {
        let result = query("UPDATE workout_sets SET exercise_id = ? WHERE exercise_id = ?")
            .bind(new_id)
            .bind(old_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }

    async fn delete_by_workout(&self, workout_id: &str) -> DomainResult<u64> {
        let result = query("DELETE FROM workout_sets WHERE workout_id = ?")
            .bind(workout_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }

    async fn upsert_many(&self, sets: &[WorkoutSet]) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        for set in sets {
            query(
                "INSERT OR REPLACE INTO workout_sets (id, workout_id, exercise_id, set_number, reps, weight_kg, completed, synced, last_modified)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&set.id)
            .bind(&set.workout_id)
            .bind(&set.exercise_id)
            .bind(set.set_number)
            .bind(set.reps)
            .bind(set.weight_kg)
            .bind(set.completed as i64)
            .bind(set.synced as i64)
            .bind(set.last_modified.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;
        }
        tx.commit().await.map_err(DbError::from)?;

        Ok(sets.len() as u64)
    }
}
