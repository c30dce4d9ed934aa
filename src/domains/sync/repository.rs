use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use sqlx::{query, query_as, query_scalar, QueryBuilder, Sqlite, SqlitePool};

use crate::domains::sync::types::{QueueItem, QueueItemRow, QueueOperation, QueuePayload};
use crate::errors::{DbError, DomainError, DomainResult};
use crate::types::EntityTable;

/// Repository for the pending-operation queue
#[async_trait]
pub trait OperationQueueRepository: Send + Sync {
    /// Append a pending mutation. The payload is validated against the
    /// `(table, operation)` slot. Returns the assigned sequence number.
    async fn enqueue(
        &self,
        table: EntityTable,
        operation: QueueOperation,
        entity_id: &str,
        payload: QueuePayload,
    ) -> DomainResult<i64>;

    /// Next item by drain priority: workout creates first, then any other
    /// workout operation, then the globally oldest item. `exclude` carries
    /// the sequence numbers already attempted in the current drain.
    async fn next_pending(&self, exclude: &[i64]) -> DomainResult<Option<QueueItem>>;

    /// Collapse all queued operations per `(table, entity_id)` into the
    /// minimal equivalent operation. Returns how many items were removed.
    async fn consolidate(&self) -> DomainResult<u64>;

    async fn pending_count(&self) -> DomainResult<i64>;

    async fn items_for_entity(
        &self,
        table: EntityTable,
        entity_id: &str,
    ) -> DomainResult<Vec<QueueItem>>;

    async fn remove(&self, seq: i64) -> DomainResult<()>;

    async fn remove_for_entity(&self, table: EntityTable, entity_id: &str) -> DomainResult<u64>;

    /// Increment the retry counter and store the error. Returns the new count.
    async fn record_failure(&self, seq: i64, error: &str) -> DomainResult<i64>;

    /// Drop items whose retry counter reached the given budget.
    async fn prune_exhausted(&self, max_retries: i64) -> DomainResult<u64>;

    /// Rewrite payload references from a local identifier to the identifier
    /// the server assigned. Returns how many items changed.
    async fn rewrite_identifier(&self, old_id: &str, new_id: &str) -> DomainResult<u64>;
}

/// Persistent side of the identifier-mapping layer. The in-memory cache
/// lives in `IdMapper`.
#[async_trait]
pub trait IdMappingRepository: Send + Sync {
    /// Record a mapping. Existing entries are never overwritten.
    async fn insert(
        &self,
        local_id: &str,
        server_id: &str,
        table: EntityTable,
    ) -> DomainResult<()>;

    async fn find_server_id(&self, local_id: &str) -> DomainResult<Option<String>>;

    async fn load_all(&self) -> DomainResult<Vec<(String, String)>>;

    /// Logout only.
    async fn clear(&self) -> DomainResult<()>;
}

/// Last-sync bookkeeping keyed by a sync-scope string.
#[async_trait]
pub trait SyncMetadataRepository: Send + Sync {
    async fn set_last_synced(&self, scope: &str, at: DateTime<Utc>) -> DomainResult<()>;

    async fn get_last_synced(&self, scope: &str) -> DomainResult<Option<DateTime<Utc>>>;
}

/// SQLite implementation of the OperationQueueRepository
pub struct SqliteOperationQueueRepository {
    pool: SqlitePool,
}

impl SqliteOperationQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_rows(rows: Vec<QueueItemRow>) -> DomainResult<Vec<QueueItem>> {
        rows.into_iter().map(QueueItem::try_from).collect()
    }
}

#[async_trait]
impl OperationQueueRepository for SqliteOperationQueueRepository {
    async fn enqueue(
        &self,
        table: EntityTable,
        operation: QueueOperation,
        entity_id: &str,
        payload: QueuePayload,
    ) -> DomainResult<i64> {
        payload.validate_for(table, operation)?;

        let payload_json = serde_json::to_string(&payload)
            .map_err(|e| DomainError::Internal(format!("Failed to serialize payload: {}", e)))?;

        let result = query(
            "INSERT INTO sync_queue (entity_table, operation, entity_id, payload, created_at, retry_count)
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(table.as_str())
        .bind(operation.as_str())
        .bind(entity_id)
        .bind(payload_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        let seq = result.last_insert_rowid();
        debug!(
            "Enqueued {} {} for {} (seq {})",
            operation.as_str(),
            table.as_str(),
            entity_id,
            seq
        );
        Ok(seq)
    }

    async fn next_pending(&self, exclude: &[i64]) -> DomainResult<Option<QueueItem>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM sync_queue");
        if !exclude.is_empty() {
            builder.push(" WHERE seq NOT IN (");
            {
                let mut separated = builder.separated(", ");
                for seq in exclude {
                    separated.push_bind(*seq);
                }
            }
            builder.push(")");
        }
        // Parent creates drain first so dependents can be rewritten.
        builder.push(
            " ORDER BY CASE
                 WHEN entity_table = 'workouts' AND operation = 'create' THEN 0
                 WHEN entity_table = 'workouts' THEN 1
                 ELSE 2
             END, seq LIMIT 1",
        );

        let row = builder
            .build_query_as::<QueueItemRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?;

        row.map(QueueItem::try_from).transpose()
    }

    async fn consolidate(&self) -> DomainResult<u64> {
        let rows = query_as::<_, QueueItemRow>("SELECT * FROM sync_queue ORDER BY seq")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;
        let items = Self::map_rows(rows)?;

        // Stable grouping by first appearance keeps the output reproducible.
        let mut order: Vec<(EntityTable, String)> = Vec::new();
        let mut groups: HashMap<(EntityTable, String), Vec<QueueItem>> = HashMap::new();
        for item in items {
            let key = (item.entity_table, item.entity_id.clone());
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(item);
        }

        let mut removed = 0u64;
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;

        for key in order {
            let group = &groups[&key];
            if group.len() < 2 {
                continue;
            }

            let first_op = group.first().map(|i| i.operation);
            let last = group.last().expect("non-empty group");

            // Created and deleted entirely offline: nothing ever reached the
            // server, so the whole group can vanish.
            if first_op == Some(QueueOperation::Create)
                && last.operation == QueueOperation::Delete
            {
                for item in group {
                    query("DELETE FROM sync_queue WHERE seq = ?")
                        .bind(item.seq)
                        .execute(&mut *tx)
                        .await
                        .map_err(DbError::from)?;
                    removed += 1;
                }
                debug!(
                    "Consolidation cancelled create+delete for {} {}",
                    key.0.as_str(),
                    key.1
                );
                continue;
            }

            let mut merged = group[0].payload.clone();
            for item in &group[1..] {
                merged.merge_from(&item.payload);
            }
            // A never-uploaded entity must still arrive as a create.
            let operation = if first_op == Some(QueueOperation::Create) {
                QueueOperation::Create
            } else {
                last.operation
            };

            for item in &group[..group.len() - 1] {
                query("DELETE FROM sync_queue WHERE seq = ?")
                    .bind(item.seq)
                    .execute(&mut *tx)
                    .await
                    .map_err(DbError::from)?;
                removed += 1;
            }

            let payload_json = serde_json::to_string(&merged).map_err(|e| {
                DomainError::Internal(format!("Failed to serialize payload: {}", e))
            })?;
            query("UPDATE sync_queue SET operation = ?, payload = ? WHERE seq = ?")
                .bind(operation.as_str())
                .bind(payload_json)
                .bind(last.seq)
                .execute(&mut *tx)
                .await
                .map_err(DbError::from)?;
        }

        tx.commit().await.map_err(DbError::from)?;

        if removed > 0 {
            debug!("Consolidation removed {} queue items", removed);
        }
        Ok(removed)
    }

    async fn pending_count(&self) -> DomainResult<i64> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(count)
    }

    async fn items_for_entity(
        &self,
        table: EntityTable,
        entity_id: &str,
    ) -> DomainResult<Vec<QueueItem>> {
        let rows = query_as::<_, QueueItemRow>(
            "SELECT * FROM sync_queue WHERE entity_table = ? AND entity_id = ? ORDER BY seq",
        )
        .bind(table.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Self::map_rows(rows)
    }

    async fn remove(&self, seq: i64) -> DomainResult<()> {
        query("DELETE FROM sync_queue WHERE seq = ?")
            .bind(seq)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn remove_for_entity(&self, table: EntityTable, entity_id: &str) -> DomainResult<u64> {
        let result = query("DELETE FROM sync_queue WHERE entity_table = ? AND entity_id = ?")
            .bind(table.as_str())
            .bind(entity_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }

    async fn record_failure(&self, seq: i64, error: &str) -> DomainResult<i64> {
        let result = query(
            "UPDATE sync_queue SET retry_count = retry_count + 1, last_error = ? WHERE seq = ?",
        )
        .bind(error)
        .bind(seq)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::EntityNotFound(
                "QueueItem".to_string(),
                seq.to_string(),
            ));
        }

        let retry_count: i64 = query_scalar("SELECT retry_count FROM sync_queue WHERE seq = ?")
            .bind(seq)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(retry_count)
    }

    async fn prune_exhausted(&self, max_retries: i64) -> DomainResult<u64> {
        let result = query("DELETE FROM sync_queue WHERE retry_count >= ?")
            .bind(max_retries)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }

    async fn rewrite_identifier(&self, old_id: &str, new_id: &str) -> DomainResult<u64> {
        let rows = query_as::<_, QueueItemRow>("SELECT * FROM sync_queue ORDER BY seq")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;
        let items = Self::map_rows(rows)?;

        let mut changed = 0u64;
        for mut item in items {
            if !item.payload.rewrite_matching(old_id, new_id) {
                continue;
            }
            let payload_json = serde_json::to_string(&item.payload).map_err(|e| {
                DomainError::Internal(format!("Failed to serialize payload: {}", e))
            })?;
            query("UPDATE sync_queue SET payload = ? WHERE seq = ?")
                .bind(payload_json)
                .bind(item.seq)
                .execute(&self.pool)
                .await
                .map_err(DbError::from)?;
            changed += 1;
        }

        Ok(changed)
    }
}

/// SQLite implementation of the IdMappingRepository
pub struct SqliteIdMappingRepository {
    pool: SqlitePool,
}

impl SqliteIdMappingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdMappingRepository for SqliteIdMappingRepository {
    async fn insert(
        &self,
        local_id: &str,
        server_id: &str,
        table: EntityTable,
    ) -> DomainResult<()> {
        query(
            "INSERT OR IGNORE INTO id_mappings (local_id, server_id, entity_table, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(local_id)
        .bind(server_id)
        .bind(table.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(())
    }

    async fn find_server_id(&self, local_id: &str) -> DomainResult<Option<String>> {
        let server_id: Option<String> =
            query_scalar("SELECT server_id FROM id_mappings WHERE local_id = ?")
                .bind(local_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DbError::from)?;

        Ok(server_id)
    }

    async fn load_all(&self) -> DomainResult<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            query_as("SELECT local_id, server_id FROM id_mappings")
                .fetch_all(&self.pool)
                .await
                .map_err(DbError::from)?;

        Ok(rows)
    }

    async fn clear(&self) -> DomainResult<()> {
        query("DELETE FROM id_mappings")
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(())
    }
}

/// SQLite implementation of the SyncMetadataRepository
pub struct SqliteSyncMetadataRepository {
    pool: SqlitePool,
}

impl SqliteSyncMetadataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncMetadataRepository for SqliteSyncMetadataRepository {
    async fn set_last_synced(&self, scope: &str, at: DateTime<Utc>) -> DomainResult<()> {
        query(
            "INSERT OR REPLACE INTO sync_metadata (scope, last_synced_at, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(scope)
        .bind(at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(())
    }

    async fn get_last_synced(&self, scope: &str) -> DomainResult<Option<DateTime<Utc>>> {
        let raw: Option<String> =
            query_scalar("SELECT last_synced_at FROM sync_metadata WHERE scope = ?")
                .bind(scope)
                .fetch_optional(&self.pool)
                .await
                .map_err(DbError::from)?;

        crate::types::parse_optional_datetime(raw, "sync_metadata.last_synced_at")
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::new_test_pool;
    use crate::domains::sync::types::{WorkoutPayload, WorkoutSetPayload};

    fn workout_payload(name: &str) -> QueuePayload {
        QueuePayload::Workout(WorkoutPayload {
            name: Some(name.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_enqueue_rejects_mismatched_payload() {
        let pool = new_test_pool().await;
        let queue = SqliteOperationQueueRepository::new(pool);

        let err = queue
            .enqueue(
                EntityTable::Favorites,
                QueueOperation::Create,
                "local-1",
                workout_payload("Push day"),
            )
            .await;
        assert!(err.is_err());

        // Deletes must not carry fields.
        let err = queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Delete,
                "local-1",
                workout_payload("Push day"),
            )
            .await;
        assert!(err.is_err());

        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consolidation_merges_create_and_updates() {
        let pool = new_test_pool().await;
        let queue = SqliteOperationQueueRepository::new(pool);

        queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Create,
                "local-x",
                QueuePayload::Workout(WorkoutPayload {
                    user_id: Some("usr-1".into()),
                    name: Some("Push day".into()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Update,
                "local-x",
                QueuePayload::Workout(WorkoutPayload {
                    notes: Some("felt strong".into()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Update,
                "local-x",
                QueuePayload::Workout(WorkoutPayload {
                    duration_seconds: Some(2700),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        queue.consolidate().await.unwrap();

        let items = queue
            .items_for_entity(EntityTable::Workouts, "local-x")
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.operation, QueueOperation::Create);
        match &item.payload {
            QueuePayload::Workout(p) => {
                assert_eq!(p.user_id.as_deref(), Some("usr-1"));
                assert_eq!(p.name.as_deref(), Some("Push day"));
                assert_eq!(p.notes.as_deref(), Some("felt strong"));
                assert_eq!(p.duration_seconds, Some(2700));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_consolidation_cancels_create_then_delete() {
        let pool = new_test_pool().await;
        let queue = SqliteOperationQueueRepository::new(pool);

        queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Create,
                "local-y",
                workout_payload("Doomed"),
            )
            .await
            .unwrap();
        queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Delete,
                "local-y",
                QueuePayload::Empty,
            )
            .await
            .unwrap();

        let removed = queue.consolidate().await.unwrap();
        assert_eq!(removed, 2);
        assert!(queue
            .items_for_entity(EntityTable::Workouts, "local-y")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_consolidation_update_then_delete_keeps_delete() {
        let pool = new_test_pool().await;
        let queue = SqliteOperationQueueRepository::new(pool);

        queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Update,
                "srv-5",
                workout_payload("Renamed"),
            )
            .await
            .unwrap();
        queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Delete,
                "srv-5",
                QueuePayload::Empty,
            )
            .await
            .unwrap();

        queue.consolidate().await.unwrap();

        let items = queue
            .items_for_entity(EntityTable::Workouts, "srv-5")
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].operation, QueueOperation::Delete);
    }

    #[tokio::test]
    async fn test_next_pending_prioritizes_workout_creates() {
        let pool = new_test_pool().await;
        let queue = SqliteOperationQueueRepository::new(pool);

        // Oldest first: a set create, then a workout update, then a workout create.
        queue
            .enqueue(
                EntityTable::WorkoutSets,
                QueueOperation::Create,
                "local-s1",
                QueuePayload::WorkoutSet(WorkoutSetPayload {
                    workout_id: Some("local-w1".into()),
                    reps: Some(5),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Update,
                "srv-9",
                workout_payload("Renamed"),
            )
            .await
            .unwrap();
        let create_seq = queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Create,
                "local-w1",
                workout_payload("Leg day"),
            )
            .await
            .unwrap();

        let first = queue.next_pending(&[]).await.unwrap().unwrap();
        assert_eq!(first.seq, create_seq);
        assert_eq!(first.operation, QueueOperation::Create);
        assert_eq!(first.entity_table, EntityTable::Workouts);

        // Excluding the create, the workout update comes before the older set.
        let second = queue.next_pending(&[create_seq]).await.unwrap().unwrap();
        assert_eq!(second.entity_table, EntityTable::Workouts);
        assert_eq!(second.operation, QueueOperation::Update);

        let third = queue
            .next_pending(&[create_seq, second.seq])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(third.entity_table, EntityTable::WorkoutSets);
    }

    #[tokio::test]
    async fn test_record_failure_and_prune() {
        let pool = new_test_pool().await;
        let queue = SqliteOperationQueueRepository::new(pool);

        let seq = queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Create,
                "local-z",
                workout_payload("Flaky"),
            )
            .await
            .unwrap();

        assert_eq!(queue.record_failure(seq, "boom").await.unwrap(), 1);
        assert_eq!(queue.record_failure(seq, "boom again").await.unwrap(), 2);

        let items = queue
            .items_for_entity(EntityTable::Workouts, "local-z")
            .await
            .unwrap();
        assert_eq!(items[0].last_error.as_deref(), Some("boom again"));

        assert_eq!(queue.prune_exhausted(2).await.unwrap(), 1);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rewrite_identifier_touches_only_matching_payloads() {
        let pool = new_test_pool().await;
        let queue = SqliteOperationQueueRepository::new(pool);

        queue
            .enqueue(
                EntityTable::WorkoutSets,
                QueueOperation::Create,
                "local-s1",
                QueuePayload::WorkoutSet(WorkoutSetPayload {
                    workout_id: Some("local-w1".into()),
                    exercise_id: Some("preset-deadlift".into()),
                    reps: Some(3),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        queue
            .enqueue(
                EntityTable::WorkoutSets,
                QueueOperation::Create,
                "local-s2",
                QueuePayload::WorkoutSet(WorkoutSetPayload {
                    workout_id: Some("srv-77".into()),
                    reps: Some(8),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        assert_eq!(
            queue.rewrite_identifier("local-w1", "srv-42").await.unwrap(),
            1
        );

        let items = queue
            .items_for_entity(EntityTable::WorkoutSets, "local-s1")
            .await
            .unwrap();
        match &items[0].payload {
            QueuePayload::WorkoutSet(p) => {
                assert_eq!(p.workout_id.as_deref(), Some("srv-42"));
                assert_eq!(p.exercise_id.as_deref(), Some("preset-deadlift"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mapping_survives_without_overwrite() {
        let pool = new_test_pool().await;
        let mappings = SqliteIdMappingRepository::new(pool);

        mappings
            .insert("local-a", "srv-1", EntityTable::Workouts)
            .await
            .unwrap();
        // A second insert for the same local id must not overwrite.
        mappings
            .insert("local-a", "srv-2", EntityTable::Workouts)
            .await
            .unwrap();

        assert_eq!(
            mappings.find_server_id("local-a").await.unwrap().as_deref(),
            Some("srv-1")
        );
        assert_eq!(mappings.find_server_id("local-b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let pool = new_test_pool().await;
        let metadata = SqliteSyncMetadataRepository::new(pool);

        assert!(metadata.get_last_synced("drain").await.unwrap().is_none());

        let at = Utc::now();
        metadata.set_last_synced("drain", at).await.unwrap();
        let stored = metadata.get_last_synced("drain").await.unwrap().unwrap();
        assert_eq!(stored.timestamp(), at.timestamp());
    }
}
