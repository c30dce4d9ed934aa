use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};

use crate::domains::exercise::repository::ExerciseRepository;
use crate::domains::exercise::types::Exercise;
use crate::domains::favorite::repository::FavoriteRepository;
use crate::domains::favorite::types::Favorite;
use crate::domains::profile::repository::ProfileRepository;
use crate::domains::profile::types::Profile;
use crate::domains::sync::id_mapper::IdMapper;
use crate::domains::sync::remote::RemoteDataService;
use crate::domains::sync::repository::{OperationQueueRepository, SyncMetadataRepository};
use crate::domains::sync::types::{
    QueueItem, QueueOperation, SyncConfig, SyncReport, SyncStatusSnapshot,
};
use crate::domains::workout::repository::WorkoutRepository;
use crate::domains::workout::types::Workout;
use crate::domains::workout_set::repository::WorkoutSetRepository;
use crate::domains::workout_set::types::WorkoutSet;
use crate::errors::{DomainError, ServiceError, ServiceResult, SyncError};
use crate::types::{is_local_id, EntityTable};

/// Metadata scope under which the engine stamps a completed drain.
pub const DRAIN_SCOPE: &str = "drain";

/// High-level trait for the synchronisation engine.
#[async_trait]
pub trait SyncService: Send + Sync {
    /// Run one drain over the queue. A second call while one is active
    /// returns immediately without touching the queue.
    async fn sync(&self) -> SyncReport;

    /// Call `sync()` under the configured backoff schedule until it reports
    /// full success or the attempt budget is exhausted.
    async fn sync_with_backoff(&self) -> SyncReport;

    /// Observable engine state for callers.
    async fn status(&self) -> ServiceResult<SyncStatusSnapshot>;

    /// Pull a user's records from the backend into the local store.
    /// Returns the number of records written.
    async fn hydrate_from_remote(&self, user_id: &str) -> ServiceResult<u64>;
}

/// Implementation of the synchronisation engine.
///
/// Strictly sequential: one drain at a time (the `is_syncing` guard), one
/// item in flight at a time. The queue's priority ordering is what gives
/// referential ordering between parents and dependents.
pub struct SyncServiceImpl {
    queue: Arc<dyn OperationQueueRepository>,
    mapper: Arc<IdMapper>,
    remote: Arc<dyn RemoteDataService>,
    metadata: Arc<dyn SyncMetadataRepository>,

    workout_repo: Arc<dyn WorkoutRepository>,
    set_repo: Arc<dyn WorkoutSetRepository>,
    exercise_repo: Arc<dyn ExerciseRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
    favorite_repo: Arc<dyn FavoriteRepository>,

    config: SyncConfig,
    is_syncing: AtomicBool,
}

impl SyncServiceImpl {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn OperationQueueRepository>,
        mapper: Arc<IdMapper>,
        remote: Arc<dyn RemoteDataService>,
        metadata: Arc<dyn SyncMetadataRepository>,
        workout_repo: Arc<dyn WorkoutRepository>,
        set_repo: Arc<dyn WorkoutSetRepository>,
        exercise_repo: Arc<dyn ExerciseRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
        favorite_repo: Arc<dyn FavoriteRepository>,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            mapper,
            remote,
            metadata,
            workout_repo,
            set_repo,
            exercise_repo,
            profile_repo,
            favorite_repo,
            config,
            is_syncing: AtomicBool::new(false),
        }
    }

    /// One full pass over the queue snapshot. All failures are folded into
    /// the report so one bad item cannot abort the rest.
    async fn drain(&self) -> SyncReport {
        let mut report = SyncReport::empty();

        // 1. The mapping cache must be warm before any payload rewriting.
        if let Err(e) = self.mapper.hydrate().await {
            report.errors.push(e.to_string());
            report.success = false;
            return report;
        }

        // 2. Collapse redundant operations before touching the network.
        if let Err(e) = self.queue.consolidate().await {
            report.errors.push(e.to_string());
            report.success = false;
            return report;
        }

        // 3. Process items one at a time, each attempted once per drain.
        let mut attempted: Vec<i64> = Vec::new();
        loop {
            let item = match self.queue.next_pending(&attempted).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    report.errors.push(e.to_string());
                    break;
                }
            };
            attempted.push(item.seq);

            match self.execute_item(&item).await {
                Ok(()) => {
                    if let Err(e) = self.queue.remove(item.seq).await {
                        report.errors.push(e.to_string());
                    }
                    report.synced += 1;
                }
                Err(err) => {
                    report.failed += 1;
                    let message = err.to_string();
                    warn!(
                        "Queue item {} ({} {} {}) failed: {}",
                        item.seq,
                        item.operation.as_str(),
                        item.entity_table.as_str(),
                        item.entity_id,
                        message
                    );

                    match self.queue.record_failure(item.seq, &message).await {
                        Ok(retries) if retries >= self.config.max_item_retries => {
                            if let Err(e) = self.queue.remove(item.seq).await {
                                report.errors.push(e.to_string());
                            }
                            error!(
                                "Dropping queue item {} after {} attempts",
                                item.seq, retries
                            );
                            report.errors.push(format!(
                                "{} {} {}: dropped after {} attempts: {}",
                                item.operation.as_str(),
                                item.entity_table.as_str(),
                                item.entity_id,
                                retries,
                                message
                            ));
                        }
                        Ok(_) => report.errors.push(message),
                        Err(e) => report.errors.push(e.to_string()),
                    }
                }
            }
        }

        // 4. Stamp the drain, successful or not; callers read this as the
        // last time the engine ran to completion.
        if let Err(e) = self.metadata.set_last_synced(DRAIN_SCOPE, Utc::now()).await {
            report.errors.push(e.to_string());
        }

        report.success = report.failed == 0 && report.errors.is_empty();
        report
    }

    /// Execute one queue item against the remote API and update the local
    /// store accordingly.
    async fn execute_item(&self, item: &QueueItem) -> ServiceResult<()> {
        let mut payload = item.payload.clone();

        // Rewrite foreign references through the mapping layer. Anything
        // still local afterwards is an unsynced dependency; do not attempt
        // the remote call.
        let unresolved = self
            .mapper
            .replace_payload_identifiers(&mut payload)
            .await
            .map_err(ServiceError::Domain)?;
        if unresolved > 0 {
            let reference = payload
                .local_references()
                .into_iter()
                .next()
                .unwrap_or_default();
            return Err(ServiceError::Domain(DomainError::Sync(
                SyncError::DependencyNotReady {
                    entity_table: item.entity_table.as_str().to_string(),
                    reference,
                },
            )));
        }

        match item.operation {
            QueueOperation::Create => {
                let body = payload.to_remote_json().map_err(ServiceError::Domain)?;
                let record = self.remote.create_record(item.entity_table, &body).await?;

                if is_local_id(&item.entity_id) {
                    self.mapper
                        .save_mapping(&item.entity_id, &record.id, item.entity_table)
                        .await
                        .map_err(ServiceError::Domain)?;

                    self.adopt_identity(item.entity_table, &item.entity_id, &record.id)
                        .await?;

                    if item.entity_table.has_child_references() {
                        self.rewrite_child_references(
                            item.entity_table,
                            &item.entity_id,
                            &record.id,
                        )
                        .await?;
                    }
                } else {
                    // Already keyed by a server id (re-enqueued after a
                    // reconciliation); just flag it clean.
                    self.mark_synced_local(item.entity_table, &item.entity_id)
                        .await?;
                }

                debug!(
                    "Created {} {} remotely as {}",
                    item.entity_table.as_str(),
                    item.entity_id,
                    record.id
                );
            }
            QueueOperation::Update => {
                let target = self
                    .mapper
                    .get_server_id(&item.entity_id)
                    .await
                    .map_err(ServiceError::Domain)?
                    .unwrap_or_else(|| item.entity_id.clone());

                let body = payload.to_remote_json().map_err(ServiceError::Domain)?;
                self.remote
                    .update_record(item.entity_table, &target, &body)
                    .await?;

                // The local record sits under the server id once mapped.
                self.mark_synced_local(item.entity_table, &target).await?;
            }
            QueueOperation::Delete => {
                let target = self
                    .mapper
                    .get_server_id(&item.entity_id)
                    .await
                    .map_err(ServiceError::Domain)?
                    .unwrap_or_else(|| item.entity_id.clone());

                self.remote.delete_record(item.entity_table, &target).await?;

                self.delete_local(item.entity_table, &target).await?;
            }
        }

        Ok(())
    }

    /// Re-key the stored record under its server identifier and mark it
    /// synced. A missing record is logged, not fatal: the remote create
    /// succeeded and the mapping is already recorded.
    async fn adopt_identity(
        &self,
        table: EntityTable,
        local_id: &str,
        server_id: &str,
    ) -> ServiceResult<()> {
        let result = match table {
            EntityTable::Workouts => {
                self.workout_repo
                    .adopt_server_identity(local_id, server_id)
                    .await
            }
            EntityTable::WorkoutSets => {
                self.set_repo
                    .adopt_server_identity(local_id, server_id)
                    .await
            }
            EntityTable::Exercises => {
                self.exercise_repo
                    .adopt_server_identity(local_id, server_id)
                    .await
            }
            EntityTable::Profiles => {
                self.profile_repo
                    .adopt_server_identity(local_id, server_id)
                    .await
            }
            EntityTable::Favorites => {
                self.favorite_repo
                    .adopt_server_identity(local_id, server_id)
                    .await
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(DomainError::EntityNotFound(_, _)) => {
                warn!(
                    "Local {} {} vanished before adopting server id {}",
                    table.as_str(),
                    local_id,
                    server_id
                );
                Ok(())
            }
            Err(e) => Err(ServiceError::Domain(e)),
        }
    }

    /// Rewrite stored child rows that still reference the old local id.
    /// Queued payloads are rewritten as well so later drains need no mapping
    /// lookup for them.
    async fn rewrite_child_references(
        &self,
        table: EntityTable,
        local_id: &str,
        server_id: &str,
    ) -> ServiceResult<()> {
        match table {
            EntityTable::Workouts => {
                self.set_repo
                    .rewrite_workout_ref(local_id, server_id)
                    .await
                    .map_err(ServiceError::Domain)?;
            }
            EntityTable::Exercises => {
                self.set_repo
                    .rewrite_exercise_ref(local_id, server_id)
                    .await
                    .map_err(ServiceError::Domain)?;
                self.favorite_repo
                    .rewrite_exercise_ref(local_id, server_id)
                    .await
                    .map_err(ServiceError::Domain)?;
            }
            _ => {}
        }

        self.queue
            .rewrite_identifier(local_id, server_id)
            .await
            .map_err(ServiceError::Domain)?;

        Ok(())
    }

    async fn mark_synced_local(&self, table: EntityTable, id: &str) -> ServiceResult<()> {
        let result = match table {
            EntityTable::Workouts => self.workout_repo.mark_synced(id).await,
            EntityTable::WorkoutSets => self.set_repo.mark_synced(id).await,
            EntityTable::Exercises => self.exercise_repo.mark_synced(id).await,
            EntityTable::Profiles => self.profile_repo.mark_synced(id).await,
            EntityTable::Favorites => self.favorite_repo.mark_synced(id).await,
        };

        result.map_err(ServiceError::Domain)
    }

    /// Remove the local record after a confirmed remote delete. A record
    /// that is already gone is fine.
    async fn delete_local(&self, table: EntityTable, id: &str) -> ServiceResult<()> {
        let result = match table {
            EntityTable::Workouts => self.workout_repo.delete(id).await,
            EntityTable::WorkoutSets => self.set_repo.delete(id).await,
            EntityTable::Exercises => self.exercise_repo.delete(id).await,
            EntityTable::Profiles => self.profile_repo.delete(id).await,
            EntityTable::Favorites => self.favorite_repo.delete(id).await,
        };

        match result {
            Ok(()) => Ok(()),
            Err(DomainError::EntityNotFound(_, _)) => Ok(()),
            Err(e) => Err(ServiceError::Domain(e)),
        }
    }
}

#[async_trait]
impl SyncService for SyncServiceImpl {
    async fn sync(&self) -> SyncReport {
        // Single-flight guard: competing triggers are dropped, not queued.
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync requested while another drain is active; dropping");
            return SyncReport::already_running();
        }

        info!("Starting sync drain");
        let report = self.drain().await;
        info!(
            "Drain finished: synced {}, failed {}",
            report.synced, report.failed
        );

        self.is_syncing.store(false, Ordering::SeqCst);
        report
    }

    async fn sync_with_backoff(&self) -> SyncReport {
        let mut report = self.sync().await;
        let mut attempt = 0u32;

        while !report.success && attempt + 1 < self.config.backoff.max_attempts {
            let delay = self.config.backoff.delay_for(attempt);
            debug!(
                "Sync attempt {} failed; retrying in {:?}",
                attempt + 1,
                delay
            );
            tokio::time::sleep(delay).await;

            attempt += 1;
            report = self.sync().await;
        }

        report
    }

    async fn status(&self) -> ServiceResult<SyncStatusSnapshot> {
        let pending = self
            .queue
            .pending_count()
            .await
            .map_err(ServiceError::Domain)?;
        let last_synced_at = self
            .metadata
            .get_last_synced(DRAIN_SCOPE)
            .await
            .map_err(ServiceError::Domain)?;

        Ok(SyncStatusSnapshot {
            pending_operations: pending,
            is_syncing: self.is_syncing.load(Ordering::SeqCst),
            last_synced_at,
        })
    }

    async fn hydrate_from_remote(&self, user_id: &str) -> ServiceResult<u64> {
        let mut written = 0u64;

        for table in EntityTable::ALL {
            let records = self.remote.list_records(table, user_id).await?;
            if records.is_empty() {
                continue;
            }

            let count = match table {
                EntityTable::Workouts => {
                    let entities = convert_records(&records, Workout::from_remote, table);
                    self.workout_repo
                        .upsert_many(&entities)
                        .await
                        .map_err(ServiceError::Domain)?
                }
                EntityTable::WorkoutSets => {
                    let entities = convert_records(&records, WorkoutSet::from_remote, table);
                    self.set_repo
                        .upsert_many(&entities)
                        .await
                        .map_err(ServiceError::Domain)?
                }
                EntityTable::Exercises => {
                    let entities = convert_records(&records, Exercise::from_remote, table);
                    self.exercise_repo
                        .upsert_many(&entities)
                        .await
                        .map_err(ServiceError::Domain)?
                }
                EntityTable::Profiles => {
                    let entities = convert_records(&records, Profile::from_remote, table);
                    self.profile_repo
                        .upsert_many(&entities)
                        .await
                        .map_err(ServiceError::Domain)?
                }
                EntityTable::Favorites => {
                    let entities = convert_records(&records, Favorite::from_remote, table);
                    self.favorite_repo
                        .upsert_many(&entities)
                        .await
                        .map_err(ServiceError::Domain)?
                }
            };
            written += count;

            self.metadata
                .set_last_synced(&format!("hydrate:{}", table.as_str()), Utc::now())
                .await
                .map_err(ServiceError::Domain)?;
        }

        info!("Hydrated {} records for user {}", written, user_id);
        Ok(written)
    }
}

/// Convert remote records, skipping (and logging) malformed ones rather than
/// failing the whole hydration.
fn convert_records<T>(
    records: &[crate::domains::sync::remote::RemoteRecord],
    convert: impl Fn(&crate::domains::sync::remote::RemoteRecord) -> Result<T, DomainError>,
    table: EntityTable,
) -> Vec<T> {
    records
        .iter()
        .filter_map(|record| match convert(record) {
            Ok(entity) => Some(entity),
            Err(e) => {
                warn!(
                    "Skipping malformed {} record {}: {}",
                    table.as_str(),
                    record.id,
                    e
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::database::new_test_pool;
    use crate::domains::core::repository::FindById;
    use crate::domains::exercise::repository::SqliteExerciseRepository;
    use crate::domains::exercise::types::NewExercise;
    use crate::domains::favorite::repository::SqliteFavoriteRepository;
    use crate::domains::profile::repository::SqliteProfileRepository;
    use crate::domains::sync::remote::MockRemoteDataService;
    use crate::domains::sync::repository::{
        SqliteIdMappingRepository, SqliteOperationQueueRepository, SqliteSyncMetadataRepository,
    };
    use crate::domains::sync::types::{BackoffPolicy, QueuePayload};
    use crate::domains::workout::repository::SqliteWorkoutRepository;
    use crate::domains::workout::types::NewWorkout;
    use crate::domains::workout_set::repository::SqliteWorkoutSetRepository;
    use crate::domains::workout_set::types::NewWorkoutSet;

    struct TestContext {
        service: SyncServiceImpl,
        remote: Arc<MockRemoteDataService>,
        queue: Arc<SqliteOperationQueueRepository>,
        workouts: Arc<SqliteWorkoutRepository>,
        sets: Arc<SqliteWorkoutSetRepository>,
        exercises: Arc<SqliteExerciseRepository>,
        favorites: Arc<SqliteFavoriteRepository>,
    }

    async fn new_context(config: SyncConfig) -> TestContext {
        let pool = new_test_pool().await;
        let queue = Arc::new(SqliteOperationQueueRepository::new(pool.clone()));
        let mapper = Arc::new(IdMapper::new(Arc::new(SqliteIdMappingRepository::new(
            pool.clone(),
        ))));
        let remote = Arc::new(MockRemoteDataService::new());
        let metadata = Arc::new(SqliteSyncMetadataRepository::new(pool.clone()));
        let workouts = Arc::new(SqliteWorkoutRepository::new(pool.clone()));
        let sets = Arc::new(SqliteWorkoutSetRepository::new(pool.clone()));
        let exercises = Arc::new(SqliteExerciseRepository::new(pool.clone()));
        let profiles = Arc::new(SqliteProfileRepository::new(pool.clone()));
        let favorites = Arc::new(SqliteFavoriteRepository::new(pool));

        let service = SyncServiceImpl::new(
            queue.clone(),
            mapper,
            remote.clone(),
            metadata,
            workouts.clone(),
            sets.clone(),
            exercises.clone(),
            profiles,
            favorites.clone(),
            config,
        );

        TestContext {
            service,
            remote,
            queue,
            workouts,
            sets,
            exercises,
            favorites,
        }
    }

    fn sample_workout(user_id: &str) -> Workout {
        Workout::new_local(
            NewWorkout {
                name: "Push day".to_string(),
                notes: None,
                started_at: Utc::now(),
                duration_seconds: Some(3000),
            },
            user_id,
        )
    }

    #[tokio::test]
    async fn test_empty_drain_is_idempotent() {
        let ctx = new_context(SyncConfig::default()).await;

        let report = ctx.service.sync().await;
        assert!(report.success);
        assert_eq!(report.synced, 0);
        assert_eq!(report.failed, 0);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_end_to_end_workout_and_set() {
        let ctx = new_context(SyncConfig::default()).await;

        let workout = sample_workout("usr-1");
        ctx.workouts.insert(&workout).await.unwrap();
        ctx.queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Create,
                &workout.id,
                QueuePayload::Workout(workout.to_payload()),
            )
            .await
            .unwrap();

        let set = WorkoutSet::new_local(NewWorkoutSet {
            workout_id: workout.id.clone(),
            exercise_id: "preset-back-squat".to_string(),
            set_number: 1,
            reps: 5,
            weight_kg: Some(100.0),
            completed: true,
        });
        ctx.sets.insert(&set).await.unwrap();
        ctx.queue
            .enqueue(
                EntityTable::WorkoutSets,
                QueueOperation::Create,
                &set.id,
                QueuePayload::WorkoutSet(set.to_payload()),
            )
            .await
            .unwrap();

        let report = ctx.service.sync().await;
        assert!(report.success, "errors: {:?}", report.errors);
        assert_eq!(report.synced, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(ctx.queue.pending_count().await.unwrap(), 0);

        // The workout create drained first; the set payload went out with
        // the server identifier.
        let order = ctx.remote.created_order();
        assert_eq!(order[0].0, EntityTable::Workouts);
        assert_eq!(order[1].0, EntityTable::WorkoutSets);
        let workout_srv = order[0].1.clone();
        let set_srv = order[1].1.clone();

        let remote_set = ctx.remote.record(EntityTable::WorkoutSets, &set_srv).unwrap();
        assert_eq!(
            remote_set.get("workout_id").and_then(|v| v.as_str()),
            Some(workout_srv.as_str())
        );

        // Both local records now live under server identifiers, synced.
        let local_workout = ctx.workouts.find_by_id(&workout_srv).await.unwrap();
        assert!(local_workout.synced);
        let local_set = ctx.sets.find_by_id(&set_srv).await.unwrap();
        assert!(local_set.synced);
        assert_eq!(local_set.workout_id, workout_srv);
    }

    #[tokio::test]
    async fn test_dependency_not_ready_then_recovers() {
        let ctx = new_context(SyncConfig::default()).await;

        let exercise = Exercise::new_local(
            NewExercise {
                name: "Cable Row".to_string(),
                muscle_group: Some("back".to_string()),
            },
            "usr-1",
        );
        ctx.exercises.insert(&exercise).await.unwrap();
        let favorite = Favorite::new_local("usr-1", &exercise.id);
        ctx.favorites.insert(&favorite).await.unwrap();

        // The favorite is enqueued before the exercise it references.
        ctx.queue
            .enqueue(
                EntityTable::Favorites,
                QueueOperation::Create,
                &favorite.id,
                QueuePayload::Favorite(favorite.to_payload()),
            )
            .await
            .unwrap();
        ctx.queue
            .enqueue(
                EntityTable::Exercises,
                QueueOperation::Create,
                &exercise.id,
                QueuePayload::Exercise(exercise.to_payload()),
            )
            .await
            .unwrap();

        let report = ctx.service.sync().await;
        assert!(!report.success);
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("Waiting on dependency")));
        // No remote attempt was made for the blocked favorite.
        assert_eq!(ctx.remote.created_order().len(), 1);

        let report = ctx.service.sync().await;
        assert!(report.success, "errors: {:?}", report.errors);
        assert_eq!(report.synced, 1);
        assert_eq!(ctx.queue.pending_count().await.unwrap(), 0);

        let order = ctx.remote.created_order();
        assert_eq!(order[0].0, EntityTable::Exercises);
        let exercise_srv = order[0].1.clone();
        let favorite_srv = order[1].1.clone();
        let remote_favorite = ctx.remote.record(EntityTable::Favorites, &favorite_srv).unwrap();
        assert_eq!(
            remote_favorite.get("exercise_id").and_then(|v| v.as_str()),
            Some(exercise_srv.as_str())
        );
    }

    #[tokio::test]
    async fn test_retry_budget_exhausts_then_drops() {
        let config = SyncConfig {
            max_item_retries: 3,
            ..Default::default()
        };
        let ctx = new_context(config).await;
        ctx.remote.set_always_fail(true);

        let workout = sample_workout("usr-1");
        ctx.workouts.insert(&workout).await.unwrap();
        ctx.queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Create,
                &workout.id,
                QueuePayload::Workout(workout.to_payload()),
            )
            .await
            .unwrap();

        let mut last_report = SyncReport::empty();
        for _ in 0..3 {
            last_report = ctx.service.sync().await;
            assert!(!last_report.success);
        }

        // Attempted exactly the configured number of times, then dropped.
        assert_eq!(ctx.remote.attempts(), 3);
        assert_eq!(ctx.queue.pending_count().await.unwrap(), 0);
        assert!(last_report
            .errors
            .iter()
            .any(|e| e.contains("dropped after 3 attempts")));

        // Nothing left to retry.
        ctx.remote.set_always_fail(false);
        let report = ctx.service.sync().await;
        assert!(report.success);
        assert_eq!(ctx.remote.attempts(), 3);
    }

    #[tokio::test]
    async fn test_sync_rejected_while_in_progress() {
        let ctx = new_context(SyncConfig::default()).await;

        let workout = sample_workout("usr-1");
        ctx.workouts.insert(&workout).await.unwrap();
        let seq = ctx
            .queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Create,
                &workout.id,
                QueuePayload::Workout(workout.to_payload()),
            )
            .await
            .unwrap();

        ctx.service.is_syncing.store(true, Ordering::SeqCst);
        let report = ctx.service.sync().await;
        assert!(!report.success);
        assert_eq!(report.errors, vec!["Sync already in progress".to_string()]);
        ctx.service.is_syncing.store(false, Ordering::SeqCst);

        // Queue untouched: same single item, no retries recorded.
        assert_eq!(ctx.queue.pending_count().await.unwrap(), 1);
        let items = ctx
            .queue
            .items_for_entity(EntityTable::Workouts, &workout.id)
            .await
            .unwrap();
        assert_eq!(items[0].seq, seq);
        assert_eq!(items[0].retry_count, 0);
        assert_eq!(ctx.remote.attempts(), 0);
    }

    #[tokio::test]
    async fn test_sync_with_backoff_recovers_after_transient_failure() {
        let config = SyncConfig {
            max_item_retries: 5,
            backoff: BackoffPolicy {
                base_delay_ms: 1,
                multiplier: 1.0,
                max_delay_ms: 2,
                max_attempts: 3,
                jitter_ms: 0,
            },
        };
        let ctx = new_context(config).await;
        ctx.remote.set_fail_times(1);

        let workout = sample_workout("usr-1");
        ctx.workouts.insert(&workout).await.unwrap();
        ctx.queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Create,
                &workout.id,
                QueuePayload::Workout(workout.to_payload()),
            )
            .await
            .unwrap();

        let report = ctx.service.sync_with_backoff().await;
        assert!(report.success, "errors: {:?}", report.errors);
        assert_eq!(report.synced, 1);
        assert_eq!(ctx.remote.attempts(), 2);
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let ctx = new_context(SyncConfig::default()).await;

        let status = ctx.service.status().await.unwrap();
        assert_eq!(status.pending_operations, 0);
        assert!(!status.is_syncing);
        assert!(status.last_synced_at.is_none());

        let workout = sample_workout("usr-1");
        ctx.workouts.insert(&workout).await.unwrap();
        ctx.queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Create,
                &workout.id,
                QueuePayload::Workout(workout.to_payload()),
            )
            .await
            .unwrap();

        let status = ctx.service.status().await.unwrap();
        assert_eq!(status.pending_operations, 1);

        ctx.service.sync().await;
        let status = ctx.service.status().await.unwrap();
        assert_eq!(status.pending_operations, 0);
        assert!(status.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_hydrate_from_remote() {
        let ctx = new_context(SyncConfig::default()).await;

        ctx.remote
            .create_record(
                EntityTable::Workouts,
                &json!({
                    "user_id": "usr-1",
                    "name": "Imported workout",
                    "started_at": Utc::now().to_rfc3339(),
                }),
            )
            .await
            .unwrap();
        ctx.remote
            .create_record(
                EntityTable::Exercises,
                &json!({ "user_id": "usr-1", "name": "Cable Fly" }),
            )
            .await
            .unwrap();

        let written = ctx.service.hydrate_from_remote("usr-1").await.unwrap();
        assert_eq!(written, 2);

        let workouts = ctx.workouts.find_by_user("usr-1").await.unwrap();
        assert_eq!(workouts.len(), 1);
        assert!(workouts[0].synced);
        assert_eq!(workouts[0].name, "Imported workout");

        let customs = ctx.exercises.find_custom_by_user("usr-1").await.unwrap();
        assert_eq!(customs.len(), 1);
    }
}
