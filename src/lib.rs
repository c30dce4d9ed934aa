use std::sync::Arc;

use sqlx::SqlitePool;

// Public modules
pub mod auth;
pub mod database;
pub mod domains;
pub mod errors;
pub mod types;

// Private modules
mod db_migration;

use domains::exercise::repository::SqliteExerciseRepository;
use domains::favorite::repository::SqliteFavoriteRepository;
use domains::profile::repository::SqliteProfileRepository;
use domains::sync::capture::{MutationCapture, MutationCaptureImpl};
use domains::sync::id_mapper::IdMapper;
use domains::sync::reconciler::{IdentityReconciler, Reconciler};
use domains::sync::remote::RemoteDataService;
use domains::sync::repository::{
    OperationQueueRepository, SqliteIdMappingRepository, SqliteOperationQueueRepository,
    SqliteSyncMetadataRepository,
};
use domains::sync::service::{SyncService, SyncServiceImpl};
use domains::sync::types::SyncConfig;
use domains::workout::repository::SqliteWorkoutRepository;
use domains::workout_set::repository::SqliteWorkoutSetRepository;
use errors::DomainResult;

/// Open the local database and bring the schema up to date.
/// Must be called before building services over the pool.
pub async fn initialize(db_path: &str) -> DomainResult<SqlitePool> {
    let pool = database::connect(db_path).await?;
    db_migration::initialize_database(&pool).await?;
    Ok(pool)
}

/// The wired service graph: one explicitly constructed object per process,
/// with injected store and remote-client dependencies.
pub struct CoreServices {
    pool: SqlitePool,
    pub sync: Arc<dyn SyncService>,
    pub capture: Arc<dyn MutationCapture>,
    pub reconciler: Arc<dyn Reconciler>,
    pub queue: Arc<dyn OperationQueueRepository>,
    pub mapper: Arc<IdMapper>,
}

impl CoreServices {
    /// Wire repositories and services over an initialized pool and a remote
    /// client implementation.
    pub fn build(
        pool: SqlitePool,
        remote: Arc<dyn RemoteDataService>,
        config: SyncConfig,
    ) -> Self {
        let workout_repo = Arc::new(SqliteWorkoutRepository::new(pool.clone()));
        let set_repo = Arc::new(SqliteWorkoutSetRepository::new(pool.clone()));
        let exercise_repo = Arc::new(SqliteExerciseRepository::new(pool.clone()));
        let profile_repo = Arc::new(SqliteProfileRepository::new(pool.clone()));
        let favorite_repo = Arc::new(SqliteFavoriteRepository::new(pool.clone()));

        let queue: Arc<dyn OperationQueueRepository> =
            Arc::new(SqliteOperationQueueRepository::new(pool.clone()));
        let mapper = Arc::new(IdMapper::new(Arc::new(SqliteIdMappingRepository::new(
            pool.clone(),
        ))));
        let metadata = Arc::new(SqliteSyncMetadataRepository::new(pool.clone()));

        let sync = Arc::new(SyncServiceImpl::new(
            queue.clone(),
            mapper.clone(),
            remote,
            metadata,
            workout_repo.clone(),
            set_repo.clone(),
            exercise_repo.clone(),
            profile_repo.clone(),
            favorite_repo.clone(),
            config,
        ));

        let capture = Arc::new(MutationCaptureImpl::new(
            workout_repo.clone(),
            set_repo.clone(),
            exercise_repo.clone(),
            profile_repo.clone(),
            favorite_repo.clone(),
            queue.clone(),
        ));

        let reconciler = Arc::new(IdentityReconciler::new(
            workout_repo,
            set_repo,
            exercise_repo,
            profile_repo,
            favorite_repo,
            queue.clone(),
        ));

        Self {
            pool,
            sync,
            capture,
            reconciler,
            queue,
            mapper,
        }
    }

    /// Full local wipe: every entity table, the queue, the mapping table
    /// (cache included) and sync metadata. Used on logout.
    pub async fn logout(&self) -> DomainResult<()> {
        self.mapper.clear().await?;
        database::clear_local_data(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthContext;
    use crate::domains::sync::remote::MockRemoteDataService;
    use crate::domains::workout::types::NewWorkout;
    use chrono::Utc;

    #[tokio::test]
    async fn test_build_and_logout_round_trip() {
        let pool = crate::database::new_test_pool().await;
        let remote = Arc::new(MockRemoteDataService::new());
        let services = CoreServices::build(pool, remote, SyncConfig::default());

        let auth = AuthContext::new(crate::types::new_local_id(), "device-1", true);
        services
            .capture
            .create_workout(
                NewWorkout {
                    name: "Session".to_string(),
                    notes: None,
                    started_at: Utc::now(),
                    duration_seconds: None,
                },
                &auth,
            )
            .await
            .unwrap();
        assert_eq!(services.queue.pending_count().await.unwrap(), 1);

        services.logout().await.unwrap();
        assert_eq!(services.queue.pending_count().await.unwrap(), 0);
        let status = services.sync.status().await.unwrap();
        assert_eq!(status.pending_operations, 0);
        assert!(status.last_synced_at.is_none());
    }
}
