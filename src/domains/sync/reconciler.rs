use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::domains::exercise::repository::ExerciseRepository;
use crate::domains::favorite::repository::FavoriteRepository;
use crate::domains::profile::repository::ProfileRepository;
use crate::domains::sync::repository::OperationQueueRepository;
use crate::domains::sync::types::{QueueOperation, QueuePayload};
use crate::domains::workout::repository::WorkoutRepository;
use crate::domains::workout_set::repository::WorkoutSetRepository;
use crate::errors::{DomainError, ServiceError, ServiceResult};
use crate::types::EntityTable;

/// Counts of records re-owned and re-queued by a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub workouts: u64,
    pub sets: u64,
    pub exercises: u64,
    pub favorites: u64,
}

impl ReconcileSummary {
    pub fn total(&self) -> u64 {
        self.workouts + self.sets + self.exercises + self.favorites
    }
}

/// Identity reconciliation: re-owns locally created data when an anonymous
/// (guest) identity is promoted to, or merged into, an authenticated one.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Rewrite ownership of every guest record to the new identity and
    /// re-enqueue each as a create, keyed by its existing identifier so any
    /// in-flight create coalesces at the next consolidation. Performs no
    /// network calls; the next drain uploads through the normal create path.
    async fn merge_guest_into(
        &self,
        guest_user_id: &str,
        new_user_id: &str,
    ) -> ServiceResult<ReconcileSummary>;

    /// The discard alternative: cascade-delete every guest-owned record and
    /// its queue items, then clear the guest identity state.
    async fn discard_guest_data(&self, guest_user_id: &str) -> ServiceResult<()>;
}

/// Implementation of the Reconciler over the local store and queue.
pub struct IdentityReconciler {
    workout_repo: Arc<dyn WorkoutRepository>,
    set_repo: Arc<dyn WorkoutSetRepository>,
    exercise_repo: Arc<dyn ExerciseRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
    favorite_repo: Arc<dyn FavoriteRepository>,
    queue: Arc<dyn OperationQueueRepository>,
    in_progress: AtomicBool,
}

impl IdentityReconciler {
    pub fn new(
        workout_repo: Arc<dyn WorkoutRepository>,
        set_repo: Arc<dyn WorkoutSetRepository>,
        exercise_repo: Arc<dyn ExerciseRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
        favorite_repo: Arc<dyn FavoriteRepository>,
        queue: Arc<dyn OperationQueueRepository>,
    ) -> Self {
        Self {
            workout_repo,
            set_repo,
            exercise_repo,
            profile_repo,
            favorite_repo,
            queue,
            in_progress: AtomicBool::new(false),
        }
    }

    fn acquire(&self) -> ServiceResult<()> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ServiceError::Domain(DomainError::Internal(
                "Reconciliation already in progress".to_string(),
            )));
        }
        Ok(())
    }

    async fn merge_inner(
        &self,
        guest_user_id: &str,
        new_user_id: &str,
    ) -> ServiceResult<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        // 1. Workouts first: their creates drain ahead of everything else,
        // so dependent sets can be rewritten.
        let workouts = self
            .workout_repo
            .find_by_user(guest_user_id)
            .await
            .map_err(ServiceError::Domain)?;
        for workout in &workouts {
            self.workout_repo
                .update_owner(&workout.id, new_user_id)
                .await
                .map_err(ServiceError::Domain)?;
            self.workout_repo
                .mark_unsynced(&workout.id)
                .await
                .map_err(ServiceError::Domain)?;

            let mut payload = workout.to_payload();
            payload.user_id = Some(new_user_id.to_string());
            self.queue
                .enqueue(
                    EntityTable::Workouts,
                    QueueOperation::Create,
                    &workout.id,
                    QueuePayload::Workout(payload),
                )
                .await
                .map_err(ServiceError::Domain)?;
            summary.workouts += 1;

            // 2. The workout's sets carry no owner column; re-queue them
            // under their (possibly still local) workout reference.
            for set in self
                .set_repo
                .find_by_workout(&workout.id)
                .await
                .map_err(ServiceError::Domain)?
            {
                self.set_repo
                    .mark_unsynced(&set.id)
                    .await
                    .map_err(ServiceError::Domain)?;
                self.queue
                    .enqueue(
                        EntityTable::WorkoutSets,
                        QueueOperation::Create,
                        &set.id,
                        QueuePayload::WorkoutSet(set.to_payload()),
                    )
                    .await
                    .map_err(ServiceError::Domain)?;
                summary.sets += 1;
            }
        }

        // 3. Custom exercises and favorites get the same treatment.
        for exercise in self
            .exercise_repo
            .find_custom_by_user(guest_user_id)
            .await
            .map_err(ServiceError::Domain)?
        {
            self.exercise_repo
                .update_owner(&exercise.id, new_user_id)
                .await
                .map_err(ServiceError::Domain)?;
            self.exercise_repo
                .mark_unsynced(&exercise.id)
                .await
                .map_err(ServiceError::Domain)?;

            let mut payload = exercise.to_payload();
            payload.user_id = Some(new_user_id.to_string());
            self.queue
                .enqueue(
                    EntityTable::Exercises,
                    QueueOperation::Create,
                    &exercise.id,
                    QueuePayload::Exercise(payload),
                )
                .await
                .map_err(ServiceError::Domain)?;
            summary.exercises += 1;
        }

        for favorite in self
            .favorite_repo
            .find_by_user(guest_user_id)
            .await
            .map_err(ServiceError::Domain)?
        {
            self.favorite_repo
                .update_owner(&favorite.id, new_user_id)
                .await
                .map_err(ServiceError::Domain)?;
            self.favorite_repo
                .mark_unsynced(&favorite.id)
                .await
                .map_err(ServiceError::Domain)?;

            let mut payload = favorite.to_payload();
            payload.user_id = Some(new_user_id.to_string());
            self.queue
                .enqueue(
                    EntityTable::Favorites,
                    QueueOperation::Create,
                    &favorite.id,
                    QueuePayload::Favorite(payload),
                )
                .await
                .map_err(ServiceError::Domain)?;
            summary.favorites += 1;
        }

        // 4. The guest identity's persisted state: its profile row and any
        // queued operations for it.
        if let Some(profile) = self
            .profile_repo
            .find_by_user(guest_user_id)
            .await
            .map_err(ServiceError::Domain)?
        {
            self.queue
                .remove_for_entity(EntityTable::Profiles, &profile.id)
                .await
                .map_err(ServiceError::Domain)?;
            self.profile_repo
                .delete(&profile.id)
                .await
                .map_err(ServiceError::Domain)?;
        }

        info!(
            "Merged guest {} into {}: {} workouts, {} sets, {} exercises, {} favorites re-queued",
            guest_user_id,
            new_user_id,
            summary.workouts,
            summary.sets,
            summary.exercises,
            summary.favorites
        );
        Ok(summary)
    }

    async fn discard_inner(&self, guest_user_id: &str) -> ServiceResult<()> {
        let workouts = self
            .workout_repo
            .find_by_user(guest_user_id)
            .await
            .map_err(ServiceError::Domain)?;
        for workout in &workouts {
            for set in self
                .set_repo
                .find_by_workout(&workout.id)
                .await
                .map_err(ServiceError::Domain)?
            {
                self.queue
                    .remove_for_entity(EntityTable::WorkoutSets, &set.id)
                    .await
                    .map_err(ServiceError::Domain)?;
            }
            self.set_repo
                .delete_by_workout(&workout.id)
                .await
                .map_err(ServiceError::Domain)?;
            self.queue
                .remove_for_entity(EntityTable::Workouts, &workout.id)
                .await
                .map_err(ServiceError::Domain)?;
            self.workout_repo
                .delete(&workout.id)
                .await
                .map_err(ServiceError::Domain)?;
        }

        for exercise in self
            .exercise_repo
            .find_custom_by_user(guest_user_id)
            .await
            .map_err(ServiceError::Domain)?
        {
            self.queue
                .remove_for_entity(EntityTable::Exercises, &exercise.id)
                .await
                .map_err(ServiceError::Domain)?;
            self.exercise_repo
                .delete(&exercise.id)
                .await
                .map_err(ServiceError::Domain)?;
        }

        for favorite in self
            .favorite_repo
            .find_by_user(guest_user_id)
            .await
            .map_err(ServiceError::Domain)?
        {
            self.queue
                .remove_for_entity(EntityTable::Favorites, &favorite.id)
                .await
                .map_err(ServiceError::Domain)?;
            self.favorite_repo
                .delete(&favorite.id)
                .await
                .map_err(ServiceError::Domain)?;
        }

        if let Some(profile) = self
            .profile_repo
            .find_by_user(guest_user_id)
            .await
            .map_err(ServiceError::Domain)?
        {
            self.queue
                .remove_for_entity(EntityTable::Profiles, &profile.id)
                .await
                .map_err(ServiceError::Domain)?;
            self.profile_repo
                .delete(&profile.id)
                .await
                .map_err(ServiceError::Domain)?;
        }

        warn!("Discarded all local data for guest {}", guest_user_id);
        Ok(())
    }
}

#[async_trait]
impl Reconciler for IdentityReconciler {
    async fn merge_guest_into(
        &self,
        guest_user_id: &str,
        new_user_id: &str,
    ) -> ServiceResult<ReconcileSummary> {
        self.acquire()?;
        let result = self.merge_inner(guest_user_id, new_user_id).await;
        self.in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn discard_guest_data(&self, guest_user_id: &str) -> ServiceResult<()> {
        self.acquire()?;
        let result = self.discard_inner(guest_user_id).await;
        self.in_progress.store(false, Ordering::SeqCst);
        result
    }
}
