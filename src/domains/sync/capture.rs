use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::auth::AuthContext;
use crate::domains::core::repository::FindById;
use crate::domains::exercise::repository::ExerciseRepository;
use crate::domains::exercise::types::{Exercise, NewExercise};
use crate::domains::favorite::repository::FavoriteRepository;
use crate::domains::favorite::types::Favorite;
use crate::domains::profile::repository::ProfileRepository;
use crate::domains::profile::types::Profile;
use crate::domains::sync::repository::OperationQueueRepository;
use crate::domains::sync::types::{
    ExercisePayload, ProfilePayload, QueueOperation, QueuePayload, WorkoutPayload,
    WorkoutSetPayload,
};
use crate::domains::workout::repository::WorkoutRepository;
use crate::domains::workout::types::{NewWorkout, Workout};
use crate::domains::workout_set::repository::WorkoutSetRepository;
use crate::domains::workout_set::types::{NewWorkoutSet, WorkoutSet};
use crate::errors::{DomainError, ServiceError, ServiceResult, ValidationError};
use crate::types::EntityTable;

/// The optimistic mutation contract: every UI-facing write lands durably in
/// the local store first, then the matching operation is enqueued for the
/// next drain. Callers never wait on the network.
#[async_trait]
pub trait MutationCapture: Send + Sync {
    async fn create_workout(&self, new: NewWorkout, auth: &AuthContext) -> ServiceResult<Workout>;

    async fn update_workout(
        &self,
        id: &str,
        patch: WorkoutPayload,
        auth: &AuthContext,
    ) -> ServiceResult<Workout>;

    /// Deletes the workout and its sets, queueing deletes for each.
    async fn delete_workout(&self, id: &str, auth: &AuthContext) -> ServiceResult<()>;

    async fn add_set(&self, new: NewWorkoutSet, auth: &AuthContext) -> ServiceResult<WorkoutSet>;

    async fn update_set(
        &self,
        id: &str,
        patch: WorkoutSetPayload,
        auth: &AuthContext,
    ) -> ServiceResult<WorkoutSet>;

    async fn delete_set(&self, id: &str, auth: &AuthContext) -> ServiceResult<()>;

    async fn create_exercise(
        &self,
        new: NewExercise,
        auth: &AuthContext,
    ) -> ServiceResult<Exercise>;

    async fn update_exercise(
        &self,
        id: &str,
        patch: ExercisePayload,
        auth: &AuthContext,
    ) -> ServiceResult<Exercise>;

    async fn delete_exercise(&self, id: &str, auth: &AuthContext) -> ServiceResult<()>;

    async fn add_favorite(&self, exercise_id: &str, auth: &AuthContext) -> ServiceResult<Favorite>;

    async fn remove_favorite(&self, id: &str, auth: &AuthContext) -> ServiceResult<()>;

    /// Creates the profile on first write, updates it afterwards.
    async fn upsert_profile(
        &self,
        patch: ProfilePayload,
        auth: &AuthContext,
    ) -> ServiceResult<Profile>;
}

/// Implementation of MutationCapture over the SQLite store and the
/// operation queue.
pub struct MutationCaptureImpl {
    workout_repo: Arc<dyn WorkoutRepository>,
    set_repo: Arc<dyn WorkoutSetRepository>,
    exercise_repo: Arc<dyn ExerciseRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
    favorite_repo: Arc<dyn FavoriteRepository>,
    queue: Arc<dyn OperationQueueRepository>,
}

impl MutationCaptureImpl {
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
        }
    }

    async fn guard_not_preset(&self, exercise_id: &str) -> ServiceResult<Exercise> {
        let exercise = self
            .exercise_repo
            .find_by_id(exercise_id)
            .await
            .map_err(ServiceError::Domain)?;
        if exercise.is_preset {
            return Err(ServiceError::Domain(DomainError::Validation(
                ValidationError::invalid_value("exercise", "preset exercises cannot be modified"),
            )));
        }
        Ok(exercise)
    }

    fn authorize_owner(owner: &str, auth: &AuthContext) -> ServiceResult<()> {
        if owner == auth.user_id {
            Ok(())
        } else {
            Err(ServiceError::PermissionDenied(
                "record belongs to a different identity".to_string(),
            ))
        }
    }

    /// A set is owned through its parent workout.
    async fn authorize_set_owner(&self, workout_id: &str, auth: &AuthContext) -> ServiceResult<()> {
        let workout = self
            .workout_repo
            .find_by_id(workout_id)
            .await
            .map_err(ServiceError::Domain)?;
        Self::authorize_owner(&workout.user_id, auth)
    }
}

#[async_trait]
impl MutationCapture for MutationCaptureImpl {
    async fn create_workout(&self, new: NewWorkout, auth: &AuthContext) -> ServiceResult<Workout> {
        let workout = Workout::new_local(new, &auth.user_id);
        self.workout_repo
            .insert(&workout)
            .await
            .map_err(ServiceError::Domain)?;

        self.queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Create,
                &workout.id,
                QueuePayload::Workout(workout.to_payload()),
            )
            .await
            .map_err(ServiceError::Domain)?;

        debug!("Captured workout create {}", workout.id);
        Ok(workout)
    }

    async fn update_workout(
        &self,
        id: &str,
        patch: WorkoutPayload,
        auth: &AuthContext,
    ) -> ServiceResult<Workout> {
        let existing = self
            .workout_repo
            .find_by_id(id)
            .await
            .map_err(ServiceError::Domain)?;
        Self::authorize_owner(&existing.user_id, auth)?;

        let workout = self
            .workout_repo
            .update_fields(id, &patch)
            .await
            .map_err(ServiceError::Domain)?;

        self.queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Update,
                id,
                QueuePayload::Workout(patch),
            )
            .await
            .map_err(ServiceError::Domain)?;

        Ok(workout)
    }

    async fn delete_workout(&self, id: &str, auth: &AuthContext) -> ServiceResult<()> {
        let existing = self
            .workout_repo
            .find_by_id(id)
            .await
            .map_err(ServiceError::Domain)?;
        Self::authorize_owner(&existing.user_id, auth)?;

        let sets = self
            .set_repo
            .find_by_workout(id)
            .await
            .map_err(ServiceError::Domain)?;

        for set in &sets {
            self.set_repo
                .delete(&set.id)
                .await
                .map_err(ServiceError::Domain)?;
            self.queue
                .enqueue(
                    EntityTable::WorkoutSets,
                    QueueOperation::Delete,
                    &set.id,
                    QueuePayload::Empty,
                )
                .await
                .map_err(ServiceError::Domain)?;
        }

        self.workout_repo
            .delete(id)
            .await
            .map_err(ServiceError::Domain)?;
        self.queue
            .enqueue(
                EntityTable::Workouts,
                QueueOperation::Delete,
                id,
                QueuePayload::Empty,
            )
            .await
            .map_err(ServiceError::Domain)?;

        debug!("Captured workout delete {} ({} sets)", id, sets.len());
        Ok(())
    }

    async fn add_set(&self, new: NewWorkoutSet, auth: &AuthContext) -> ServiceResult<WorkoutSet> {
        self.authorize_set_owner(&new.workout_id, auth).await?;

        let set = WorkoutSet::new_local(new);
        self.set_repo
            .insert(&set)
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

        Ok(set)
    }

    async fn update_set(
        &self,
        id: &str,
        patch: WorkoutSetPayload,
        auth: &AuthContext,
    ) -> ServiceResult<WorkoutSet> {
        let existing = self
            .set_repo
            .find_by_id(id)
            .await
            .map_err(ServiceError::Domain)?;
        self.authorize_set_owner(&existing.workout_id, auth).await?;

        let set = self
            .set_repo
            .update_fields(id, &patch)
            .await
            .map_err(ServiceError::Domain)?;

        self.queue
            .enqueue(
                EntityTable::WorkoutSets,
                QueueOperation::Update,
                id,
                QueuePayload::WorkoutSet(patch),
            )
            .await
            .map_err(ServiceError::Domain)?;

        Ok(set)
    }

    async fn delete_set(&self, id: &str, auth: &AuthContext) -> ServiceResult<()> {
        let existing = self
            .set_repo
            .find_by_id(id)
            .await
            .map_err(ServiceError::Domain)?;
        self.authorize_set_owner(&existing.workout_id, auth).await?;

        self.set_repo
            .delete(id)
            .await
            .map_err(ServiceError::Domain)?;

        self.queue
            .enqueue(
                EntityTable::WorkoutSets,
                QueueOperation::Delete,
                id,
                QueuePayload::Empty,
            )
            .await
            .map_err(ServiceError::Domain)?;

        Ok(())
    }

    async fn create_exercise(
        &self,
        new: NewExercise,
        auth: &AuthContext,
    ) -> ServiceResult<Exercise> {
        let exercise = Exercise::new_local(new, &auth.user_id);
        self.exercise_repo
            .insert(&exercise)
            .await
            .map_err(ServiceError::Domain)?;

        self.queue
            .enqueue(
                EntityTable::Exercises,
                QueueOperation::Create,
                &exercise.id,
                QueuePayload::Exercise(exercise.to_payload()),
            )
            .await
            .map_err(ServiceError::Domain)?;

        Ok(exercise)
    }

    async fn update_exercise(
        &self,
        id: &str,
        patch: ExercisePayload,
        auth: &AuthContext,
    ) -> ServiceResult<Exercise> {
        let existing = self.guard_not_preset(id).await?;
        if let Some(owner) = &existing.user_id {
            Self::authorize_owner(owner, auth)?;
        }

        let exercise = self
            .exercise_repo
            .update_fields(id, &patch)
            .await
            .map_err(ServiceError::Domain)?;

        self.queue
            .enqueue(
                EntityTable::Exercises,
                QueueOperation::Update,
                id,
                QueuePayload::Exercise(patch),
            )
            .await
            .map_err(ServiceError::Domain)?;

        Ok(exercise)
    }

    async fn delete_exercise(&self, id: &str, auth: &AuthContext) -> ServiceResult<()> {
        let existing = self.guard_not_preset(id).await?;
        if let Some(owner) = &existing.user_id {
            Self::authorize_owner(owner, auth)?;
        }

        self.exercise_repo
            .delete(id)
            .await
            .map_err(ServiceError::Domain)?;

        self.queue
            .enqueue(
                EntityTable::Exercises,
                QueueOperation::Delete,
                id,
                QueuePayload::Empty,
            )
            .await
            .map_err(ServiceError::Domain)?;

        Ok(())
    }

    async fn add_favorite(&self, exercise_id: &str, auth: &AuthContext) -> ServiceResult<Favorite> {
        let favorite = Favorite::new_local(&auth.user_id, exercise_id);
        self.favorite_repo
            .insert(&favorite)
            .await
            .map_err(ServiceError::Domain)?;

        self.queue
            .enqueue(
                EntityTable::Favorites,
                QueueOperation::Create,
                &favorite.id,
                QueuePayload::Favorite(favorite.to_payload()),
            )
            .await
            .map_err(ServiceError::Domain)?;

        Ok(favorite)
    }

    async fn remove_favorite(&self, id: &str, auth: &AuthContext) -> ServiceResult<()> {
        let existing = self
            .favorite_repo
            .find_by_id(id)
            .await
            .map_err(ServiceError::Domain)?;
        Self::authorize_owner(&existing.user_id, auth)?;

        self.favorite_repo
            .delete(id)
            .await
            .map_err(ServiceError::Domain)?;

        self.queue
            .enqueue(
                EntityTable::Favorites,
                QueueOperation::Delete,
                id,
                QueuePayload::Empty,
            )
            .await
            .map_err(ServiceError::Domain)?;

        Ok(())
    }

    async fn upsert_profile(
        &self,
        patch: ProfilePayload,
        auth: &AuthContext,
    ) -> ServiceResult<Profile> {
        let existing = self
            .profile_repo
            .find_by_user(&auth.user_id)
            .await
            .map_err(ServiceError::Domain)?;

        let (profile, operation) = match existing {
            Some(mut profile) => {
                if let Some(display_name) = &patch.display_name {
                    profile.display_name = Some(display_name.clone());
                }
                if let Some(body_weight_kg) = patch.body_weight_kg {
                    profile.body_weight_kg = Some(body_weight_kg);
                }
                if let Some(preferred_unit) = &patch.preferred_unit {
                    profile.preferred_unit = preferred_unit.clone();
                }
                profile.synced = false;
                profile.last_modified = chrono::Utc::now();
                (profile, QueueOperation::Update)
            }
            None => {
                let mut profile = Profile::new_local(&auth.user_id);
                profile.display_name = patch.display_name.clone();
                profile.body_weight_kg = patch.body_weight_kg;
                if let Some(preferred_unit) = &patch.preferred_unit {
                    profile.preferred_unit = preferred_unit.clone();
                }
                (profile, QueueOperation::Create)
            }
        };

        self.profile_repo
            .upsert(&profile)
            .await
            .map_err(ServiceError::Domain)?;

        let payload = match operation {
            QueueOperation::Create => profile.to_payload(),
            _ => ProfilePayload {
                user_id: Some(auth.user_id.clone()),
                ..patch
            },
        };
        self.queue
            .enqueue(
                EntityTable::Profiles,
                operation,
                &profile.id,
                QueuePayload::Profile(payload),
            )
            .await
            .map_err(ServiceError::Domain)?;

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::database::new_test_pool;
    use crate::domains::exercise::repository::SqliteExerciseRepository;
    use crate::domains::favorite::repository::SqliteFavoriteRepository;
    use crate::domains::profile::repository::SqliteProfileRepository;
    use crate::domains::sync::repository::SqliteOperationQueueRepository;
    use crate::domains::workout::repository::SqliteWorkoutRepository;
    use crate::domains::workout_set::repository::SqliteWorkoutSetRepository;

    struct TestContext {
        capture: MutationCaptureImpl,
        queue: Arc<SqliteOperationQueueRepository>,
        workouts: Arc<SqliteWorkoutRepository>,
        sets: Arc<SqliteWorkoutSetRepository>,
    }

    async fn new_context() -> TestContext {
        let pool = new_test_pool().await;
        let queue = Arc::new(SqliteOperationQueueRepository::new(pool.clone()));
        let workouts = Arc::new(SqliteWorkoutRepository::new(pool.clone()));
        let sets = Arc::new(SqliteWorkoutSetRepository::new(pool.clone()));
        let capture = MutationCaptureImpl::new(
            workouts.clone(),
            sets.clone(),
            Arc::new(SqliteExerciseRepository::new(pool.clone())),
            Arc::new(SqliteProfileRepository::new(pool.clone())),
            Arc::new(SqliteFavoriteRepository::new(pool)),
            queue.clone(),
        );

        TestContext {
            capture,
            queue,
            workouts,
            sets,
        }
    }

    fn guest_auth() -> AuthContext {
        AuthContext::new(crate::types::new_local_id(), "device-1", true)
    }

    #[tokio::test]
    async fn test_create_workout_writes_store_then_queue() {
        let ctx = new_context().await;
        let auth = guest_auth();

        let workout = ctx
            .capture
            .create_workout(
                NewWorkout {
                    name: "Push day".to_string(),
                    notes: None,
                    started_at: Utc::now(),
                    duration_seconds: None,
                },
                &auth,
            )
            .await
            .unwrap();

        assert!(crate::types::is_local_id(&workout.id));
        assert!(!workout.synced);

        let stored = ctx.workouts.find_by_id(&workout.id).await.unwrap();
        assert_eq!(stored.user_id, auth.user_id);

        let items = ctx
            .queue
            .items_for_entity(EntityTable::Workouts, &workout.id)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].operation, QueueOperation::Create);
    }

    #[tokio::test]
    async fn test_delete_workout_cascades_to_sets() {
        let ctx = new_context().await;
        let auth = guest_auth();

        let workout = ctx
            .capture
            .create_workout(
                NewWorkout {
                    name: "Leg day".to_string(),
                    notes: None,
                    started_at: Utc::now(),
                    duration_seconds: None,
                },
                &auth,
            )
            .await
            .unwrap();
        let set = ctx
            .capture
            .add_set(
                NewWorkoutSet {
                    workout_id: workout.id.clone(),
                    exercise_id: "preset-back-squat".to_string(),
                    set_number: 1,
                    reps: 5,
                    weight_kg: Some(120.0),
                    completed: false,
                },
                &auth,
            )
            .await
            .unwrap();

        ctx.capture.delete_workout(&workout.id, &auth).await.unwrap();

        assert!(ctx.workouts.find_by_id(&workout.id).await.is_err());
        assert!(ctx.sets.find_by_id(&set.id).await.is_err());

        // Everything was created and deleted offline; consolidation wipes
        // the queue entirely.
        ctx.queue.consolidate().await.unwrap();
        assert_eq!(ctx.queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_preset_exercises_are_guarded() {
        let ctx = new_context().await;
        let auth = guest_auth();

        let err = ctx
            .capture
            .delete_exercise("preset-back-squat", &auth)
            .await;
        assert!(err.is_err());

        let err = ctx
            .capture
            .update_exercise(
                "preset-back-squat",
                ExercisePayload {
                    name: Some("Renamed".to_string()),
                    ..Default::default()
                },
                &auth,
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_upsert_profile_creates_then_updates() {
        let ctx = new_context().await;
        let auth = guest_auth();

        let profile = ctx
            .capture
            .upsert_profile(
                ProfilePayload {
                    display_name: Some("Anon lifter".to_string()),
                    ..Default::default()
                },
                &auth,
            )
            .await
            .unwrap();
        assert!(crate::types::is_local_id(&profile.id));

        let updated = ctx
            .capture
            .upsert_profile(
                ProfilePayload {
                    body_weight_kg: Some(82.5),
                    ..Default::default()
                },
                &auth,
            )
            .await
            .unwrap();
        assert_eq!(updated.id, profile.id);
        assert_eq!(updated.display_name.as_deref(), Some("Anon lifter"));
        assert_eq!(updated.body_weight_kg, Some(82.5));

        let items = ctx
            .queue
            .items_for_entity(EntityTable::Profiles, &profile.id)
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].operation, QueueOperation::Create);
        assert_eq!(items[1].operation, QueueOperation::Update);
    }
}
