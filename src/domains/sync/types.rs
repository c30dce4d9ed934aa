use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::time::Duration;

use crate::errors::{DomainError, ValidationError};
use crate::types::{is_local_id, parse_datetime, EntityTable};

/// The kind of mutation a queue item represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueOperation {
    Create,
    Update,
    Delete,
}

impl QueueOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::Create => "create",
            QueueOperation::Update => "update",
            QueueOperation::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "create" => Some(QueueOperation::Create),
            "update" => Some(QueueOperation::Update),
            "delete" => Some(QueueOperation::Delete),
            _ => None,
        }
    }
}

impl From<QueueOperation> for String {
    fn from(op: QueueOperation) -> Self {
        op.as_str().to_string()
    }
}

/// Queued field changes for a workout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkoutPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
}

/// Queued field changes for a workout set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSetPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workout_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exercise_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reps: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

/// Queued field changes for a custom exercise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExercisePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muscle_group: Option<String>,
}

/// Queued field changes for a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_weight_kg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_unit: Option<String>,
}

/// Queued field changes for a favorite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FavoritePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exercise_id: Option<String>,
}

/// Payload of a queued operation, keyed by entity table.
///
/// Every variant carries the exact field set its table accepts; the variant is
/// validated against `(table, operation)` at enqueue time. Deletes carry no
/// fields (`Empty`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueuePayload {
    Workout(WorkoutPayload),
    WorkoutSet(WorkoutSetPayload),
    Exercise(ExercisePayload),
    Profile(ProfilePayload),
    Favorite(FavoritePayload),
    Empty,
}

impl QueuePayload {
    /// Table this payload variant belongs to, if any.
    pub fn table(&self) -> Option<EntityTable> {
        match self {
            QueuePayload::Workout(_) => Some(EntityTable::Workouts),
            QueuePayload::WorkoutSet(_) => Some(EntityTable::WorkoutSets),
            QueuePayload::Exercise(_) => Some(EntityTable::Exercises),
            QueuePayload::Profile(_) => Some(EntityTable::Profiles),
            QueuePayload::Favorite(_) => Some(EntityTable::Favorites),
            QueuePayload::Empty => None,
        }
    }

    /// Enqueue-time validation: does this payload fit the given slot?
    pub fn validate_for(
        &self,
        table: EntityTable,
        operation: QueueOperation,
    ) -> Result<(), DomainError> {
        let ok = match operation {
            QueueOperation::Delete => matches!(self, QueuePayload::Empty),
            QueueOperation::Create | QueueOperation::Update => self.table() == Some(table),
        };
        if ok {
            Ok(())
        } else {
            Err(DomainError::Validation(ValidationError::invalid_value(
                "payload",
                &format!(
                    "payload does not match {} {}",
                    operation.as_str(),
                    table.as_str()
                ),
            )))
        }
    }

    /// Field-by-field merge; later values win. A mismatched variant is
    /// ignored, an `Empty` later payload contributes nothing.
    pub fn merge_from(&mut self, later: &QueuePayload) {
        if matches!(self, QueuePayload::Empty) {
            if !matches!(later, QueuePayload::Empty) {
                *self = later.clone();
            }
            return;
        }

        macro_rules! merge_fields {
            ($cur:ident, $new:ident, [$($field:ident),+ $(,)?]) => {
                $( if $new.$field.is_some() { $cur.$field = $new.$field.clone(); } )+
            };
        }

        match (self, later) {
            (QueuePayload::Workout(cur), QueuePayload::Workout(new)) => {
                merge_fields!(cur, new, [user_id, name, notes, started_at, duration_seconds]);
            }
            (QueuePayload::WorkoutSet(cur), QueuePayload::WorkoutSet(new)) => {
                merge_fields!(
                    cur,
                    new,
                    [workout_id, exercise_id, set_number, reps, weight_kg, completed]
                );
            }
            (QueuePayload::Exercise(cur), QueuePayload::Exercise(new)) => {
                merge_fields!(cur, new, [user_id, name, muscle_group]);
            }
            (QueuePayload::Profile(cur), QueuePayload::Profile(new)) => {
                merge_fields!(cur, new, [user_id, display_name, body_weight_kg, preferred_unit]);
            }
            (QueuePayload::Favorite(cur), QueuePayload::Favorite(new)) => {
                merge_fields!(cur, new, [user_id, exercise_id]);
            }
            _ => {}
        }
    }

    /// Mutable access to every field that holds an entity or identity
    /// reference. These are the fields the mapping layer may rewrite.
    pub fn id_fields_mut(&mut self) -> Vec<&mut String> {
        match self {
            QueuePayload::Workout(p) => p.user_id.iter_mut().collect(),
            QueuePayload::WorkoutSet(p) => p
                .workout_id
                .iter_mut()
                .chain(p.exercise_id.iter_mut())
                .collect(),
            QueuePayload::Exercise(p) => p.user_id.iter_mut().collect(),
            QueuePayload::Profile(p) => p.user_id.iter_mut().collect(),
            QueuePayload::Favorite(p) => p
                .user_id
                .iter_mut()
                .chain(p.exercise_id.iter_mut())
                .collect(),
            QueuePayload::Empty => Vec::new(),
        }
    }

    /// Replace every reference equal to `old_id` with `new_id`. Returns
    /// whether anything changed.
    pub fn rewrite_matching(&mut self, old_id: &str, new_id: &str) -> bool {
        let mut changed = false;
        for field in self.id_fields_mut() {
            if field == old_id {
                *field = new_id.to_string();
                changed = true;
            }
        }
        changed
    }

    /// Reference fields still holding a local-only identifier.
    pub fn local_references(&self) -> Vec<String> {
        let mut clone = self.clone();
        clone
            .id_fields_mut()
            .into_iter()
            .filter(|f| is_local_id(f))
            .map(|f| f.clone())
            .collect()
    }

    /// JSON body sent to the remote API. `None` fields are omitted.
    pub fn to_remote_json(&self) -> Result<serde_json::Value, DomainError> {
        let value = match self {
            QueuePayload::Workout(p) => serde_json::to_value(p),
            QueuePayload::WorkoutSet(p) => serde_json::to_value(p),
            QueuePayload::Exercise(p) => serde_json::to_value(p),
            QueuePayload::Profile(p) => serde_json::to_value(p),
            QueuePayload::Favorite(p) => serde_json::to_value(p),
            QueuePayload::Empty => Ok(serde_json::json!({})),
        };
        value.map_err(|e| DomainError::Internal(format!("Failed to serialize payload: {}", e)))
    }
}

/// A pending mutation awaiting upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub seq: i64,
    pub entity_table: EntityTable,
    pub operation: QueueOperation,
    pub entity_id: String,
    pub payload: QueuePayload,
    pub created_at: DateTime<Utc>,
    pub retry_count: i64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct QueueItemRow {
    pub seq: i64,
    pub entity_table: String,
    pub operation: String,
    pub entity_id: String,
    pub payload: String,
    pub created_at: String,
    pub retry_count: i64,
    pub last_error: Option<String>,
}

impl TryFrom<QueueItemRow> for QueueItem {
    type Error = DomainError;

    fn try_from(row: QueueItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            seq: row.seq,
            entity_table: EntityTable::parse(&row.entity_table)?,
            operation: QueueOperation::from_str(&row.operation).ok_or_else(|| {
                DomainError::Validation(ValidationError::invalid_value(
                    "sync_queue.operation",
                    &row.operation,
                ))
            })?,
            entity_id: row.entity_id,
            payload: serde_json::from_str(&row.payload).map_err(|e| {
                DomainError::Validation(ValidationError::invalid_value(
                    "sync_queue.payload",
                    &format!("Invalid payload JSON: {}", e),
                ))
            })?,
            created_at: parse_datetime(&row.created_at, "sync_queue.created_at")?,
            retry_count: row.retry_count,
            last_error: row.last_error,
        })
    }
}

/// Outcome of one `sync()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub success: bool,
    pub synced: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn empty() -> Self {
        Self {
            success: true,
            synced: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn already_running() -> Self {
        Self {
            success: false,
            synced: 0,
            failed: 0,
            errors: vec!["Sync already in progress".to_string()],
        }
    }
}

/// Observable engine state for callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusSnapshot {
    pub pending_operations: i64,
    pub is_syncing: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Delay schedule shared by the per-item retry counter and the whole-drain
/// retry wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub jitter_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 5,
            jitter_ms: 250,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (zero-based). Grows geometrically,
    /// capped at `max_delay_ms`, with uniform jitter on top.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let scaled = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = (scaled as u64).min(self.max_delay_ms);
        let jitter = if self.jitter_ms > 0 {
            rand::rng().random_range(0..self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Attempts per queue item before it is dropped and surfaced as terminal.
    pub max_item_retries: i64,
    pub backoff: BackoffPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_item_retries: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_merge_later_wins() {
        let mut base = QueuePayload::Workout(WorkoutPayload {
            user_id: Some("usr-1".into()),
            name: Some("Push day".into()),
            ..Default::default()
        });
        base.merge_from(&QueuePayload::Workout(WorkoutPayload {
            name: Some("Pull day".into()),
            duration_seconds: Some(3600),
            ..Default::default()
        }));

        match base {
            QueuePayload::Workout(p) => {
                assert_eq!(p.user_id.as_deref(), Some("usr-1"));
                assert_eq!(p.name.as_deref(), Some("Pull day"));
                assert_eq!(p.duration_seconds, Some(3600));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_payload_validation() {
        let payload = QueuePayload::Workout(WorkoutPayload::default());
        assert!(payload
            .validate_for(EntityTable::Workouts, QueueOperation::Create)
            .is_ok());
        assert!(payload
            .validate_for(EntityTable::Favorites, QueueOperation::Create)
            .is_err());
        assert!(payload
            .validate_for(EntityTable::Workouts, QueueOperation::Delete)
            .is_err());
        assert!(QueuePayload::Empty
            .validate_for(EntityTable::Workouts, QueueOperation::Delete)
            .is_ok());
    }

    #[test]
    fn test_rewrite_matching_references() {
        let mut payload = QueuePayload::WorkoutSet(WorkoutSetPayload {
            workout_id: Some("local-abc".into()),
            exercise_id: Some("preset-back-squat".into()),
            reps: Some(5),
            ..Default::default()
        });
        assert_eq!(payload.local_references(), vec!["local-abc".to_string()]);
        assert!(payload.rewrite_matching("local-abc", "srv-9"));
        assert!(payload.local_references().is_empty());
        assert!(!payload.rewrite_matching("local-abc", "srv-9"));
    }

    #[test]
    fn test_remote_json_omits_missing_fields() {
        let payload = QueuePayload::Workout(WorkoutPayload {
            name: Some("Leg day".into()),
            ..Default::default()
        });
        let json = payload.to_remote_json().unwrap();
        assert_eq!(json.get("name").and_then(|v| v.as_str()), Some("Leg day"));
        assert!(json.get("notes").is_none());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = BackoffPolicy {
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 500,
            max_attempts: 5,
            jitter_ms: 0,
        };
        assert_eq!(policy.delay_for(0).as_millis(), 100);
        assert_eq!(policy.delay_for(1).as_millis(), 200);
        assert_eq!(policy.delay_for(2).as_millis(), 400);
        // Beyond the schedule the cap takes over.
        assert_eq!(policy.delay_for(3).as_millis(), 500);
        assert_eq!(policy.delay_for(10).as_millis(), 500);
    }
}
