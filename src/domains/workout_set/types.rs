use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domains::sync::remote::RemoteRecord;
use crate::domains::sync::types::WorkoutSetPayload;
use crate::errors::{DomainError, ValidationError};
use crate::types::{new_local_id, parse_datetime};

/// One set performed within a workout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSet {
    pub id: String,
    pub workout_id: String,
    pub exercise_id: String,
    pub set_number: i64,
    pub reps: i64,
    pub weight_kg: Option<f64>,
    pub completed: bool,
    pub synced: bool,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkoutSet {
    pub workout_id: String,
    pub exercise_id: String,
    pub set_number: i64,
    pub reps: i64,
    pub weight_kg: Option<f64>,
    pub completed: bool,
}

impl WorkoutSet {
    pub fn new_local(new: NewWorkoutSet) -> Self {
        Self {
            id: new_local_id(),
            workout_id: new.workout_id,
            exercise_id: new.exercise_id,
            set_number: new.set_number,
            reps: new.reps,
            weight_kg: new.weight_kg,
            completed: new.completed,
            synced: false,
            last_modified: Utc::now(),
        }
    }

    pub fn to_payload(&self) -> WorkoutSetPayload {
        WorkoutSetPayload {
            workout_id: Some(self.workout_id.clone()),
            exercise_id: Some(self.exercise_id.clone()),
            set_number: Some(self.set_number),
            reps: Some(self.reps),
            weight_kg: self.weight_kg,
            completed: Some(self.completed),
        }
    }

    pub fn from_remote(record: &RemoteRecord) -> Result<Self, DomainError> {
        Ok(Self {
            id: record.id.clone(),
            workout_id: record.require_str("workout_id")?,
            exercise_id: record.require_str("exercise_id")?,
            set_number: record.i64_field("set_number").ok_or_else(|| {
                DomainError::Validation(ValidationError::required("workout_set.set_number"))
            })?,
            reps: record.i64_field("reps").ok_or_else(|| {
                DomainError::Validation(ValidationError::required("workout_set.reps"))
            })?,
            weight_kg: record.f64_field("weight_kg"),
            completed: record.bool_field("completed").unwrap_or(false),
            synced: true,
            last_modified: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkoutSetRow {
    pub id: String,
    pub workout_id: String,
    pub exercise_id: String,
    pub set_number: i64,
    pub reps: i64,
    pub weight_kg: Option<f64>,
    pub completed: i64,
    pub synced: i64,
    pub last_modified: String,
}

impl TryFrom<WorkoutSetRow> for WorkoutSet {
    type Error = DomainError;

    fn try_from(row: WorkoutSetRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            workout_id: row.workout_id,
            exercise_id: row.exercise_id,
            set_number: row.set_number,
            reps: row.reps,
            weight_kg: row.weight_kg,
            completed: row.completed != 0,
            synced: row.synced != 0,
            last_modified: parse_datetime(&row.last_modified, "workout_set.last_modified")?,
        })
    }
}
