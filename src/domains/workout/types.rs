use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domains::sync::remote::RemoteRecord;
use crate::domains::sync::types::WorkoutPayload;
use crate::errors::DomainError;
use crate::types::{new_local_id, parse_datetime};

/// A logged training session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub notes: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
    pub synced: bool,
    pub last_modified: DateTime<Utc>,
}

/// Fields supplied when creating a workout locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkout {
    pub name: String,
    pub notes: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
}

impl Workout {
    /// Build an unsynced record under a fresh local identifier.
    pub fn new_local(new: NewWorkout, user_id: &str) -> Self {
        Self {
            id: new_local_id(),
            user_id: user_id.to_string(),
            name: new.name,
            notes: new.notes,
            started_at: new.started_at,
            duration_seconds: new.duration_seconds,
            synced: false,
            last_modified: Utc::now(),
        }
    }

    /// Full-field queue payload, used for creates and re-enqueues.
    pub fn to_payload(&self) -> WorkoutPayload {
        WorkoutPayload {
            user_id: Some(self.user_id.clone()),
            name: Some(self.name.clone()),
            notes: self.notes.clone(),
            started_at: Some(self.started_at),
            duration_seconds: self.duration_seconds,
        }
    }

    /// Build a synced record from a remote representation (hydration path).
    pub fn from_remote(record: &RemoteRecord) -> Result<Self, DomainError> {
        Ok(Self {
            id: record.id.clone(),
            user_id: record.require_str("user_id")?,
            name: record.require_str("name")?,
            notes: record.str_field("notes"),
            started_at: parse_datetime(&record.require_str("started_at")?, "workout.started_at")?,
            duration_seconds: record.i64_field("duration_seconds"),
            synced: true,
            last_modified: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkoutRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub notes: Option<String>,
    pub started_at: String,
    pub duration_seconds: Option<i64>,
    pub synced: i64,
    pub last_modified: String,
}

impl TryFrom<WorkoutRow> for Workout {
    type Error = DomainError;

    fn try_from(row: WorkoutRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            notes: row.notes,
            started_at: parse_datetime(&row.started_at, "workout.started_at")?,
            duration_seconds: row.duration_seconds,
            synced: row.synced != 0,
            last_modified: parse_datetime(&row.last_modified, "workout.last_modified")?,
        })
    }
}
