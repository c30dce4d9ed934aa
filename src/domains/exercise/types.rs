use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domains::sync::remote::RemoteRecord;
use crate::domains::sync::types::ExercisePayload;
use crate::errors::DomainError;
use crate::types::{new_local_id, parse_datetime};

/// An exercise definition. Presets ship with the app, have no owner and are
/// never uploaded; custom exercises belong to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub muscle_group: Option<String>,
    pub is_preset: bool,
    pub synced: bool,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExercise {
    pub name: String,
    pub muscle_group: Option<String>,
}

impl Exercise {
    pub fn new_local(new: NewExercise, user_id: &str) -> Self {
        Self {
            id: new_local_id(),
            user_id: Some(user_id.to_string()),
            name: new.name,
            muscle_group: new.muscle_group,
            is_preset: false,
            synced: false,
            last_modified: Utc::now(),
        }
    }

    pub fn to_payload(&self) -> ExercisePayload {
        ExercisePayload {
            user_id: self.user_id.clone(),
            name: Some(self.name.clone()),
            muscle_group: self.muscle_group.clone(),
        }
    }

    pub fn from_remote(record: &RemoteRecord) -> Result<Self, DomainError> {
        Ok(Self {
            id: record.id.clone(),
            user_id: record.str_field("user_id"),
            name: record.require_str("name")?,
            muscle_group: record.str_field("muscle_group"),
            is_preset: record.bool_field("is_preset").unwrap_or(false),
            synced: true,
            last_modified: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ExerciseRow {
    pub id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub muscle_group: Option<String>,
    pub is_preset: i64,
    pub synced: i64,
    pub last_modified: String,
}

impl TryFrom<ExerciseRow> for Exercise {
    type Error = DomainError;

    fn try_from(row: ExerciseRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            muscle_group: row.muscle_group,
            is_preset: row.is_preset != 0,
            synced: row.synced != 0,
            last_modified: parse_datetime(&row.last_modified, "exercise.last_modified")?,
        })
    }
}
