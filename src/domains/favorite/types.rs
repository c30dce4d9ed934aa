use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domains::sync::remote::RemoteRecord;
use crate::domains::sync::types::FavoritePayload;
use crate::errors::DomainError;
use crate::types::{new_local_id, parse_datetime};

/// A user's bookmarked exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub id: String,
    pub user_id: String,
    pub exercise_id: String,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
    pub last_modified: DateTime<Utc>,
}

impl Favorite {
    pub fn new_local(user_id: &str, exercise_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_local_id(),
            user_id: user_id.to_string(),
            exercise_id: exercise_id.to_string(),
            created_at: now,
            synced: false,
            last_modified: now,
        }
    }

    pub fn to_payload(&self) -> FavoritePayload {
        FavoritePayload {
            user_id: Some(self.user_id.clone()),
            exercise_id: Some(self.exercise_id.clone()),
        }
    }

    pub fn from_remote(record: &RemoteRecord) -> Result<Self, DomainError> {
        let created_at = match record.str_field("created_at") {
            Some(raw) => parse_datetime(&raw, "favorite.created_at")?,
            None => Utc::now(),
        };
        Ok(Self {
            id: record.id.clone(),
            user_id: record.require_str("user_id")?,
            exercise_id: record.require_str("exercise_id")?,
            created_at,
            synced: true,
            last_modified: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct FavoriteRow {
    pub id: String,
    pub user_id: String,
    pub exercise_id: String,
    pub created_at: String,
    pub synced: i64,
    pub last_modified: String,
}

impl TryFrom<FavoriteRow> for Favorite {
    type Error = DomainError;

    fn try_from(row: FavoriteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            exercise_id: row.exercise_id,
            created_at: parse_datetime(&row.created_at, "favorite.created_at")?,
            synced: row.synced != 0,
            last_modified: parse_datetime(&row.last_modified, "favorite.last_modified")?,
        })
    }
}
