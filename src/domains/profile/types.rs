use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domains::sync::remote::RemoteRecord;
use crate::domains::sync::types::ProfilePayload;
use crate::errors::DomainError;
use crate::types::{new_local_id, parse_datetime};

/// Per-user settings and body data. One row per owning identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub user_id: String,
    pub display_name: Option<String>,
    pub body_weight_kg: Option<f64>,
    pub preferred_unit: String,
    pub synced: bool,
    pub last_modified: DateTime<Utc>,
}

impl Profile {
    pub fn new_local(user_id: &str) -> Self {
        Self {
            id: new_local_id(),
            user_id: user_id.to_string(),
            display_name: None,
            body_weight_kg: None,
            preferred_unit: "kg".to_string(),
            synced: false,
            last_modified: Utc::now(),
        }
    }

    pub fn to_payload(&self) -> ProfilePayload {
        ProfilePayload {
            user_id: Some(self.user_id.clone()),
            display_name: self.display_name.clone(),
            body_weight_kg: self.body_weight_kg,
            preferred_unit: Some(self.preferred_unit.clone()),
        }
    }

    pub fn from_remote(record: &RemoteRecord) -> Result<Self, DomainError> {
        Ok(Self {
            id: record.id.clone(),
            user_id: record.require_str("user_id")?,
            display_name: record.str_field("display_name"),
            body_weight_kg: record.f64_field("body_weight_kg"),
            preferred_unit: record
                .str_field("preferred_unit")
                .unwrap_or_else(|| "kg".to_string()),
            synced: true,
            last_modified: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ProfileRow {
    pub id: String,
    pub user_id: String,
    pub display_name: Option<String>,
    pub body_weight_kg: Option<f64>,
    pub preferred_unit: String,
    pub synced: i64,
    pub last_modified: String,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = DomainError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            display_name: row.display_name,
            body_weight_kg: row.body_weight_kg,
            preferred_unit: row.preferred_unit,
            synced: row.synced != 0,
            last_modified: parse_datetime(&row.last_modified, "profile.last_modified")?,
        })
    }
}
