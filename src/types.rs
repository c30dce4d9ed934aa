use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, ValidationError};

/// Marker prefix for identifiers generated on-device while offline.
///
/// A record keeps its local identifier until the first successful remote
/// create, at which point the server-assigned identifier replaces it
/// everywhere (store, queue payloads, mapping table).
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Generate a fresh local-only identifier.
pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4())
}

/// Whether an identifier was generated on-device and is unknown to the server.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// The synchronised entity tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTable {
    Workouts,
    WorkoutSets,
    Exercises,
    Profiles,
    Favorites,
}

impl EntityTable {
    pub const ALL: [EntityTable; 5] = [
        EntityTable::Workouts,
        EntityTable::WorkoutSets,
        EntityTable::Exercises,
        EntityTable::Profiles,
        EntityTable::Favorites,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityTable::Workouts => "workouts",
            EntityTable::WorkoutSets => "workout_sets",
            EntityTable::Exercises => "exercises",
            EntityTable::Profiles => "profiles",
            EntityTable::Favorites => "favorites",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "workouts" => Some(EntityTable::Workouts),
            "workout_sets" => Some(EntityTable::WorkoutSets),
            "exercises" => Some(EntityTable::Exercises),
            "profiles" => Some(EntityTable::Profiles),
            "favorites" => Some(EntityTable::Favorites),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        Self::from_str(s).ok_or_else(|| {
            DomainError::Validation(ValidationError::Entity(format!(
                "Unknown entity table: {}",
                s
            )))
        })
    }

    /// Tables whose creates are prioritised so that dependents referencing
    /// them can be rewritten to server identifiers.
    pub fn is_parent(&self) -> bool {
        matches!(self, EntityTable::Workouts)
    }

    /// Tables other rows reference by identifier; a successful create on one
    /// of these triggers a rewrite of stored and queued child references.
    pub fn has_child_references(&self) -> bool {
        matches!(self, EntityTable::Workouts | EntityTable::Exercises)
    }

    /// URL path segment used by the remote API.
    pub fn api_path(&self) -> &'static str {
        self.as_str()
    }
}

impl From<EntityTable> for String {
    fn from(table: EntityTable) -> Self {
        table.as_str().to_string()
    }
}

pub(crate) fn parse_datetime(dt_str: &str, field_name: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(dt_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            DomainError::Validation(ValidationError::Format {
                field: field_name.to_string(),
                reason: format!("Invalid RFC3339 format: {}", dt_str),
            })
        })
}

pub(crate) fn parse_optional_datetime(
    dt_str: Option<String>,
    field_name: &str,
) -> Result<Option<DateTime<Utc>>, DomainError> {
    dt_str.map(|s| parse_datetime(&s, field_name)).transpose()
}
