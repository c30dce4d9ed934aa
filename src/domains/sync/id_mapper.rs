use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use tokio::sync::RwLock;

use crate::domains::sync::repository::IdMappingRepository;
use crate::domains::sync::types::QueuePayload;
use crate::errors::DomainResult;
use crate::types::{is_local_id, EntityTable};

/// Cached view of the local-to-server identifier mapping table.
///
/// The cache is owned here and hydrated lazily, once per process lifetime;
/// `clear` drops cache and table together (logout). Mappings are permanent
/// otherwise: once an entity has a server identifier it never changes.
pub struct IdMapper {
    repo: Arc<dyn IdMappingRepository>,
    cache: RwLock<Option<HashMap<String, String>>>,
}

impl IdMapper {
    pub fn new(repo: Arc<dyn IdMappingRepository>) -> Self {
        Self {
            repo,
            cache: RwLock::new(None),
        }
    }

    /// Load the persistent table into the cache if not already loaded.
    pub async fn hydrate(&self) -> DomainResult<()> {
        let mut guard = self.cache.write().await;
        if guard.is_some() {
            return Ok(());
        }
        let entries = self.repo.load_all().await?;
        debug!("Hydrated id-mapping cache with {} entries", entries.len());
        *guard = Some(entries.into_iter().collect());
        Ok(())
    }

    /// Write-through: persistent table first, then the cache.
    pub async fn save_mapping(
        &self,
        local_id: &str,
        server_id: &str,
        table: EntityTable,
    ) -> DomainResult<()> {
        self.repo.insert(local_id, server_id, table).await?;

        let mut guard = self.cache.write().await;
        guard
            .get_or_insert_with(HashMap::new)
            .entry(local_id.to_string())
            .or_insert_with(|| server_id.to_string());

        Ok(())
    }

    /// Cache hit returns immediately; a miss falls back to the persistent
    /// table and populates the cache.
    pub async fn get_server_id(&self, local_id: &str) -> DomainResult<Option<String>> {
        {
            let guard = self.cache.read().await;
            if let Some(cache) = guard.as_ref() {
                if let Some(server_id) = cache.get(local_id) {
                    return Ok(Some(server_id.clone()));
                }
            }
        }

        let found = self.repo.find_server_id(local_id).await?;
        if let Some(server_id) = &found {
            let mut guard = self.cache.write().await;
            guard
                .get_or_insert_with(HashMap::new)
                .insert(local_id.to_string(), server_id.clone());
        }

        Ok(found)
    }

    /// Substitute mapped server identifiers into every reference field of the
    /// payload. Unmapped local references are left untouched; the returned
    /// count of them tells the caller a dependency is not ready.
    pub async fn replace_payload_identifiers(
        &self,
        payload: &mut QueuePayload,
    ) -> DomainResult<usize> {
        let mut unresolved = 0usize;
        for field in payload.id_fields_mut() {
            if !is_local_id(field) {
                continue;
            }
            match self.get_server_id(field.as_str()).await? {
                Some(server_id) => *field = server_id,
                None => unresolved += 1,
            }
        }
        Ok(unresolved)
    }

    /// Drop cache and persistent table. Logout only.
    pub async fn clear(&self) -> DomainResult<()> {
        self.repo.clear().await?;
        let mut guard = self.cache.write().await;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::new_test_pool;
    use crate::domains::sync::repository::SqliteIdMappingRepository;
    use crate::domains::sync::types::WorkoutSetPayload;

    async fn new_mapper() -> IdMapper {
        let pool = new_test_pool().await;
        IdMapper::new(Arc::new(SqliteIdMappingRepository::new(pool)))
    }

    #[tokio::test]
    async fn test_mapping_survives_cache_reload() {
        let mapper = new_mapper().await;
        mapper
            .save_mapping("local-1", "srv-1", EntityTable::Workouts)
            .await
            .unwrap();

        // Simulate a fresh process: a new mapper over the same repository.
        let repo = mapper.repo.clone();
        let fresh = IdMapper::new(repo);
        fresh.hydrate().await.unwrap();
        assert_eq!(
            fresh.get_server_id("local-1").await.unwrap().as_deref(),
            Some("srv-1")
        );
    }

    #[tokio::test]
    async fn test_cache_miss_falls_back_to_table() {
        let mapper = new_mapper().await;
        mapper
            .repo
            .insert("local-2", "srv-2", EntityTable::Exercises)
            .await
            .unwrap();

        // Nothing hydrated yet; lookup must still find the row.
        assert_eq!(
            mapper.get_server_id("local-2").await.unwrap().as_deref(),
            Some("srv-2")
        );
    }

    #[tokio::test]
    async fn test_replace_payload_identifiers_partial() {
        let mapper = new_mapper().await;
        mapper
            .save_mapping("local-w", "srv-w", EntityTable::Workouts)
            .await
            .unwrap();

        let mut payload = QueuePayload::WorkoutSet(WorkoutSetPayload {
            workout_id: Some("local-w".into()),
            exercise_id: Some("local-e".into()),
            reps: Some(5),
            ..Default::default()
        });

        let unresolved = mapper
            .replace_payload_identifiers(&mut payload)
            .await
            .unwrap();
        assert_eq!(unresolved, 1);
        match payload {
            QueuePayload::WorkoutSet(p) => {
                assert_eq!(p.workout_id.as_deref(), Some("srv-w"));
                // Unmapped reference left untouched.
                assert_eq!(p.exercise_id.as_deref(), Some("local-e"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clear_drops_cache_and_table() {
        let mapper = new_mapper().await;
        mapper
            .save_mapping("local-3", "srv-3", EntityTable::Favorites)
            .await
            .unwrap();

        mapper.clear().await.unwrap();
        assert_eq!(mapper.get_server_id("local-3").await.unwrap(), None);
    }
}
