use async_trait::async_trait;

use crate::errors::DomainResult;

/// Core lookup shared by every entity repository.
///
/// Identifiers are strings: either a device-generated local id or the id the
/// server assigned on first sync.
#[async_trait]
pub trait FindById<T>: Send + Sync {
    async fn find_by_id(&self, id: &str) -> DomainResult<T>;
}
