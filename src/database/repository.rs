use crate::database::error::DatabaseError;
use async_trait::async_trait;
use uuid::Uuid;

/// Base repository trait for versioned records
#[async_trait]
pub trait Repository: Send + Sync {
    /// Associated type for the entity this repository manages
    type Entity: Send + Sync;

    /// Find an entity by its ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Self::Entity>, DatabaseError>;

    /// Insert a new entity
    async fn insert(&self, entity: &Self::Entity) -> Result<(), DatabaseError>;

    /// Write `entity` if the stored version still equals `expected_version`.
    /// Returns whether a row was written.
    async fn update(
        &self,
        entity: &Self::Entity,
        expected_version: i64,
    ) -> Result<bool, DatabaseError>;
}
