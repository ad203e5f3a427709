use crate::model::{
    CreatedInstance, Entity, EntityKey, HistoricalInstance, Id, InstanceWithPosition,
    LatestInstance, NewEntity, NewInstance, NewPosition,
};
use anyhow::Result;

#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// Find an entity by its `(name, integration_source)` identity.
    /// `Ok(None)` is the expected "not found" outcome.
    async fn find_entity(&self, key: EntityKey<'_>) -> Result<Option<Entity>>;
    /// Create an entity. Fails on constraint violations (duplicate identity,
    /// template outside the allowed set).
    async fn create_entity(&self, entity: NewEntity) -> Result<Entity>;
    async fn get_entity(&self, entity_id: Id) -> Result<Option<Entity>>;
    /// One page of entities ordered by id.
    async fn list_entities(&self, limit: u32, offset: u32) -> Result<Vec<Entity>>;
    /// Every entity whose name is in `names`, from any integration source,
    /// ordered by name then integration source.
    async fn entities_by_names(&self, names: &[String]) -> Result<Vec<Entity>>;
}

#[async_trait::async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert an instance and return its id with the stored creation time.
    async fn create_instance(&self, instance: NewInstance) -> Result<CreatedInstance>;
    /// Every instance that has a position, joined with its entity, oldest first.
    async fn list_instances(&self) -> Result<Vec<InstanceWithPosition>>;
    /// The most recent instance of each entity.
    async fn latest_instances(&self) -> Result<Vec<LatestInstance>>;
    /// Instances created within the last `window_seconds`, newest first.
    async fn historical_instances(&self, window_seconds: i64) -> Result<Vec<HistoricalInstance>>;
}

#[async_trait::async_trait]
pub trait PositionStore: Send + Sync {
    async fn create_position(&self, position: NewPosition) -> Result<()>;
}

pub trait Store: EntityStore + InstanceStore + PositionStore + Send + Sync {}
impl<T: EntityStore + InstanceStore + PositionStore + Send + Sync> Store for T {}
