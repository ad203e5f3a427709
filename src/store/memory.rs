//! In-memory store with the same constraints as the Postgres schema.
//!
//! Every gateway call is recorded in order, which lets tests assert on the
//! exact write sequence a request produced.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use parking_lot::Mutex;

use crate::model::{
    generate_id, storage_precision, CreatedInstance, Entity, EntityKey, HistoricalInstance, Id,
    Instance, InstanceWithPosition, LatestInstance, NewEntity, NewInstance, NewPosition,
};
use crate::store::traits::{EntityStore, InstanceStore, PositionStore};

/// Templates accepted by the `entity.template` check constraint.
pub const DEFAULT_TEMPLATES: RangeInclusive<i32> = 1..=3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    FindEntity,
    CreateEntity,
    GetEntity,
    ListEntities,
    FindEntitiesByNames,
    CreateInstance,
    CreatePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    FindEntity {
        name: String,
        integration_source: String,
    },
    CreateEntity(NewEntity),
    GetEntity(Id),
    ListEntities {
        limit: u32,
        offset: u32,
    },
    FindEntitiesByNames(Vec<String>),
    CreateInstance(NewInstance),
    CreatePosition(NewPosition),
}

impl StoreCall {
    pub fn operation(&self) -> StoreOperation {
        match self {
            StoreCall::FindEntity { .. } => StoreOperation::FindEntity,
            StoreCall::CreateEntity(_) => StoreOperation::CreateEntity,
            StoreCall::GetEntity(_) => StoreOperation::GetEntity,
            StoreCall::ListEntities { .. } => StoreOperation::ListEntities,
            StoreCall::FindEntitiesByNames(_) => StoreOperation::FindEntitiesByNames,
            StoreCall::CreateInstance(_) => StoreOperation::CreateInstance,
            StoreCall::CreatePosition(_) => StoreOperation::CreatePosition,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StoreCall::CreateEntity(_) | StoreCall::CreateInstance(_) | StoreCall::CreatePosition(_)
        )
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entities: HashMap<Id, Entity>,
    instances: Vec<Instance>,
    positions: Vec<NewPosition>,
    calls: Vec<StoreCall>,
    failing: HashSet<StoreOperation>,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    templates: RangeInclusive<i32>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            templates: DEFAULT_TEMPLATES,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `operation` fail with a persistence error.
    pub fn fail_on(&self, operation: StoreOperation) {
        self.state.lock().failing.insert(operation);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().calls.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().calls.iter().filter(|c| c.is_write()).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.state.lock().entities.values().cloned().collect()
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.state.lock().instances.clone()
    }

    pub fn positions(&self) -> Vec<NewPosition> {
        self.state.lock().positions.clone()
    }

    fn record(state: &mut MemoryState, call: StoreCall) -> Result<()> {
        let operation = call.operation();
        state.calls.push(call);
        if state.failing.contains(&operation) {
            return Err(anyhow!("injected failure for {:?}", operation));
        }
        Ok(())
    }

    fn entity_for<'a>(state: &'a MemoryState, entity_id: &Id) -> Result<&'a Entity> {
        state
            .entities
            .get(entity_id)
            .ok_or_else(|| anyhow!("instance references missing entity {}", entity_id))
    }
}

#[async_trait::async_trait]
impl EntityStore for MemoryStore {
    async fn find_entity(&self, key: EntityKey<'_>) -> Result<Option<Entity>> {
        let mut state = self.state.lock();
        Self::record(
            &mut state,
            StoreCall::FindEntity {
                name: key.name.to_string(),
                integration_source: key.integration_source.to_string(),
            },
        )?;

        Ok(state.entities.values().find(|e| e.key() == key).cloned())
    }

    async fn create_entity(&self, entity: NewEntity) -> Result<Entity> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreCall::CreateEntity(entity.clone()))?;

        if !self.templates.contains(&entity.template) {
            return Err(anyhow!(
                "new row for relation \"entity\" violates check constraint \"entity_template_check\": template {}",
                entity.template
            ));
        }
        if state.entities.values().any(|e| e.key() == entity.key()) {
            return Err(anyhow!(
                "duplicate key value violates unique constraint \"entity_name_integration_source_key\": {}",
                entity.key()
            ));
        }

        let created = entity.into_entity(generate_id());
        state.entities.insert(created.entity_id, created.clone());
        Ok(created)
    }

    async fn get_entity(&self, entity_id: Id) -> Result<Option<Entity>> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreCall::GetEntity(entity_id))?;

        Ok(state.entities.get(&entity_id).cloned())
    }

    async fn list_entities(&self, limit: u32, offset: u32) -> Result<Vec<Entity>> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreCall::ListEntities { limit, offset })?;

        Ok(state
            .entities
            .values()
            .sorted_by_key(|e| e.entity_id)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn entities_by_names(&self, names: &[String]) -> Result<Vec<Entity>> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreCall::FindEntitiesByNames(names.to_vec()))?;

        Ok(state
            .entities
            .values()
            .filter(|e| names.contains(&e.name))
            .sorted_by(|a, b| {
                a.name
                    .cmp(&b.name)
                    .then_with(|| a.integration_source.cmp(&b.integration_source))
            })
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl InstanceStore for MemoryStore {
    async fn create_instance(&self, instance: NewInstance) -> Result<CreatedInstance> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreCall::CreateInstance(instance.clone()))?;
        Self::entity_for(&state, &instance.entity_id)?;

        let stored = Instance {
            instance_id: generate_id(),
            entity_id: instance.entity_id,
            created_at: storage_precision(instance.created_at),
            modified_at: Utc::now(),
            produced_by: instance.produced_by,
            metadata: instance.metadata,
        };
        let created = CreatedInstance {
            instance_id: stored.instance_id,
            created_at: stored.created_at,
        };
        state.instances.push(stored);
        Ok(created)
    }

    async fn list_instances(&self) -> Result<Vec<InstanceWithPosition>> {
        let state = self.state.lock();
        let mut rows = Vec::new();

        for instance in state.instances.iter().sorted_by_key(|i| i.created_at) {
            let entity = Self::entity_for(&state, &instance.entity_id)?;
            for position in state.positions.iter().filter(|p| {
                p.instance_id == instance.instance_id
                    && p.instance_created_at == instance.created_at
            }) {
                rows.push(InstanceWithPosition {
                    entity_id: entity.entity_id,
                    name: entity.name.clone(),
                    integration_source: entity.integration_source.clone(),
                    template: entity.template,
                    created_at: instance.created_at,
                    modified_at: instance.modified_at,
                    instance_id: instance.instance_id,
                    produced_by: instance.produced_by.clone(),
                    latitude_degrees: position.latitude_degrees,
                    longitude_degrees: position.longitude_degrees,
                    heading_degrees: position.heading_degrees,
                    altitude_hae_meters: position.altitude_hae_meters,
                    speed_mps: position.speed_mps,
                    metadata: instance.metadata.clone(),
                });
            }
        }

        Ok(rows)
    }

    async fn latest_instances(&self) -> Result<Vec<LatestInstance>> {
        let state = self.state.lock();

        state
            .instances
            .iter()
            .sorted_by(|a, b| {
                a.entity_id
                    .cmp(&b.entity_id)
                    .then(b.created_at.cmp(&a.created_at))
                    .then(b.instance_id.cmp(&a.instance_id))
            })
            .unique_by(|i| i.entity_id)
            .map(|instance| -> Result<LatestInstance> {
                let entity = Self::entity_for(&state, &instance.entity_id)?;
                Ok(LatestInstance {
                    instance_id: instance.instance_id,
                    entity_id: instance.entity_id,
                    name: entity.name.clone(),
                    integration_source: entity.integration_source.clone(),
                    produced_by: instance.produced_by.clone(),
                    created_at: instance.created_at,
                    modified_at: instance.modified_at,
                    metadata: instance.metadata.clone(),
                })
            })
            .collect()
    }

    async fn historical_instances(&self, window_seconds: i64) -> Result<Vec<HistoricalInstance>> {
        let state = self.state.lock();
        let since = Duration::try_seconds(window_seconds)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        state
            .instances
            .iter()
            .filter(|i| i.created_at >= since)
            .sorted_by(|a, b| b.created_at.cmp(&a.created_at))
            .map(|instance| -> Result<HistoricalInstance> {
                let entity = Self::entity_for(&state, &instance.entity_id)?;
                Ok(HistoricalInstance {
                    instance_id: instance.instance_id,
                    entity_id: instance.entity_id,
                    entity_name: entity.name.clone(),
                    integration_source: entity.integration_source.clone(),
                    produced_by: instance.produced_by.clone(),
                    created_at: instance.created_at,
                    modified_at: instance.modified_at,
                    metadata: instance.metadata.clone(),
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl PositionStore for MemoryStore {
    async fn create_position(&self, position: NewPosition) -> Result<()> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreCall::CreatePosition(position.clone()))?;

        let owner_exists = state.instances.iter().any(|i| {
            i.instance_id == position.instance_id && i.created_at == position.instance_created_at
        });
        if !owner_exists {
            return Err(anyhow!(
                "insert on table \"position\" violates foreign key constraint: instance ({}, {}) not present",
                position.instance_id,
                position.instance_created_at
            ));
        }

        state.positions.push(position);
        Ok(())
    }
}
