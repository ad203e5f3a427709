use log::{debug, info, warn};
use thiserror::Error;

use crate::model::{
    normalize_timestamp, CreateEntityRequest, CreateEntityResponse, CreatedInstance,
    CreatedPosition, Entity, EntityKey, Id, InstancePayload, NewEntity, NewInstance, NewPosition,
};
use crate::store::traits::Store;

/// Classified failure of the upsert workflow.
#[derive(Debug, Error)]
pub enum UpsertError {
    /// A value the store rejected during entity creation. Nothing was
    /// written by the failing step.
    #[error("invalid {field}: {message}")]
    InvalidRequest { field: &'static str, message: String },

    /// The entity exists and the request carried no creation timestamp.
    #[error("entity '{name}' from '{integration_source}' already exists and no instance creation timestamp was provided")]
    Conflict {
        name: String,
        integration_source: String,
    },

    /// A store call other than entity creation failed.
    #[error("{operation} failed: {message}")]
    Persistence {
        operation: &'static str,
        message: String,
    },
}

impl UpsertError {
    fn persistence(operation: &'static str, err: anyhow::Error) -> Self {
        UpsertError::Persistence {
            operation,
            message: format!("{:#}", err),
        }
    }
}

/// Entity/instance/position upsert.
///
/// Steps run strictly in order and each outcome gates the next:
/// identity resolution, instance creation (only with a timestamp), position
/// attachment (only with an instance and a position payload). Writes are not
/// transactional; an entity created in step one stays if a later step fails.
pub struct UpsertWorkflow;

impl UpsertWorkflow {
    pub async fn process_entity_upsert<S: Store + ?Sized>(
        store: &S,
        request: CreateEntityRequest,
    ) -> Result<CreateEntityResponse, UpsertError> {
        let entity = Self::resolve_entity(store, &request).await?;

        let created_instance = match request.created_at {
            Some(created_at) => {
                let (produced_by, metadata) = Self::instance_fields(request.instance.as_ref());
                let instance = NewInstance {
                    entity_id: entity.entity_id,
                    created_at: normalize_timestamp(&created_at),
                    produced_by,
                    metadata,
                };
                Some(Self::create_instance(store, instance).await?)
            }
            None => None,
        };

        let created_position = match (&created_instance, &request.position) {
            (Some(instance), Some(payload)) => {
                let position =
                    NewPosition::for_instance(instance.instance_id, instance.created_at, payload);
                Some(Self::attach_position(store, position).await?)
            }
            (None, Some(_)) => {
                // No instance, so the fix has no owner.
                warn!(
                    "Dropping position for entity {}: no creation timestamp, so no instance was created",
                    entity.entity_id
                );
                None
            }
            _ => None,
        };

        let mut response = CreateEntityResponse::for_entity(entity);
        if let Some(instance) = created_instance {
            response.instance_id = Some(instance.instance_id);
            response.created_at = Some(instance.created_at);
        }
        response.position = created_position;

        Ok(response)
    }

    async fn resolve_entity<S: Store + ?Sized>(
        store: &S,
        request: &CreateEntityRequest,
    ) -> Result<Entity, UpsertError> {
        let key = EntityKey::new(&request.name, &request.integration_source);

        let existing = store
            .find_entity(key)
            .await
            .map_err(|e| UpsertError::persistence("find-entity", e))?;

        if let Some(entity) = existing {
            if request.created_at.is_none() {
                info!("Entity {} exists and request has no timestamp", key);
                return Err(UpsertError::Conflict {
                    name: request.name.clone(),
                    integration_source: request.integration_source.clone(),
                });
            }
            debug!("Reusing entity {} for {}", entity.entity_id, key);
            return Ok(entity);
        }

        let new_entity = NewEntity {
            name: request.name.clone(),
            description: request.description.clone(),
            integration_source: request.integration_source.clone(),
            template: request.template,
        };
        store
            .create_entity(new_entity)
            .await
            .map_err(|e| UpsertError::InvalidRequest {
                field: "entity",
                message: format!("{:#}", e),
            })?;

        // Read back through the identity key so server-side defaults are reflected.
        let entity = store
            .find_entity(key)
            .await
            .map_err(|e| UpsertError::persistence("find-entity", e))?
            .ok_or_else(|| UpsertError::Persistence {
                operation: "find-entity",
                message: format!("entity {} not visible after creation", key),
            })?;

        info!("Created entity {} for {}", entity.entity_id, key);
        Ok(entity)
    }

    /// Producer label and metadata for a new instance. A timestamp without an
    /// `instance` object yields a bare instance; a JSON `null` document is
    /// stored as absent.
    fn instance_fields(
        payload: Option<&InstancePayload>,
    ) -> (Option<String>, Option<serde_json::Value>) {
        let Some(payload) = payload else {
            return (None, None);
        };

        let metadata = payload
            .metadata
            .clone()
            .filter(|doc| !doc.is_null());

        (payload.produced_by.clone(), metadata)
    }

    async fn create_instance<S: Store + ?Sized>(
        store: &S,
        instance: NewInstance,
    ) -> Result<CreatedInstance, UpsertError> {
        let submitted = instance.created_at;
        debug!("Instance created_at before store: {}", submitted.to_rfc3339());

        let created = store
            .create_instance(instance)
            .await
            .map_err(|e| UpsertError::persistence("create-instance", e))?;

        if created.created_at != submitted {
            debug!(
                "Store returned created_at {} for submitted {}",
                created.created_at.to_rfc3339(),
                submitted.to_rfc3339()
            );
        }
        info!("Created instance {}", created.instance_id);
        Ok(created)
    }

    async fn attach_position<S: Store + ?Sized>(
        store: &S,
        position: NewPosition,
    ) -> Result<CreatedPosition, UpsertError> {
        let instance_id: Id = position.instance_id;
        store
            .create_position(position.clone())
            .await
            .map_err(|e| UpsertError::persistence("create-position", e))?;

        debug!("Attached position to instance {}", instance_id);
        Ok(position.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{generate_id, HistoricalInstance, InstanceWithPosition, LatestInstance, PositionPayload};
    use crate::store::memory::{MemoryStore, StoreCall, StoreOperation};
    use crate::store::traits::{EntityStore, InstanceStore, PositionStore};
    use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
    use parking_lot::Mutex;

    /// Gateway with canned answers. The instance timestamp it returns is
    /// shifted from the submitted one so correlation can be checked.
    struct ScriptedStore {
        entity: Mutex<Option<Entity>>,
        instance_id: Id,
        instance_skew: Duration,
        reject_entity: bool,
        calls: Mutex<Vec<StoreCall>>,
    }

    impl ScriptedStore {
        fn empty() -> Self {
            Self {
                entity: Mutex::new(None),
                instance_id: generate_id(),
                instance_skew: Duration::milliseconds(250),
                reject_entity: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_entity(entity: Entity) -> Self {
            let store = Self::empty();
            *store.entity.lock() = Some(entity);
            store
        }

        fn calls(&self) -> Vec<StoreCall> {
            self.calls.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl EntityStore for ScriptedStore {
        async fn find_entity(&self, key: EntityKey<'_>) -> anyhow::Result<Option<Entity>> {
            self.calls.lock().push(StoreCall::FindEntity {
                name: key.name.to_string(),
                integration_source: key.integration_source.to_string(),
            });
            Ok(self.entity.lock().clone().filter(|e| e.key() == key))
        }

        async fn create_entity(&self, entity: NewEntity) -> anyhow::Result<Entity> {
            self.calls.lock().push(StoreCall::CreateEntity(entity.clone()));
            if self.reject_entity {
                anyhow::bail!("violates check constraint");
            }
            let created = entity.into_entity(generate_id());
            *self.entity.lock() = Some(created.clone());
            Ok(created)
        }

        async fn get_entity(&self, entity_id: Id) -> anyhow::Result<Option<Entity>> {
            Ok(self.entity.lock().clone().filter(|e| e.entity_id == entity_id))
        }

        async fn list_entities(&self, _limit: u32, _offset: u32) -> anyhow::Result<Vec<Entity>> {
            Ok(self.entity.lock().iter().cloned().collect())
        }

        async fn entities_by_names(&self, names: &[String]) -> anyhow::Result<Vec<Entity>> {
            Ok(self
                .entity
                .lock()
                .iter()
                .filter(|e| names.contains(&e.name))
                .cloned()
                .collect())
        }
    }

    #[async_trait::async_trait]
    impl InstanceStore for ScriptedStore {
        async fn create_instance(&self, instance: NewInstance) -> anyhow::Result<CreatedInstance> {
            let created_at = instance.created_at + self.instance_skew;
            self.calls.lock().push(StoreCall::CreateInstance(instance));
            Ok(CreatedInstance {
                instance_id: self.instance_id,
                created_at,
            })
        }

        async fn list_instances(&self) -> anyhow::Result<Vec<InstanceWithPosition>> {
            Ok(Vec::new())
        }

        async fn latest_instances(&self) -> anyhow::Result<Vec<LatestInstance>> {
            Ok(Vec::new())
        }

        async fn historical_instances(&self, _window_seconds: i64) -> anyhow::Result<Vec<HistoricalInstance>> {
            Ok(Vec::new())
        }
    }

    #[async_trait::async_trait]
    impl PositionStore for ScriptedStore {
        async fn create_position(&self, position: NewPosition) -> anyhow::Result<()> {
            self.calls.lock().push(StoreCall::CreatePosition(position));
            Ok(())
        }
    }

    fn submitted_at() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 7, 4, 9, 15, 30)
            .unwrap()
            + Duration::milliseconds(640)
    }

    fn full_position() -> PositionPayload {
        PositionPayload {
            latitude_degrees: 37.7749,
            longitude_degrees: -122.4194,
            heading_degrees: Some(90.0),
            altitude_hae_meters: Some(100.0),
            speed_mps: Some(10.0),
        }
    }

    fn existing_entity(name: &str) -> Entity {
        Entity {
            entity_id: generate_id(),
            name: name.to_string(),
            description: "mole generated entity".to_string(),
            integration_source: "mole".to_string(),
            template: 1,
        }
    }

    #[tokio::test]
    async fn test_full_record_against_empty_store() {
        let store = ScriptedStore::empty();
        let request = CreateEntityRequest::new("charlie", "d", "mole", 2)
            .with_created_at(submitted_at())
            .with_position(full_position());

        let response = UpsertWorkflow::process_entity_upsert(&store, request)
            .await
            .unwrap();

        let calls = store.calls();
        let operations: Vec<_> = calls.iter().map(|c| c.operation()).collect();
        assert_eq!(
            operations,
            vec![
                StoreOperation::FindEntity,
                StoreOperation::CreateEntity,
                StoreOperation::FindEntity,
                StoreOperation::CreateInstance,
                StoreOperation::CreatePosition,
            ]
        );

        let normalized = Utc.with_ymd_and_hms(2024, 7, 4, 14, 15, 30).unwrap();
        let server_time = normalized + Duration::milliseconds(250);

        let StoreCall::CreateInstance(instance) = &calls[3] else {
            panic!("expected instance insert, got {:?}", calls[3]);
        };
        assert_eq!(instance.entity_id, response.entity_id);
        assert_eq!(instance.created_at, normalized);
        assert_eq!(instance.produced_by, None);
        assert_eq!(instance.metadata, None);

        let StoreCall::CreatePosition(position) = &calls[4] else {
            panic!("expected position insert, got {:?}", calls[4]);
        };
        assert_eq!(position.instance_id, store.instance_id);
        assert_eq!(position.instance_created_at, server_time);
        assert_eq!(position.heading_degrees, Some(90.0));

        assert_eq!(response.name, "charlie");
        assert_eq!(response.template, 2);
        assert_eq!(response.instance_id, Some(store.instance_id));
        assert_eq!(response.created_at, Some(server_time));
        let echoed = response.position.unwrap();
        assert_eq!(echoed.instance_id, store.instance_id);
        assert_eq!(echoed.latitude_degrees, 37.7749);
        assert_eq!(echoed.longitude_degrees, -122.4194);
        assert_eq!(echoed.altitude_hae_meters, Some(100.0));
        assert_eq!(echoed.speed_mps, Some(10.0));
    }

    #[tokio::test]
    async fn test_existing_entity_without_timestamp_conflicts() {
        let store = ScriptedStore::with_entity(existing_entity("detection"));
        let request = CreateEntityRequest::new("detection", "d", "mole", 1)
            .with_position(full_position());

        let err = UpsertWorkflow::process_entity_upsert(&store, request)
            .await
            .unwrap_err();

        assert!(matches!(err, UpsertError::Conflict { .. }));
        assert_eq!(store.calls().len(), 1);
        assert!(store.calls().iter().all(|c| !c.is_write()));
    }

    #[tokio::test]
    async fn test_existing_entity_with_timestamp_is_reused() {
        let entity = existing_entity("detection");
        let store = ScriptedStore::with_entity(entity.clone());
        let request =
            CreateEntityRequest::new("detection", "d", "mole", 1).with_created_at(submitted_at());

        let response = UpsertWorkflow::process_entity_upsert(&store, request)
            .await
            .unwrap();

        assert_eq!(response.entity_id, entity.entity_id);
        assert_eq!(response.instance_id, Some(store.instance_id));
        assert!(response.position.is_none());
        assert!(!store
            .calls()
            .iter()
            .any(|c| c.operation() == StoreOperation::CreateEntity));
    }

    #[tokio::test]
    async fn test_instance_payload_is_carried() {
        let store = ScriptedStore::empty();
        let request = CreateEntityRequest::new("radar", "d", "mole", 1)
            .with_created_at(submitted_at())
            .with_instance(InstancePayload {
                produced_by: Some("sensor-7".to_string()),
                metadata: Some(serde_json::json!({"confidence": 0.9})),
            });

        UpsertWorkflow::process_entity_upsert(&store, request)
            .await
            .unwrap();

        let instance = store
            .calls()
            .into_iter()
            .find_map(|c| match c {
                StoreCall::CreateInstance(instance) => Some(instance),
                _ => None,
            })
            .unwrap();
        assert_eq!(instance.produced_by.as_deref(), Some("sensor-7"));
        assert_eq!(instance.metadata, Some(serde_json::json!({"confidence": 0.9})));
    }

    #[tokio::test]
    async fn test_scalar_metadata_is_stored_as_given() {
        let store = MemoryStore::new();
        let request = CreateEntityRequest::new("radar", "d", "mole", 1)
            .with_created_at(submitted_at())
            .with_instance(InstancePayload {
                produced_by: None,
                metadata: Some(serde_json::json!(42)),
            });

        let response = UpsertWorkflow::process_entity_upsert(&store, request)
            .await
            .unwrap();

        assert!(response.instance_id.is_some());
        let instances = store.instances();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].metadata, Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn test_null_metadata_and_empty_producer() {
        let store = ScriptedStore::empty();
        let request = CreateEntityRequest::new("radar", "d", "mole", 1)
            .with_created_at(submitted_at())
            .with_instance(InstancePayload {
                produced_by: Some(String::new()),
                metadata: Some(serde_json::Value::Null),
            });

        UpsertWorkflow::process_entity_upsert(&store, request)
            .await
            .unwrap();

        let instance = store
            .calls()
            .into_iter()
            .find_map(|c| match c {
                StoreCall::CreateInstance(instance) => Some(instance),
                _ => None,
            })
            .unwrap();
        assert_eq!(instance.metadata, None);
        assert_eq!(instance.produced_by, Some(String::new()));
    }

    #[tokio::test]
    async fn test_position_without_timestamp_is_dropped() {
        let store = MemoryStore::new();
        let request =
            CreateEntityRequest::new("charlie", "d", "mole", 2).with_position(full_position());

        let response = UpsertWorkflow::process_entity_upsert(&store, request)
            .await
            .unwrap();

        assert!(response.instance_id.is_none());
        assert!(response.created_at.is_none());
        assert!(response.position.is_none());
        assert_eq!(store.entities().len(), 1);
        assert!(store.instances().is_empty());
        assert!(store.positions().is_empty());
    }

    #[tokio::test]
    async fn test_created_entity_is_resolved_by_identity() {
        let store = MemoryStore::new();
        let request = CreateEntityRequest::new("charlie", "d", "mole", 2);

        let response = UpsertWorkflow::process_entity_upsert(&store, request)
            .await
            .unwrap();

        let found = store
            .find_entity(EntityKey::new("charlie", "mole"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.entity_id, response.entity_id);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_template_is_client_error() {
        let store = MemoryStore::new();
        let request = CreateEntityRequest::new("charlie", "d", "mole", 4)
            .with_created_at(submitted_at())
            .with_position(full_position());

        let err = UpsertWorkflow::process_entity_upsert(&store, request)
            .await
            .unwrap_err();

        match err {
            UpsertError::InvalidRequest { field, message } => {
                assert_eq!(field, "entity");
                assert!(message.contains("check constraint"));
            }
            other => panic!("expected invalid request, got {:?}", other),
        }
        assert!(store.entities().is_empty());
        assert!(store.instances().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_rejection_stops_after_create_entity() {
        let mut store = ScriptedStore::empty();
        store.reject_entity = true;
        let request =
            CreateEntityRequest::new("charlie", "d", "mole", 9).with_created_at(submitted_at());

        let err = UpsertWorkflow::process_entity_upsert(&store, request)
            .await
            .unwrap_err();

        assert!(matches!(err, UpsertError::InvalidRequest { .. }));
        assert_eq!(store.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_instance_failure_keeps_entity() {
        let store = MemoryStore::new();
        store.fail_on(StoreOperation::CreateInstance);
        let request = CreateEntityRequest::new("charlie", "d", "mole", 2)
            .with_created_at(submitted_at())
            .with_position(full_position());

        let err = UpsertWorkflow::process_entity_upsert(&store, request)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UpsertError::Persistence {
                operation: "create-instance",
                ..
            }
        ));
        assert_eq!(store.entities().len(), 1);
        assert!(store
            .calls()
            .iter()
            .all(|c| c.operation() != StoreOperation::CreatePosition));
    }

    #[tokio::test]
    async fn test_position_failure_is_server_error() {
        let store = MemoryStore::new();
        store.fail_on(StoreOperation::CreatePosition);
        let request = CreateEntityRequest::new("charlie", "d", "mole", 2)
            .with_created_at(submitted_at())
            .with_position(full_position());

        let err = UpsertWorkflow::process_entity_upsert(&store, request)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UpsertError::Persistence {
                operation: "create-position",
                ..
            }
        ));
        assert_eq!(store.instances().len(), 1);
        assert!(store.positions().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_server_error() {
        let store = MemoryStore::new();
        store.fail_on(StoreOperation::FindEntity);

        let err = UpsertWorkflow::process_entity_upsert(
            &store,
            CreateEntityRequest::new("charlie", "d", "mole", 2),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, UpsertError::Persistence { .. }));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_repeat_request_with_timestamp_adds_instances() {
        let store = MemoryStore::new();
        let first = CreateEntityRequest::new("charlie", "d", "mole", 2)
            .with_created_at(submitted_at())
            .with_position(full_position());
        let second = first.clone().with_created_at(submitted_at() + Duration::seconds(5));

        let a = UpsertWorkflow::process_entity_upsert(&store, first).await.unwrap();
        let b = UpsertWorkflow::process_entity_upsert(&store, second).await.unwrap();

        assert_eq!(a.entity_id, b.entity_id);
        assert_ne!(a.instance_id, b.instance_id);
        assert_eq!(store.entities().len(), 1);
        assert_eq!(store.instances().len(), 2);

        let positions = store.positions();
        assert_eq!(positions.len(), 2);
        for (position, response) in positions.iter().zip([&a, &b]) {
            assert_eq!(Some(position.instance_id), response.instance_id);
            assert_eq!(Some(position.instance_created_at), response.created_at);
        }
    }
}
