use crate::model::{CreatedPosition, Entity, Id, InstancePayload, PositionPayload};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Inbound request for the entity upsert workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEntityRequest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub integration_source: String,
    pub template: i32,
    /// Creation time of the observation. Without it no instance is written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstancePayload>,
}

impl CreateEntityRequest {
    pub fn new(name: &str, description: &str, integration_source: &str, template: i32) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            integration_source: integration_source.to_string(),
            template,
            created_at: None,
            position: None,
            instance: None,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<FixedOffset>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_position(mut self, position: PositionPayload) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_instance(mut self, instance: InstancePayload) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Required-field checks that belong to the request boundary.
    pub fn validate_required(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Field 'name' is required".to_string());
        }
        if self.description.is_empty() {
            return Err("Field 'description' is required".to_string());
        }
        if self.template == 0 {
            return Err("Field 'template' is required".to_string());
        }
        Ok(())
    }
}

/// Result of the upsert workflow.
///
/// Fields for skipped steps are omitted: a response with only entity fields
/// means the entity was created and nothing else happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEntityResponse {
    pub entity_id: Id,
    pub name: String,
    pub description: String,
    pub integration_source: String,
    pub template: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<CreatedPosition>,
}

impl CreateEntityResponse {
    pub fn for_entity(entity: Entity) -> Self {
        Self {
            entity_id: entity.entity_id,
            name: entity.name,
            description: entity.description,
            integration_source: entity.integration_source,
            template: entity.template,
            instance_id: None,
            created_at: None,
            position: None,
        }
    }
}
