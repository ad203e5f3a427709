use crate::model::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped observation of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: Id,
    pub entity_id: Id,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub produced_by: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Input for the create-instance gateway operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInstance {
    pub entity_id: Id,
    /// Already normalized to UTC whole seconds.
    pub created_at: DateTime<Utc>,
    pub produced_by: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// What the store hands back after inserting an instance. `created_at` is the
/// stored value and is the correlation key for any position written after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedInstance {
    pub instance_id: Id,
    pub created_at: DateTime<Utc>,
}

/// Optional `instance` sub-object of an upsert request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstancePayload {
    #[serde(default)]
    pub produced_by: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Row of the list-instances read: entity, instance and position joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceWithPosition {
    pub entity_id: Id,
    pub name: String,
    pub integration_source: String,
    pub template: i32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub instance_id: Id,
    pub produced_by: Option<String>,
    pub latitude_degrees: f64,
    pub longitude_degrees: f64,
    pub heading_degrees: Option<f64>,
    pub altitude_hae_meters: Option<f64>,
    pub speed_mps: Option<f64>,
    pub metadata: Option<serde_json::Value>,
}

/// Most recent instance of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestInstance {
    pub instance_id: Id,
    pub entity_id: Id,
    pub name: String,
    pub integration_source: String,
    pub produced_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Instance created inside a recent time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalInstance {
    pub instance_id: Id,
    pub entity_id: Id,
    pub entity_name: String,
    pub integration_source: String,
    pub produced_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}
