use crate::model::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Geospatial fix as it appears on the wire.
///
/// Optional readings stay `None` all the way to storage; a missing heading is
/// never written as `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionPayload {
    pub latitude_degrees: f64,
    pub longitude_degrees: f64,
    #[serde(default)]
    pub heading_degrees: Option<f64>,
    #[serde(default)]
    pub altitude_hae_meters: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
}

/// Input for the create-position gateway operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPosition {
    pub instance_id: Id,
    /// The owning instance's stored `created_at`, not the client's value.
    pub instance_created_at: DateTime<Utc>,
    pub latitude_degrees: f64,
    pub longitude_degrees: f64,
    pub heading_degrees: Option<f64>,
    pub altitude_hae_meters: Option<f64>,
    pub speed_mps: Option<f64>,
}

impl NewPosition {
    pub fn for_instance(
        instance_id: Id,
        instance_created_at: DateTime<Utc>,
        payload: &PositionPayload,
    ) -> Self {
        Self {
            instance_id,
            instance_created_at,
            latitude_degrees: payload.latitude_degrees,
            longitude_degrees: payload.longitude_degrees,
            heading_degrees: payload.heading_degrees,
            altitude_hae_meters: payload.altitude_hae_meters,
            speed_mps: payload.speed_mps,
        }
    }
}

/// Position echoed back in the upsert response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedPosition {
    pub instance_id: Id,
    pub latitude_degrees: f64,
    pub longitude_degrees: f64,
    pub heading_degrees: Option<f64>,
    pub altitude_hae_meters: Option<f64>,
    pub speed_mps: Option<f64>,
}

impl From<NewPosition> for CreatedPosition {
    fn from(position: NewPosition) -> Self {
        Self {
            instance_id: position.instance_id,
            latitude_degrees: position.latitude_degrees,
            longitude_degrees: position.longitude_degrees,
            heading_degrees: position.heading_degrees,
            altitude_hae_meters: position.altitude_hae_meters,
            speed_mps: position.speed_mps,
        }
    }
}
