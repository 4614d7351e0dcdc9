// messages.rs
//
// Wire format for vehicle events. The tagged `VehicleEvent` is the canonical
// form on the broker and on the sockets; the flat `LocationUpdate` is the
// older shape some producers still post, and is translated on the way in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::simulation_engine::geo::Position;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VehicleEvent {
    #[serde(rename_all = "camelCase")]
    VehicleLocationUpdated {
        vehicle_id: String,
        location: Position,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    VehicleRouteChanged {
        vehicle_id: String,
        waypoints: Vec<Position>,
        route: Vec<Position>,
        timestamp: DateTime<Utc>,
    },
}

impl VehicleEvent {
    pub fn location_updated(vehicle_id: &str, location: Position) -> Self {
        VehicleEvent::VehicleLocationUpdated {
            vehicle_id: vehicle_id.to_string(),
            location,
            timestamp: Utc::now(),
        }
    }

    pub fn route_changed(vehicle_id: &str, waypoints: Vec<Position>, route: Vec<Position>) -> Self {
        VehicleEvent::VehicleRouteChanged {
            vehicle_id: vehicle_id.to_string(),
            waypoints,
            route,
            timestamp: Utc::now(),
        }
    }

    pub fn vehicle_id(&self) -> &str {
        match self {
            VehicleEvent::VehicleLocationUpdated { vehicle_id, .. }
            | VehicleEvent::VehicleRouteChanged { vehicle_id, .. } => vehicle_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            VehicleEvent::VehicleLocationUpdated { timestamp, .. }
            | VehicleEvent::VehicleRouteChanged { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_location_update(&self) -> bool {
        matches!(self, VehicleEvent::VehicleLocationUpdated { .. })
    }

    /// Legacy flat form; only location updates have one.
    pub fn to_location_update(&self) -> Option<LocationUpdate> {
        match self {
            VehicleEvent::VehicleLocationUpdated {
                vehicle_id,
                location,
                timestamp,
            } => Some(LocationUpdate {
                vehicle_id: vehicle_id.clone(),
                lat: location.lat(),
                lng: location.lng(),
                timestamp: timestamp.timestamp_millis(),
            }),
            VehicleEvent::VehicleRouteChanged { .. } => None,
        }
    }
}

/// Legacy location payload: `{ vehicleId, lat, lng, timestamp }` with the
/// timestamp in milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub vehicle_id: String,
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "longitude")]
    pub lng: f64,
    pub timestamp: i64,
}

impl TryFrom<LocationUpdate> for VehicleEvent {
    type Error = RelayError;

    fn try_from(update: LocationUpdate) -> Result<Self, Self::Error> {
        let timestamp = DateTime::from_timestamp_millis(update.timestamp)
            .ok_or(RelayError::InvalidTimestamp(update.timestamp))?;
        Ok(VehicleEvent::VehicleLocationUpdated {
            vehicle_id: update.vehicle_id,
            location: Position::new(update.lng, update.lat),
            timestamp,
        })
    }
}

pub fn encode_event(event: &VehicleEvent) -> Result<Vec<u8>, RelayError> {
    serde_json::to_vec(event).map_err(RelayError::Encode)
}

/// Parses a payload in either wire form. Legacy payloads come back as
/// `VehicleLocationUpdated`.
pub fn decode_event(payload: &[u8]) -> Result<VehicleEvent, RelayError> {
    match serde_json::from_slice::<VehicleEvent>(payload) {
        Ok(event) => Ok(event),
        Err(tagged_err) => match serde_json::from_slice::<LocationUpdate>(payload) {
            Ok(update) => VehicleEvent::try_from(update),
            Err(_) => Err(RelayError::Malformed(tagged_err)),
        },
    }
}
