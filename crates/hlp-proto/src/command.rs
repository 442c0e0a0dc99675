use serde::{Deserialize, Serialize};

use crate::telemetry::{Quaternion, Vector3};

/// Velocity/attitude command, same shape as a geometry Twist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtrlModeRequest {
    pub ctrl_mode: u8,
    pub ctrl_enabled: u8,
    pub disable_onoff_stick: u8,
}

/// Echo of the direct motor command fields after the mode write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtrlModeResponse {
    pub motors: [u8; 4],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPose {
    pub position: GeoPoint,
    pub orientation: Quaternion,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaypointGoal {
    pub geo_pose: GeoPose,
    /// m/s
    pub max_speed: f64,
    /// seconds to hold the position once reached
    pub timeout: f64,
    /// metres
    pub position_accuracy: f64,
    pub command: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WaypointFeedback {
    pub geo_pose: GeoPose,
    pub distance: f64,
    pub status: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WaypointResult {
    pub geo_pose: GeoPose,
    pub status: u16,
}

/// Outcome of a waypoint goal. Discriminants are part of the external
/// interface and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ActionOutcome {
    Succeeded = 0,
    Running = 1,
    Preempted = 2,
    Aborted = 3,
    OutOfGeofence = 4,
    Valid = 5,
    WrongFlightMode = 6,
    WrongCtrlMode = 7,
    NotReady = 8,
}

impl ActionOutcome {
    /// RUNNING and VALID are the only non-final outcomes.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionOutcome::Running | ActionOutcome::Valid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceRequest {
    /// (latitude, longitude) pairs in degrees
    pub points: Vec<[f64; 2]>,
}

/// Commands accepted from the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    CmdVel(Twist),
    CtrlMode(CtrlModeRequest),
    Goal(WaypointGoal),
    Cancel,
    Geofence(GeofenceRequest),
}
