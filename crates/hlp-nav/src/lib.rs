pub mod doctor;
pub mod geofence;

pub use geofence::{GeofenceError, GeofenceGuard, Point, Polygon};
