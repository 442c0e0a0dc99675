use serde::{Deserialize, Serialize};

use crate::command::{ActionOutcome, WaypointFeedback, WaypointResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

impl Quaternion {
    /// ZYX (yaw, pitch, roll) composition, angles in radians.
    pub fn from_rpy(roll: f64, pitch: f64, yaw: f64) -> Self {
        let (sr, cr) = (roll / 2.0).sin_cos();
        let (sp, cp) = (pitch / 2.0).sin_cos();
        let (sy, cy) = (yaw / 2.0).sin_cos();
        Self {
            w: cr * cp * cy + sr * sp * sy,
            x: sr * cp * cy - cr * sp * sy,
            y: cr * sp * cy + sr * cp * sy,
            z: cr * cp * sy - sr * sp * cy,
        }
    }

    /// Inverse of `from_rpy`. Non-normalised input is normalised first.
    pub fn to_rpy(&self) -> (f64, f64, f64) {
        let n = (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt();
        let (x, y, z, w) = if n > 0.0 {
            (self.x / n, self.y / n, self.z / n, self.w / n)
        } else {
            (0.0, 0.0, 0.0, 1.0)
        };
        let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        let sinp = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0);
        let pitch = sinp.asin();
        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
        (roll, pitch, yaw)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub seq: u32,
    pub stamp_unix_ms: i64,
    pub frame_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Imu,
    ImuCustom,
    Mag,
    Gps,
    GpsCustom,
    RcData,
    Status,
    MotorSpeed,
    Laser,
    Announce,
    WaypointFeedback,
    WaypointResult,
}

impl Topic {
    pub const ALL: [Topic; 12] = [
        Topic::Imu,
        Topic::ImuCustom,
        Topic::Mag,
        Topic::Gps,
        Topic::GpsCustom,
        Topic::RcData,
        Topic::Status,
        Topic::MotorSpeed,
        Topic::Laser,
        Topic::Announce,
        Topic::WaypointFeedback,
        Topic::WaypointResult,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Topic::Imu => "imu",
            Topic::ImuCustom => "imu_custom",
            Topic::Mag => "mag",
            Topic::Gps => "gps",
            Topic::GpsCustom => "gps_custom",
            Topic::RcData => "rcdata",
            Topic::Status => "status",
            Topic::MotorSpeed => "motor_speed",
            Topic::Laser => "laser",
            Topic::Announce => "announce",
            Topic::WaypointFeedback => "waypoint/feedback",
            Topic::WaypointResult => "waypoint/result",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Imu {
    pub header: Header,
    pub orientation: Quaternion,
    pub angular_velocity: Vector3,
    pub angular_velocity_covariance: [f64; 9],
    pub linear_acceleration: Vector3,
    pub linear_acceleration_covariance: [f64; 9],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuCustom {
    pub header: Header,
    pub acceleration: Vector3,
    pub angular_velocity: Vector3,
    pub height: f64,
    pub differential_height: f64,
    pub orientation: Quaternion,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MagneticField {
    pub header: Header,
    pub vector: Vector3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    #[default]
    NoFix,
    Fix,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavSatFix {
    pub header: Header,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub position_covariance: [f64; 9],
    pub covariance_approximated: bool,
    pub status: FixStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsCustom {
    pub header: Header,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub position_covariance: [f64; 9],
    pub covariance_approximated: bool,
    pub velocity_x: f64,
    pub velocity_y: f64,
    pub velocity_covariance: [f64; 4],
    pub pressure_height: f64,
    pub status: FixStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RcData {
    pub header: Header,
    pub channel: [u16; 8],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HlpStatus {
    pub header: Header,
    pub uav_status: u16,
    pub flight_mode: String,
    pub flight_time: f32,
    pub battery_voltage: f32,
    pub cpu_load: f32,
    pub up_time: f32,
    pub serial_interface_enabled: bool,
    pub serial_interface_active: bool,
    pub motor_status: String,
    pub gps_status: String,
    pub gps_num_satellites: u32,
    pub ctrl_mode: u8,
    pub ctrl_enabled: u8,
    pub disable_motor_onoff_by_stick: u8,
    pub waypt_status: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorSpeed {
    pub header: Header,
    pub motor_speed: [u8; 4],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaserRange {
    pub header: Header,
    pub laser_measurement: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointReport {
    pub outcome: ActionOutcome,
    pub result: WaypointResult,
}

/// Everything the bridge hands to the message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "msg", rename_all = "snake_case")]
pub enum Outbound {
    Imu(Imu),
    ImuCustom(ImuCustom),
    Mag(MagneticField),
    Gps(NavSatFix),
    GpsCustom(GpsCustom),
    RcData(RcData),
    Status(HlpStatus),
    MotorSpeed(MotorSpeed),
    Laser(LaserRange),
    Announce(Announcement),
    WaypointFeedback(WaypointFeedback),
    WaypointResult(WaypointReport),
}

impl Outbound {
    pub fn topic(&self) -> Topic {
        match self {
            Outbound::Imu(_) => Topic::Imu,
            Outbound::ImuCustom(_) => Topic::ImuCustom,
            Outbound::Mag(_) => Topic::Mag,
            Outbound::Gps(_) => Topic::Gps,
            Outbound::GpsCustom(_) => Topic::GpsCustom,
            Outbound::RcData(_) => Topic::RcData,
            Outbound::Status(_) => Topic::Status,
            Outbound::MotorSpeed(_) => Topic::MotorSpeed,
            Outbound::Laser(_) => Topic::Laser,
            Outbound::Announce(_) => Topic::Announce,
            Outbound::WaypointFeedback(_) => Topic::WaypointFeedback,
            Outbound::WaypointResult(_) => Topic::WaypointResult,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpy_survives_quaternion_conversion() {
        let q = Quaternion::from_rpy(0.1, -0.2, 2.5);
        let (r, p, y) = q.to_rpy();
        assert!((r - 0.1).abs() < 1e-9);
        assert!((p + 0.2).abs() < 1e-9);
        assert!((y - 2.5).abs() < 1e-9);
    }

    #[test]
    fn default_quaternion_is_identity() {
        assert_eq!(Quaternion::default().to_rpy(), (0.0, 0.0, 0.0));
    }

    #[test]
    fn outbound_is_tagged_by_topic() {
        let msg = Outbound::Announce(Announcement { text: "Control mode is enabled".into() });
        assert_eq!(msg.topic(), Topic::Announce);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"topic\":\"announce\""));
    }
}
