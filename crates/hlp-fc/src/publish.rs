use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hlp_proto::{
    FixStatus, GpsCustom, Header, HlpStatus, Imu, ImuCustom, LaserRange, MagneticField, MotorSpeed, NavSatFix,
    Outbound, Quaternion, RcData, Topic, Vector3,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::link::TelemetryGroup;
use crate::state::{SharedVehicleState, StopToken, Telemetry, SERIAL_INTERFACE_ACTIVE, SERIAL_INTERFACE_ENABLED};
use crate::units;

/// Outbound side of the publish/subscribe transport.
pub trait MessageBus: Send + Sync {
    fn has_consumers(&self, topic: Topic) -> bool;

    fn publish(&self, msg: Outbound);
}

fn default_imu_mag_hz() -> u16 {
    50
}
fn default_gps_hz() -> u16 {
    5
}
fn default_status_hz() -> u16 {
    10
}
fn default_aux_hz() -> u16 {
    50
}
fn default_frame_id() -> String {
    "fcu".into()
}
fn default_stddev_angvel() -> f64 {
    0.013
}
fn default_stddev_acc() -> f64 {
    0.083
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_imu_mag_hz")]
    pub imu_mag_hz: u16,
    #[serde(default = "default_gps_hz")]
    pub gps_hz: u16,
    #[serde(default = "default_status_hz")]
    pub status_hz: u16,
    #[serde(default = "default_aux_hz")]
    pub aux_hz: u16,
    #[serde(default = "default_frame_id")]
    pub frame_id: String,
    #[serde(default = "default_stddev_angvel")]
    pub stddev_angular_velocity: f64,
    #[serde(default = "default_stddev_acc")]
    pub stddev_linear_acceleration: f64,
    /// Announce control mode changes on the announcement topic.
    #[serde(default = "default_true")]
    pub externalise_state: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            imu_mag_hz: default_imu_mag_hz(),
            gps_hz: default_gps_hz(),
            status_hz: default_status_hz(),
            aux_hz: default_aux_hz(),
            frame_id: default_frame_id(),
            stddev_angular_velocity: default_stddev_angvel(),
            stddev_linear_acceleration: default_stddev_acc(),
            externalise_state: true,
        }
    }
}

impl PublishConfig {
    pub fn rates(&self) -> crate::link::GroupRates {
        crate::link::GroupRates {
            status_hz: self.status_hz,
            gps_hz: self.gps_hz,
            imu_mag_hz: self.imu_mag_hz,
            aux_hz: self.aux_hz,
        }
    }
}

fn now_unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Per-topic sequence counter and header builder.
#[derive(Debug)]
struct Stamp {
    frame_id: String,
    seq: u32,
}

impl Stamp {
    fn new(frame_id: &str) -> Self {
        Self { frame_id: frame_id.to_string(), seq: 0 }
    }

    fn next(&mut self, stamp_unix_ms: i64) -> Header {
        let h = Header { seq: self.seq, stamp_unix_ms, frame_id: self.frame_id.clone() };
        self.seq = self.seq.wrapping_add(1);
        h
    }
}

/// One telemetry group: owns its topics and their sequence counters.
pub trait GroupPublisher: Send {
    fn group(&self) -> TelemetryGroup;

    fn topics(&self) -> &'static [Topic];

    /// Emit this group's messages for every topic that has a consumer.
    fn publish(&mut self, t: &Telemetry, bus: &dyn MessageBus, stamp_unix_ms: i64);
}

pub struct ImuMagPublisher {
    imu: Stamp,
    imu_custom: Stamp,
    mag: Stamp,
    angvel_variance: f64,
    acc_variance: f64,
}

impl ImuMagPublisher {
    pub fn new(cfg: &PublishConfig) -> Self {
        Self {
            imu: Stamp::new(&cfg.frame_id),
            imu_custom: Stamp::new(&cfg.frame_id),
            mag: Stamp::new(&cfg.frame_id),
            angvel_variance: cfg.stddev_angular_velocity * cfg.stddev_angular_velocity,
            acc_variance: cfg.stddev_linear_acceleration * cfg.stddev_linear_acceleration,
        }
    }
}

fn orientation(t: &Telemetry) -> Quaternion {
    Quaternion::from_rpy(
        units::attitude_to_rad(t.angle_roll as f64),
        units::attitude_to_rad(t.angle_pitch as f64),
        units::yaw_to_rad(t.angle_yaw),
    )
}

fn acceleration(t: &Telemetry) -> Vector3 {
    Vector3::new(units::acc_to_mps2(t.acc_x), units::acc_to_mps2(t.acc_y), units::acc_to_mps2(t.acc_z))
}

fn angular_velocity(t: &Telemetry) -> Vector3 {
    Vector3::new(
        units::angvel_to_rad_s(t.angvel_roll),
        units::angvel_to_rad_s(t.angvel_pitch),
        units::angvel_to_rad_s(t.angvel_yaw),
    )
}

impl GroupPublisher for ImuMagPublisher {
    fn group(&self) -> TelemetryGroup {
        TelemetryGroup::ImuMag
    }

    fn topics(&self) -> &'static [Topic] {
        &[Topic::Imu, Topic::ImuCustom, Topic::Mag]
    }

    fn publish(&mut self, t: &Telemetry, bus: &dyn MessageBus, stamp: i64) {
        let q = orientation(t);

        if bus.has_consumers(Topic::Imu) {
            bus.publish(Outbound::Imu(Imu {
                header: self.imu.next(stamp),
                orientation: q,
                angular_velocity: angular_velocity(t),
                angular_velocity_covariance: units::diagonal3(
                    self.angvel_variance,
                    self.angvel_variance,
                    self.angvel_variance,
                ),
                linear_acceleration: acceleration(t),
                linear_acceleration_covariance: units::diagonal3(
                    self.acc_variance,
                    self.acc_variance,
                    self.acc_variance,
                ),
            }));
        }
        if bus.has_consumers(Topic::ImuCustom) {
            bus.publish(Outbound::ImuCustom(ImuCustom {
                header: self.imu_custom.next(stamp),
                acceleration: acceleration(t),
                angular_velocity: angular_velocity(t),
                height: units::milli(t.fusion_height as f64),
                differential_height: units::milli(t.fusion_dheight as f64),
                orientation: q,
            }));
        }
        if bus.has_consumers(Topic::Mag) {
            bus.publish(Outbound::Mag(MagneticField {
                header: self.mag.next(stamp),
                vector: Vector3::new(t.hx as f64, t.hy as f64, t.hz as f64),
            }));
        }
    }
}

pub struct GpsPublisher {
    gps: Stamp,
    gps_custom: Stamp,
}

impl GpsPublisher {
    pub fn new(cfg: &PublishConfig) -> Self {
        Self { gps: Stamp::new(&cfg.frame_id), gps_custom: Stamp::new(&cfg.frame_id) }
    }
}

impl GroupPublisher for GpsPublisher {
    fn group(&self) -> TelemetryGroup {
        TelemetryGroup::Gps
    }

    fn topics(&self) -> &'static [Topic] {
        &[Topic::Gps, Topic::GpsCustom]
    }

    fn publish(&mut self, t: &Telemetry, bus: &dyn MessageBus, stamp: i64) {
        let var_h = units::accuracy_variance(t.gps_position_accuracy);
        let var_v = units::accuracy_variance(t.gps_height_accuracy);
        let covariance = units::diagonal3(var_h, var_h, var_v);
        let status = if t.gps_fix() { FixStatus::Fix } else { FixStatus::NoFix };

        if bus.has_consumers(Topic::Gps) {
            bus.publish(Outbound::Gps(NavSatFix {
                header: self.gps.next(stamp),
                latitude: units::e7_to_deg(t.gps_latitude),
                longitude: units::e7_to_deg(t.gps_longitude),
                altitude: units::milli(t.gps_height as f64),
                position_covariance: covariance,
                covariance_approximated: true,
                status,
            }));
        }
        if bus.has_consumers(Topic::GpsCustom) {
            let var_vel = units::accuracy_variance(t.gps_speed_accuracy);
            bus.publish(Outbound::GpsCustom(GpsCustom {
                header: self.gps_custom.next(stamp),
                latitude: units::e7_to_deg(t.fusion_latitude),
                longitude: units::e7_to_deg(t.fusion_longitude),
                altitude: units::milli(t.gps_height as f64),
                position_covariance: covariance,
                covariance_approximated: true,
                velocity_x: units::milli(t.gps_speed_x as f64),
                velocity_y: units::milli(t.gps_speed_y as f64),
                velocity_covariance: [var_vel, 0.0, 0.0, var_vel],
                pressure_height: units::milli(t.fusion_height as f64),
                status,
            }));
        }
    }
}

pub struct StatusPublisher {
    rc: Stamp,
    status: Stamp,
    motors: Stamp,
}

impl StatusPublisher {
    pub fn new(cfg: &PublishConfig) -> Self {
        Self { rc: Stamp::new(&cfg.frame_id), status: Stamp::new(&cfg.frame_id), motors: Stamp::new(&cfg.frame_id) }
    }
}

pub fn status_message(t: &Telemetry, header: Header) -> HlpStatus {
    HlpStatus {
        header,
        uav_status: t.uav_status,
        flight_mode: t.flight_mode().map(|m| m.name().to_string()).unwrap_or_default(),
        flight_time: t.flight_time as f32,
        battery_voltage: t.battery_voltage as f32 * 0.001,
        cpu_load: t.cpu_load as f32 * 0.001,
        up_time: t.up_time as f32 * 0.001,
        serial_interface_enabled: t.uav_status & SERIAL_INTERFACE_ENABLED != 0,
        serial_interface_active: t.uav_status & SERIAL_INTERFACE_ACTIVE != 0,
        motor_status: if t.motor_rpm.iter().any(|rpm| *rpm > 0) { "running" } else { "off" }.to_string(),
        gps_status: if t.gps_fix() { "GPS fix" } else { "GPS no fix" }.to_string(),
        gps_num_satellites: t.gps_sat_num,
        ctrl_mode: t.ctrl_mode,
        ctrl_enabled: t.ctrl_enabled,
        disable_motor_onoff_by_stick: t.disable_motor_onoff_by_stick,
        waypt_status: t.waypt_state,
    }
}

impl GroupPublisher for StatusPublisher {
    fn group(&self) -> TelemetryGroup {
        TelemetryGroup::Status
    }

    fn topics(&self) -> &'static [Topic] {
        &[Topic::RcData, Topic::Status, Topic::MotorSpeed]
    }

    fn publish(&mut self, t: &Telemetry, bus: &dyn MessageBus, stamp: i64) {
        if bus.has_consumers(Topic::RcData) {
            bus.publish(Outbound::RcData(RcData { header: self.rc.next(stamp), channel: t.channel }));
        }
        if bus.has_consumers(Topic::Status) {
            bus.publish(Outbound::Status(status_message(t, self.status.next(stamp))));
        }
        if bus.has_consumers(Topic::MotorSpeed) {
            bus.publish(Outbound::MotorSpeed(MotorSpeed { header: self.motors.next(stamp), motor_speed: t.motor_rpm }));
        }
    }
}

pub struct AuxPublisher {
    laser: Stamp,
}

impl AuxPublisher {
    pub fn new(cfg: &PublishConfig) -> Self {
        Self { laser: Stamp::new(&cfg.frame_id) }
    }
}

impl GroupPublisher for AuxPublisher {
    fn group(&self) -> TelemetryGroup {
        TelemetryGroup::Aux
    }

    fn topics(&self) -> &'static [Topic] {
        &[Topic::Laser]
    }

    fn publish(&mut self, t: &Telemetry, bus: &dyn MessageBus, stamp: i64) {
        if bus.has_consumers(Topic::Laser) {
            bus.publish(Outbound::Laser(LaserRange { header: self.laser.next(stamp), laser_measurement: t.laser_distance }));
        }
    }
}

/// All four groups with their configured rates.
pub fn publishers(cfg: &PublishConfig) -> Vec<(Box<dyn GroupPublisher>, u16)> {
    vec![
        (Box::new(ImuMagPublisher::new(cfg)) as Box<dyn GroupPublisher>, cfg.imu_mag_hz),
        (Box::new(GpsPublisher::new(cfg)), cfg.gps_hz),
        (Box::new(StatusPublisher::new(cfg)), cfg.status_hz),
        (Box::new(AuxPublisher::new(cfg)), cfg.aux_hz),
    ]
}

/// Run one group at `rate_hz` until stopped. Each period waits on the stop
/// token; the timeout is the normal case and triggers publication.
pub fn spawn_publisher(
    mut publisher: Box<dyn GroupPublisher>,
    rate_hz: u16,
    state: Arc<SharedVehicleState>,
    bus: Arc<dyn MessageBus>,
    stop: StopToken,
) -> io::Result<JoinHandle<()>> {
    let name = format!("hlp-pub-{:?}", publisher.group()).to_lowercase();
    let period = Duration::from_secs_f64(1.0 / rate_hz.max(1) as f64);
    thread::Builder::new().name(name).spawn(move || {
        info!("publish: {:?} group at {} Hz", publisher.group(), rate_hz);
        loop {
            if stop.wait_timeout(period) {
                break;
            }
            if !publisher.topics().iter().any(|topic| bus.has_consumers(*topic)) {
                continue;
            }
            let snapshot = state.read();
            publisher.publish(&snapshot, bus.as_ref(), now_unix_ms());
        }
        debug!("publish: {:?} group stopped", publisher.group());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::time::Instant;

    #[derive(Default)]
    struct Sink {
        consumers: HashSet<Topic>,
        seen: Mutex<Vec<Outbound>>,
    }

    impl Sink {
        fn with(topics: &[Topic]) -> Self {
            Self { consumers: topics.iter().copied().collect(), ..Default::default() }
        }
    }

    impl MessageBus for Sink {
        fn has_consumers(&self, topic: Topic) -> bool {
            self.consumers.contains(&topic)
        }

        fn publish(&self, msg: Outbound) {
            self.seen.lock().push(msg);
        }
    }

    fn sample() -> Telemetry {
        Telemetry {
            uav_status: 0x07 | SERIAL_INTERFACE_ENABLED,
            battery_voltage: 11_800,
            cpu_load: 420,
            motor_rpm: [0, 0, 30, 0],
            gps_status: 0x01,
            gps_sat_num: 8,
            gps_latitude: 515_000_000,
            gps_height: 42_000,
            gps_position_accuracy: 3_000,
            gps_height_accuracy: 6_000,
            gps_speed_accuracy: 1_500,
            fusion_latitude: 515_000_100,
            fusion_height: 40_000,
            acc_z: 10_000,
            angvel_yaw: 1_000,
            angle_yaw: 270_000,
            hx: 12,
            laser_distance: 1234,
            waypt_state: 4,
            ..Default::default()
        }
    }

    #[test]
    fn imu_carries_si_units_and_squared_stddev() {
        let sink = Sink::with(&[Topic::Imu]);
        let mut p = ImuMagPublisher::new(&PublishConfig::default());
        p.publish(&sample(), &sink, 1);

        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 1);
        let Outbound::Imu(imu) = &seen[0] else { panic!("expected imu") };
        assert!((imu.linear_acceleration.z - units::GRAVITY).abs() < 1e-9);
        assert!((imu.angular_velocity.z - (15.4f64).to_radians()).abs() < 1e-9);
        assert!((imu.angular_velocity_covariance[0] - 0.013 * 0.013).abs() < 1e-12);
        assert!((imu.linear_acceleration_covariance[8] - 0.083 * 0.083).abs() < 1e-12);
        assert_eq!(imu.linear_acceleration_covariance[1], 0.0);
        let (_, _, yaw) = imu.orientation.to_rpy();
        assert!((yaw + std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn gps_covariance_from_accuracy() {
        let sink = Sink::with(&[Topic::Gps, Topic::GpsCustom]);
        let mut p = GpsPublisher::new(&PublishConfig::default());
        p.publish(&sample(), &sink, 1);

        let seen = sink.seen.lock();
        let Outbound::Gps(fix) = &seen[0] else { panic!("expected gps") };
        assert!((fix.latitude - 51.5).abs() < 1e-9);
        assert!((fix.altitude - 42.0).abs() < 1e-9);
        assert!((fix.position_covariance[0] - 1.0).abs() < 1e-12);
        assert!((fix.position_covariance[8] - 4.0).abs() < 1e-12);
        assert!(fix.covariance_approximated);
        assert_eq!(fix.status, FixStatus::Fix);

        let Outbound::GpsCustom(custom) = &seen[1] else { panic!("expected gps_custom") };
        assert!((custom.latitude - 51.500_01).abs() < 1e-9);
        assert!((custom.pressure_height - 40.0).abs() < 1e-9);
        assert!((custom.velocity_covariance[3] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn status_text_fields() {
        let st = status_message(&sample(), Header::default());
        assert_eq!(st.flight_mode, "GPS");
        assert_eq!(st.motor_status, "running");
        assert_eq!(st.gps_status, "GPS fix");
        assert!(st.serial_interface_enabled);
        assert!(!st.serial_interface_active);
        assert!((st.battery_voltage - 11.8).abs() < 1e-4);
        assert_eq!(st.waypt_status, 4);

        let idle = status_message(&Telemetry::default(), Header::default());
        assert_eq!(idle.flight_mode, "");
        assert_eq!(idle.motor_status, "off");
        assert_eq!(idle.gps_status, "GPS no fix");
    }

    #[test]
    fn sequence_counts_per_topic() {
        let sink = Sink::with(&[Topic::RcData, Topic::MotorSpeed]);
        let mut p = StatusPublisher::new(&PublishConfig::default());
        for _ in 0..3 {
            p.publish(&sample(), &sink, 1);
        }
        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 6);
        let seqs: Vec<u32> = seen
            .iter()
            .filter_map(|m| match m {
                Outbound::MotorSpeed(ms) => Some(ms.header.seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn nothing_built_without_consumers() {
        let sink = Sink::default();
        let mut p = AuxPublisher::new(&PublishConfig::default());
        p.publish(&sample(), &sink, 1);
        assert!(sink.seen.lock().is_empty());
    }

    #[test]
    fn stop_ends_publisher_within_one_period() {
        let state = Arc::new(SharedVehicleState::new());
        let sink = Arc::new(Sink::with(&[Topic::Laser]));
        let stop = StopToken::new();
        let handle = spawn_publisher(
            Box::new(AuxPublisher::new(&PublishConfig::default())),
            5,
            state,
            sink.clone(),
            stop.clone(),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(450));
        let before = sink.seen.lock().len();
        assert!(before >= 1);

        let started = Instant::now();
        stop.stop();
        handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(sink.seen.lock().len(), before);
    }
}
