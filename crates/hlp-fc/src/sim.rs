//! In-process HLP stand-in. Negotiates like the real engine, serves every
//! variable group at its requested rate and flies single waypoints with a
//! flat-earth model. Used for bench runs and end-to-end tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::link::{addr, DeviceLink, LinkError, TransmitFn, VersionInfo};
use crate::state::{CtrlInput, DeviceState, FlightMode, SdkMode, NUM_MOTORS, NUM_RC_CHANNELS, SERIAL_INTERFACE_ACTIVE, SERIAL_INTERFACE_ENABLED};
use crate::units;
use crate::waypoint::{NavStatus, WaypointRecord};

const METERS_PER_DEG: f64 = 111_319.5;

fn default_lists_ready_after() -> u32 {
    1
}
fn default_home() -> [f64; 3] {
    [47.397_742, 8.545_594, 488.0]
}
fn default_waypt_state() -> u16 {
    DeviceState::Ready as u16
}
fn default_waypt_state_address() -> u16 {
    addr::WP_STATE_FIRMWARE
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    /// Version table the simulated device reports.
    #[serde(default)]
    pub version: VersionInfo,
    /// Negotiation calls answered with "lists incomplete" before success.
    #[serde(default = "default_lists_ready_after")]
    pub lists_ready_after: u32,
    /// latitude, longitude (deg), height (m)
    #[serde(default = "default_home")]
    pub home: [f64; 3],
    #[serde(default = "default_waypt_state")]
    pub waypt_state: u16,
    /// Address the simulated firmware exports its waypoint state on.
    #[serde(default = "default_waypt_state_address")]
    pub waypt_state_address: u16,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            version: VersionInfo::LOCAL,
            lists_ready_after: default_lists_ready_after(),
            home: default_home(),
            waypt_state: default_waypt_state(),
            waypt_state_address: default_waypt_state_address(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Target {
    lat: f64,
    lon: f64,
    height: f64,
    heading: i32,
    speed: f64,
    accuracy: f64,
    hold_for: f64,
}

struct Vehicle {
    flight_mode: FlightMode,
    waypt_state: u16,
    lat: f64,
    lon: f64,
    height: f64,
    heading: i32,
    target: Option<Target>,
    held: f64,
    nav_status: u16,
    dist_dm: u16,
    sdk: SdkMode,
    motors: [u8; NUM_MOTORS],
    ctrl: CtrlInput,
    elapsed: f64,
}

struct SimInner {
    cfg: SimConfig,
    negotiations: u32,
    engine_hz: u16,
    heartbeat_hz: u16,
    ticks: u64,
    offered: HashSet<u16>,
    defined: HashMap<u16, u8>,
    rates: HashMap<u8, u16>,
    packets: HashMap<u8, u64>,
    received: HashMap<u16, i32>,
    staged: HashMap<u16, i32>,
    vehicle: Vehicle,
    accepted: usize,
    bad_checksums: usize,
    rx_bytes: usize,
    tx: Option<TransmitFn>,
}

fn offered_addresses(waypt_state_addr: u16) -> HashSet<u16> {
    let mut set: HashSet<u16> = [
        addr::UAV_STATUS,
        addr::FLIGHT_TIME,
        addr::BATTERY_VOLTAGE,
        addr::HL_CPU_LOAD,
        addr::HL_UP_TIME,
        addr::GPS_LATITUDE,
        addr::GPS_LONGITUDE,
        addr::GPS_HEIGHT,
        addr::GPS_SPEED_X,
        addr::GPS_SPEED_Y,
        addr::GPS_HEADING,
        addr::GPS_POSITION_ACCURACY,
        addr::GPS_HEIGHT_ACCURACY,
        addr::GPS_SPEED_ACCURACY,
        addr::GPS_SAT_NUM,
        addr::GPS_STATUS,
        addr::ANGVEL_PITCH,
        addr::ANGVEL_ROLL,
        addr::ANGVEL_YAW,
        addr::ACC_X,
        addr::ACC_Y,
        addr::ACC_Z,
        addr::HX,
        addr::HY,
        addr::HZ,
        addr::ANGLE_PITCH,
        addr::ANGLE_ROLL,
        addr::ANGLE_YAW,
        addr::FUSION_LATITUDE,
        addr::FUSION_LONGITUDE,
        addr::FUSION_DHEIGHT,
        addr::FUSION_HEIGHT,
        addr::FUSION_SPEED_X,
        addr::FUSION_SPEED_Y,
        addr::LASER_DISTANCE,
        addr::WP_NAV_STATUS,
        addr::WP_DIST_TO_WP,
        addr::SDK_CTRL_MODE,
        addr::SDK_CTRL_ENABLED,
        addr::SDK_DISABLE_ONOFF,
    ]
    .into_iter()
    .collect();
    set.extend((0..NUM_MOTORS as u16).map(|i| addr::MOTOR_RPM + i));
    set.extend((0..NUM_RC_CHANNELS as u16).map(|i| addr::RC_CHANNEL + i));
    set.insert(waypt_state_addr);
    set
}

impl SimInner {
    fn new(cfg: SimConfig) -> Self {
        let [lat, lon, height] = cfg.home;
        let vehicle = Vehicle {
            flight_mode: FlightMode::Gps,
            waypt_state: cfg.waypt_state,
            lat,
            lon,
            height,
            heading: 0,
            target: None,
            held: 0.0,
            nav_status: 0,
            dist_dm: 0,
            sdk: SdkMode::default(),
            motors: [0; NUM_MOTORS],
            ctrl: CtrlInput::default(),
            elapsed: 0.0,
        };
        Self {
            offered: offered_addresses(cfg.waypt_state_address),
            cfg,
            negotiations: 0,
            engine_hz: 100,
            heartbeat_hz: 10,
            ticks: 0,
            defined: HashMap::new(),
            rates: HashMap::new(),
            packets: HashMap::new(),
            received: HashMap::new(),
            staged: HashMap::new(),
            vehicle,
            accepted: 0,
            bad_checksums: 0,
            rx_bytes: 0,
            tx: None,
        }
    }

    /// Current device-side value of a variable.
    fn device_value(&self, a: u16) -> Option<i32> {
        let v = &self.vehicle;
        let flying = v.target.is_some();
        let status = v.flight_mode as u16 | SERIAL_INTERFACE_ENABLED | SERIAL_INTERFACE_ACTIVE;
        let value = match a {
            addr::UAV_STATUS => status as i32,
            addr::FLIGHT_TIME => v.elapsed as i32,
            addr::BATTERY_VOLTAGE => 12_100,
            addr::HL_CPU_LOAD => 250,
            addr::HL_UP_TIME => (v.elapsed * 1000.0) as i32,
            addr::GPS_LATITUDE | addr::FUSION_LATITUDE => units::deg_to_e7(v.lat),
            addr::GPS_LONGITUDE | addr::FUSION_LONGITUDE => units::deg_to_e7(v.lon),
            addr::GPS_HEIGHT | addr::FUSION_HEIGHT => units::m_to_mm(v.height),
            addr::GPS_HEADING | addr::ANGLE_YAW => v.heading,
            addr::GPS_POSITION_ACCURACY => 2_000,
            addr::GPS_HEIGHT_ACCURACY => 3_000,
            addr::GPS_SPEED_ACCURACY => 500,
            addr::GPS_SAT_NUM => 9,
            addr::GPS_STATUS => 0x03,
            addr::ACC_Z => 10_000,
            addr::HX => 210,
            addr::HY => -35,
            addr::HZ => 420,
            addr::LASER_DISTANCE => 1_500,
            addr::WP_NAV_STATUS => v.nav_status as i32,
            addr::WP_DIST_TO_WP => v.dist_dm as i32,
            addr::SDK_CTRL_MODE => v.sdk.ctrl_mode as i32,
            addr::SDK_CTRL_ENABLED => v.sdk.ctrl_enabled as i32,
            addr::SDK_DISABLE_ONOFF => v.sdk.disable_motor_onoff_by_stick as i32,
            a if (addr::MOTOR_RPM..addr::MOTOR_RPM + NUM_MOTORS as u16).contains(&a) => {
                if flying {
                    120
                } else {
                    0
                }
            }
            a if (addr::RC_CHANNEL..addr::RC_CHANNEL + NUM_RC_CHANNELS as u16).contains(&a) => 2_047,
            a if a == self.cfg.waypt_state_address => v.waypt_state as i32,
            a if self.offered.contains(&a) => 0,
            _ => return None,
        };
        Some(value)
    }

    fn step_vehicle(&mut self, dt: f64) {
        let v = &mut self.vehicle;
        v.elapsed += dt;
        let Some(t) = v.target else { return };

        let coslat = v.lat.to_radians().cos();
        let north = (t.lat - v.lat) * METERS_PER_DEG;
        let east = (t.lon - v.lon) * METERS_PER_DEG * coslat;
        let dist = north.hypot(east);
        let step = t.speed * dt;

        if dist <= step || dist == 0.0 {
            v.lat = t.lat;
            v.lon = t.lon;
        } else {
            let k = step / dist;
            v.lat += north * k / METERS_PER_DEG;
            v.lon += east * k / (METERS_PER_DEG * coslat);
        }
        let climb = (t.height - v.height).clamp(-step, step);
        v.height += climb;
        v.heading = t.heading;

        let remaining = ((t.lat - v.lat) * METERS_PER_DEG).hypot((t.lon - v.lon) * METERS_PER_DEG * coslat);
        v.dist_dm = (remaining * 10.0).round().min(u16::MAX as f64) as u16;

        let mut nav = 0;
        if remaining < 20.0 {
            nav |= NavStatus::WITHIN_20M;
        }
        if remaining <= t.accuracy {
            nav |= NavStatus::REACHED_POS;
            v.held += dt;
            if v.held >= t.hold_for {
                nav |= NavStatus::REACHED_POS_TIME;
                v.target = None;
                info!("sim: waypoint reached");
            }
        }
        v.nav_status = nav;
    }

    fn staged_value(&self, a: u16) -> i32 {
        self.staged.get(&a).copied().unwrap_or(0)
    }

    fn accept_waypoint(&mut self) {
        let get = |a: u16| self.staged_value(a);
        let rec = WaypointRecord {
            wp_activated: get(addr::CMD_WP_ACTIVATED) as u8,
            properties: get(addr::CMD_WP_PROPERTIES) as u8,
            max_speed: get(addr::CMD_WP_MAX_SPEED) as u8,
            time: get(addr::CMD_WP_TIME) as u16,
            pos_acc: get(addr::CMD_WP_POS_ACC) as u16,
            chksum: get(addr::CMD_WP_CHKSUM) as u16,
            x: get(addr::CMD_WP_X),
            y: get(addr::CMD_WP_Y),
            yaw: get(addr::CMD_WP_YAW),
            height: get(addr::CMD_WP_HEIGHT),
            command: get(addr::CMD_WP_CMD) as u8,
        };
        if rec.chksum != rec.checksum() {
            warn!("sim: waypoint checksum mismatch (got 0x{:04X}, want 0x{:04X})", rec.chksum, rec.checksum());
            self.bad_checksums += 1;
            return;
        }
        let v = &mut self.vehicle;
        if rec.wp_activated == 0 || v.flight_mode != FlightMode::Gps || !DeviceState::accepts_waypoint(v.waypt_state) {
            debug!("sim: waypoint ignored");
            return;
        }
        v.target = Some(Target {
            lat: units::e7_to_deg(rec.x),
            lon: units::e7_to_deg(rec.y),
            height: units::milli(rec.height as f64),
            heading: rec.yaw,
            speed: rec.max_speed as f64 * 0.1,
            accuracy: units::milli(rec.pos_acc as f64),
            hold_for: rec.time as f64 * 0.01,
        });
        v.held = 0.0;
        v.nav_status = 0;
        self.accepted += 1;
        info!("sim: waypoint accepted ({:.7}, {:.7})", units::e7_to_deg(rec.x), units::e7_to_deg(rec.y));
    }
}

/// Test and bench control over a running [`SimLink`].
#[derive(Clone)]
pub struct SimHandle {
    inner: Arc<Mutex<SimInner>>,
}

impl SimHandle {
    pub fn set_flight_mode(&self, mode: FlightMode) {
        self.inner.lock().vehicle.flight_mode = mode;
    }

    pub fn set_waypt_state(&self, raw: u16) {
        self.inner.lock().vehicle.waypt_state = raw;
    }

    /// Pilot takes over: the current waypoint is dropped.
    pub fn pilot_abort(&self) {
        let mut inner = self.inner.lock();
        inner.vehicle.target = None;
        inner.vehicle.nav_status |= NavStatus::PILOT_ABORT;
    }

    pub fn last_ctrl(&self) -> CtrlInput {
        self.inner.lock().vehicle.ctrl
    }

    pub fn sdk_mode(&self) -> SdkMode {
        self.inner.lock().vehicle.sdk
    }

    pub fn motors(&self) -> [u8; NUM_MOTORS] {
        self.inner.lock().vehicle.motors
    }

    /// latitude, longitude (deg), height (m)
    pub fn position(&self) -> (f64, f64, f64) {
        let inner = self.inner.lock();
        (inner.vehicle.lat, inner.vehicle.lon, inner.vehicle.height)
    }

    pub fn accepted_waypoints(&self) -> usize {
        self.inner.lock().accepted
    }

    pub fn bad_checksums(&self) -> usize {
        self.inner.lock().bad_checksums
    }

    pub fn group_rate(&self, group: u8) -> Option<u16> {
        self.inner.lock().rates.get(&group).copied()
    }

    pub fn rx_bytes(&self) -> usize {
        self.inner.lock().rx_bytes
    }
}

pub struct SimLink {
    inner: Arc<Mutex<SimInner>>,
}

impl SimLink {
    pub fn new(cfg: SimConfig) -> (Self, SimHandle) {
        let inner = Arc::new(Mutex::new(SimInner::new(cfg)));
        (Self { inner: inner.clone() }, SimHandle { inner })
    }
}

impl DeviceLink for SimLink {
    fn negotiate(&mut self) -> Result<Option<VersionInfo>, LinkError> {
        let mut inner = self.inner.lock();
        inner.negotiations += 1;
        if inner.negotiations <= inner.cfg.lists_ready_after {
            return Ok(None);
        }
        Ok(Some(inner.cfg.version))
    }

    fn set_engine_rate(&mut self, rate_hz: u16, heartbeat_hz: u16) {
        let mut inner = self.inner.lock();
        inner.engine_hz = rate_hz.max(1);
        inner.heartbeat_hz = heartbeat_hz;
    }

    fn define_telemetry_address(&mut self, group: u8, a: u16) -> Result<(), LinkError> {
        let mut inner = self.inner.lock();
        if !inner.offered.contains(&a) {
            return Err(LinkError::UnknownAddress(a));
        }
        inner.defined.insert(a, group);
        Ok(())
    }

    fn define_command_address(&mut self, _group: u8, _addr: u16, _requires_ack: bool) -> Result<(), LinkError> {
        Ok(())
    }

    fn set_group_rate(&mut self, group: u8, hz: u16) -> Result<(), LinkError> {
        self.inner.lock().rates.insert(group, hz);
        Ok(())
    }

    fn write_address(&mut self, a: u16, raw: i32) {
        self.inner.lock().staged.insert(a, raw);
    }

    fn read_address(&self, a: u16) -> Option<i32> {
        self.inner.lock().received.get(&a).copied()
    }

    fn flush_command_group(&mut self, group: u8) -> Result<(), LinkError> {
        let mut inner = self.inner.lock();
        match group {
            0 => {
                let sdk = SdkMode {
                    ctrl_mode: inner.staged_value(addr::CMD_CTRL_MODE) as u8,
                    ctrl_enabled: inner.staged_value(addr::CMD_CTRL_ENABLED) as u8,
                    disable_motor_onoff_by_stick: inner.staged_value(addr::CMD_DISABLE_ONOFF) as u8,
                };
                let mut motors = [0u8; NUM_MOTORS];
                for (i, m) in motors.iter_mut().enumerate() {
                    *m = inner.staged_value(addr::CMD_MOTOR + i as u16) as u8;
                }
                inner.vehicle.sdk = sdk;
                inner.vehicle.motors = motors;
            }
            1 => {
                inner.vehicle.ctrl = CtrlInput {
                    pitch: inner.staged_value(addr::CMD_PITCH) as i16,
                    roll: inner.staged_value(addr::CMD_ROLL) as i16,
                    yaw: inner.staged_value(addr::CMD_YAW) as i16,
                    thrust: inner.staged_value(addr::CMD_THRUST) as i16,
                    ctrl: inner.staged_value(addr::CMD_CTRL) as u8,
                };
            }
            2 => inner.accept_waypoint(),
            other => debug!("sim: flush of unknown command group {}", other),
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<bool, LinkError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.ticks += 1;
        let engine = inner.engine_hz as u64;
        inner.step_vehicle(1.0 / engine as f64);

        let mut fresh = false;
        let due: Vec<u8> = inner
            .rates
            .iter()
            .filter(|(_, hz)| **hz > 0 && inner.ticks % (engine / **hz as u64).max(1) == 0)
            .map(|(g, _)| *g)
            .collect();
        for group in due {
            let addrs: Vec<u16> = inner.defined.iter().filter(|(_, g)| **g == group).map(|(a, _)| *a).collect();
            let mut served = false;
            for a in addrs {
                if let Some(v) = inner.device_value(a) {
                    inner.received.insert(a, v);
                    served = true;
                }
            }
            if served {
                *inner.packets.entry(group).or_insert(0) += 1;
                fresh = true;
            }
        }

        if inner.heartbeat_hz > 0 && inner.ticks % (engine / inner.heartbeat_hz as u64).max(1) == 0 {
            if let Some(tx) = inner.tx.as_mut() {
                let seq = (inner.ticks & 0xFF) as u8;
                let frame = [b'!', b'H', seq];
                tx(&frame[..])?;
            }
        }
        Ok(fresh)
    }

    fn group_packets(&self, group: u8) -> u64 {
        self.inner.lock().packets.get(&group).copied().unwrap_or(0)
    }

    fn attach_transmit(&mut self, tx: TransmitFn) {
        self.inner.lock().tx = Some(tx);
    }

    fn receive(&mut self, bytes: &[u8]) {
        self.inner.lock().rx_bytes += bytes.len();
    }
}
