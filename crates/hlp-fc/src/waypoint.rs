use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hlp_nav::GeofenceGuard;
use hlp_proto::{ActionOutcome, GeoPoint, GeoPose, Quaternion, WaypointFeedback, WaypointGoal, WaypointResult};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::state::{CommandGroup, DeviceState, FlightMode, SharedLinkStatus, SharedVehicleState, StopToken, Telemetry};
use crate::units;

pub const WPPROP_ABSCOORDS: u8 = 0x01;
pub const WPPROP_HEIGHTENABLED: u8 = 0x02;
pub const WPPROP_YAWENABLED: u8 = 0x04;
pub const WPPROP_AUTOMATICGOTO: u8 = 0x10;

pub const WP_CMD_SINGLE_WP: u8 = 0x01;

/// Checksum seed used by the HLP firmware.
pub const CHKSUM_SEED: u16 = 0xAAAA;

/// Control mode the device must report before it will fly a waypoint.
pub const CTRL_MODE_WAYPOINT: u8 = 0x03;

/// Navigation status bits (sdk.h).
pub struct NavStatus;

impl NavStatus {
    pub const REACHED_POS: u16 = 0x01;
    pub const REACHED_POS_TIME: u16 = 0x02;
    pub const WITHIN_20M: u16 = 0x04;
    pub const PILOT_ABORT: u16 = 0x08;
}

/// Single waypoint as laid out in the HLP command packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaypointRecord {
    pub wp_activated: u8,
    pub properties: u8,
    /// 0.1 m/s
    pub max_speed: u8,
    /// 0.01 s
    pub time: u16,
    /// mm
    pub pos_acc: u16,
    pub chksum: u16,
    /// latitude, 1e-7 deg
    pub x: i32,
    /// longitude, 1e-7 deg
    pub y: i32,
    /// 1/1000 deg, 0..360000
    pub yaw: i32,
    /// mm
    pub height: i32,
    pub command: u8,
}

impl WaypointRecord {
    pub fn from_goal(goal: &WaypointGoal, cfg: &WaypointConfig) -> Self {
        let pick = |v: f64, default: f64| if v > 0.0 { v } else { default };
        let pos = &goal.geo_pose.position;
        let (_, _, yaw) = goal.geo_pose.orientation.to_rpy();

        let rec = WaypointRecord {
            wp_activated: 1,
            properties: WPPROP_ABSCOORDS | WPPROP_AUTOMATICGOTO | WPPROP_HEIGHTENABLED | WPPROP_YAWENABLED,
            max_speed: units::speed_to_device(pick(goal.max_speed, cfg.default_max_speed)),
            time: units::seconds_to_centis(pick(goal.timeout, cfg.default_timeout)),
            pos_acc: units::m_to_mm_u16(pick(goal.position_accuracy, cfg.default_position_accuracy)),
            chksum: 0,
            x: units::deg_to_e7(pos.latitude),
            y: units::deg_to_e7(pos.longitude),
            yaw: units::rad_to_device_yaw(yaw),
            height: units::m_to_mm(pos.altitude),
            command: goal.command,
        };
        rec.sealed()
    }

    /// 16-bit sum of the seed and every payload field, in firmware order.
    pub fn checksum(&self) -> u16 {
        let sum = (CHKSUM_SEED as i32)
            .wrapping_add(self.yaw)
            .wrapping_add(self.height)
            .wrapping_add(self.time as i32)
            .wrapping_add(self.x)
            .wrapping_add(self.y)
            .wrapping_add(self.max_speed as i32)
            .wrapping_add(self.pos_acc as i32)
            .wrapping_add(self.properties as i32)
            .wrapping_add(self.wp_activated as i32);
        sum as u16
    }

    pub fn sealed(mut self) -> Self {
        self.chksum = self.checksum();
        self
    }
}

fn default_iteration_rate() -> u16 {
    10
}
fn default_max_speed() -> f64 {
    10.0
}
fn default_position_accuracy() -> f64 {
    3.0
}
fn default_timeout() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaypointConfig {
    /// Polling rate while a goal is active.
    #[serde(default = "default_iteration_rate")]
    pub iteration_rate_hz: u16,
    /// Used when a goal leaves the field at zero. m/s
    #[serde(default = "default_max_speed")]
    pub default_max_speed: f64,
    /// m
    #[serde(default = "default_position_accuracy")]
    pub default_position_accuracy: f64,
    /// s
    #[serde(default = "default_timeout")]
    pub default_timeout: f64,
    #[serde(default = "default_true")]
    pub require_ctrl_mode: bool,
}

impl Default for WaypointConfig {
    fn default() -> Self {
        Self {
            iteration_rate_hz: default_iteration_rate(),
            default_max_speed: default_max_speed(),
            default_position_accuracy: default_position_accuracy(),
            default_timeout: default_timeout(),
            require_ctrl_mode: true,
        }
    }
}

impl WaypointConfig {
    fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.iteration_rate_hz.max(1) as f64)
    }
}

/// Preemption request for the running goal. Cloned into whichever task may
/// cancel it.
#[derive(Debug, Clone, Default)]
pub struct Preempt(Arc<AtomicBool>);

impl Preempt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Best estimate of where the vehicle is: fused position, heading from GPS.
pub fn current_pose(t: &Telemetry) -> GeoPose {
    GeoPose {
        position: GeoPoint {
            latitude: units::e7_to_deg(t.fusion_latitude),
            longitude: units::e7_to_deg(t.fusion_longitude),
            altitude: units::milli(t.fusion_height as f64),
        },
        orientation: Quaternion::from_rpy(0.0, 0.0, units::device_yaw_to_rad(t.gps_heading)),
    }
}

pub fn result_of(t: &Telemetry) -> WaypointResult {
    WaypointResult { geo_pose: current_pose(t), status: t.nav_status }
}

/// Drives one GPS waypoint goal from validation to a terminal outcome.
pub struct WaypointActionController {
    state: Arc<SharedVehicleState>,
    geofence: Arc<GeofenceGuard>,
    status: SharedLinkStatus,
    stop: StopToken,
    cfg: WaypointConfig,
}

impl WaypointActionController {
    pub fn new(
        state: Arc<SharedVehicleState>,
        geofence: Arc<GeofenceGuard>,
        status: SharedLinkStatus,
        stop: StopToken,
        cfg: WaypointConfig,
    ) -> Self {
        Self { state, geofence, status, stop, cfg }
    }

    pub fn config(&self) -> &WaypointConfig {
        &self.cfg
    }

    /// Pre-submission checks, in order: flight mode, device waypoint state,
    /// control mode, geofence. `Valid` means the goal may be submitted.
    pub fn validate(&self, goal: &WaypointGoal) -> ActionOutcome {
        let t = self.state.read();

        if t.flight_mode() != Some(FlightMode::Gps) {
            warn!("waypoint: HLP not in GPS mode (uav_status 0x{:04X})", t.uav_status);
            return ActionOutcome::WrongFlightMode;
        }
        if !DeviceState::accepts_waypoint(t.waypt_state) {
            info!("waypoint: HLP state machine not ready ({:?})", DeviceState::from_raw(t.waypt_state));
            return ActionOutcome::NotReady;
        }
        if self.cfg.require_ctrl_mode && (t.ctrl_mode != CTRL_MODE_WAYPOINT || t.ctrl_enabled == 0) {
            warn!("waypoint: control mode {} enabled {}, waypoint control not active", t.ctrl_mode, t.ctrl_enabled);
            return ActionOutcome::WrongCtrlMode;
        }
        let pos = &goal.geo_pose.position;
        if !self.geofence.contains(pos.latitude, pos.longitude) {
            warn!("waypoint: ({:.7}, {:.7}) outside geofence", pos.latitude, pos.longitude);
            return ActionOutcome::OutOfGeofence;
        }
        ActionOutcome::Valid
    }

    /// Run a goal to completion. Blocks the calling thread; `preempt` may be
    /// requested from any other task.
    pub fn execute(
        &self,
        goal: &WaypointGoal,
        preempt: &Preempt,
        feedback: &mut dyn FnMut(&WaypointFeedback),
    ) -> (ActionOutcome, WaypointResult) {
        let verdict = self.validate(goal);
        if verdict != ActionOutcome::Valid {
            let result = result_of(&self.state.read());
            info!("waypoint: goal rejected: {:?}", verdict);
            return (verdict, result);
        }

        let record = WaypointRecord::from_goal(goal, &self.cfg);
        debug!("waypoint: submitting {:?}", record);
        let (_, generation) = self.state.write_command(&[CommandGroup::Mode, CommandGroup::Waypoint], |c| {
            c.waypoint = Some(record);
        });

        let outcome = self.run(generation, preempt, feedback);

        self.state.update_command(|c| {
            if c.waypoint == Some(record) {
                c.waypoint = None;
            }
        });
        let result = result_of(&self.state.read());
        info!("waypoint: goal finished: {:?} (nav status 0x{:02X})", outcome, result.status);
        (outcome, result)
    }

    fn interrupted(&self, preempt: &Preempt) -> Option<ActionOutcome> {
        if preempt.is_requested() || self.stop.is_stopped() {
            return Some(ActionOutcome::Preempted);
        }
        if let Some(fault) = self.status.lock().fault.clone() {
            warn!("waypoint: link fault while goal active: {}", fault);
            return Some(ActionOutcome::Aborted);
        }
        None
    }

    fn run(&self, generation: u64, preempt: &Preempt, feedback: &mut dyn FnMut(&WaypointFeedback)) -> ActionOutcome {
        let interval = self.cfg.poll_interval();

        // submitted: wait for the engine to flush the record
        let mut seen = self.state.last_tick();
        while !self.state.is_flushed(generation) {
            if let Some(outcome) = self.interrupted(preempt) {
                return outcome;
            }
            seen = self.state.wait_for_update(seen, interval);
        }
        // nav status committed so far may still describe the previous goal
        let flushed_at = self.state.read().status_seq;
        debug!("waypoint: record flushed at status packet {}, polling", flushed_at);

        // polling
        let mut seen = self.state.last_tick();
        loop {
            if let Some(outcome) = self.interrupted(preempt) {
                return outcome;
            }
            let latest = self.state.wait_for_update(seen, interval);
            if latest == seen {
                continue;
            }
            seen = latest;

            let t = self.state.read();
            if t.flight_mode() != Some(FlightMode::Gps) {
                warn!("waypoint: flight mode left GPS while navigating");
                return ActionOutcome::WrongFlightMode;
            }
            if t.status_seq <= flushed_at {
                continue;
            }
            feedback(&WaypointFeedback {
                geo_pose: current_pose(&t),
                distance: units::dm_to_m(t.dist_to_wp),
                status: t.nav_status,
            });
            if t.nav_status & NavStatus::PILOT_ABORT != 0 {
                warn!("waypoint: pilot aborted");
                return ActionOutcome::Aborted;
            }
            if t.nav_status & NavStatus::REACHED_POS_TIME != 0 {
                return ActionOutcome::Succeeded;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlp_nav::Point;
    use std::thread;

    fn goal(lat: f64, lon: f64) -> WaypointGoal {
        WaypointGoal {
            geo_pose: GeoPose {
                position: GeoPoint { latitude: lat, longitude: lon, altitude: 12.5 },
                orientation: Quaternion::from_rpy(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            },
            max_speed: 3.0,
            timeout: 2.0,
            position_accuracy: 2.5,
            command: WP_CMD_SINGLE_WP,
        }
    }

    struct Rig {
        state: Arc<SharedVehicleState>,
        geofence: Arc<GeofenceGuard>,
        status: SharedLinkStatus,
        stop: StopToken,
        ctl: Arc<WaypointActionController>,
    }

    fn rig() -> Rig {
        let state = Arc::new(SharedVehicleState::new());
        let geofence = Arc::new(GeofenceGuard::new());
        let status = SharedLinkStatus::default();
        let stop = StopToken::new();
        let ctl = Arc::new(WaypointActionController::new(
            state.clone(),
            geofence.clone(),
            status.clone(),
            stop.clone(),
            WaypointConfig { iteration_rate_hz: 200, ..Default::default() },
        ));
        Rig { state, geofence, status, stop, ctl }
    }

    fn ready(state: &SharedVehicleState) {
        let mut w = state.begin_write();
        w.uav_status = FlightMode::Gps as u16;
        w.ctrl_mode = CTRL_MODE_WAYPOINT;
        w.ctrl_enabled = 1;
        w.waypt_state = DeviceState::Ready as u16;
        w.commit();
    }

    /// Stand-in for the engine: flush whatever is pending and commit `f`.
    fn engine_step(state: &SharedVehicleState, f: impl FnOnce(&mut Telemetry)) {
        if let Some(p) = state.take_pending() {
            state.mark_flushed(p.generation);
        }
        let mut w = state.begin_write();
        w.status_seq += 1;
        f(&mut w);
        w.commit();
    }

    /// A commit from another group: status fields are carried over as is.
    fn imu_step(state: &SharedVehicleState) {
        let mut w = state.begin_write();
        w.angle_yaw = (w.angle_yaw + 1_000) % units::YAW_FULL_TURN;
        w.commit();
    }

    #[test]
    fn checksum_matches_firmware_sum() {
        let rec = WaypointRecord {
            wp_activated: 1,
            properties: 0x17,
            max_speed: 30,
            time: 200,
            pos_acc: 2500,
            chksum: 0,
            x: 515_000_000,
            y: -1_234_567,
            yaw: 90_000,
            height: 12_500,
            command: 1,
        };
        let expected = (0xAAAAi64 + 90_000 + 12_500 + 200 + 515_000_000 - 1_234_567 + 30 + 2500 + 0x17 + 1)
            .rem_euclid(65_536) as u16;
        assert_eq!(rec.checksum(), expected);
        assert_eq!(rec.sealed().chksum, expected);

        let zero = WaypointRecord::default();
        assert_eq!(zero.checksum(), 0xAAAA);

        let wrap = WaypointRecord { x: i32::MAX, y: i32::MAX, ..Default::default() };
        let expected = (0xAAAAi64 + 2 * i32::MAX as i64).rem_euclid(65_536) as u16;
        assert_eq!(wrap.checksum(), expected);
    }

    #[test]
    fn record_from_goal_uses_device_units() {
        let rec = WaypointRecord::from_goal(&goal(51.5, -0.125), &WaypointConfig::default());
        assert_eq!(rec.x, 515_000_000);
        assert_eq!(rec.y, -1_250_000);
        assert_eq!(rec.height, 12_500);
        assert_eq!(rec.yaw, 90_000);
        assert_eq!(rec.max_speed, 30);
        assert_eq!(rec.time, 200);
        assert_eq!(rec.pos_acc, 2500);
        assert_eq!(rec.wp_activated, 1);
        assert_eq!(rec.properties, 0x17);
        assert_eq!(rec.command, WP_CMD_SINGLE_WP);
        assert_eq!(rec.chksum, rec.checksum());
    }

    #[test]
    fn zero_goal_fields_take_defaults() {
        let mut g = goal(10.0, 10.0);
        g.max_speed = 0.0;
        g.timeout = 0.0;
        g.position_accuracy = -1.0;
        let rec = WaypointRecord::from_goal(&g, &WaypointConfig::default());
        assert_eq!(rec.max_speed, 100);
        assert_eq!(rec.time, 100);
        assert_eq!(rec.pos_acc, 3000);
    }

    #[test]
    fn wrong_flight_mode_writes_nothing() {
        let r = rig();
        ready(&r.state);
        engine_step(&r.state, |t| t.uav_status = FlightMode::Height as u16);
        let before = r.state.command_generation();

        let (outcome, _) = r.ctl.execute(&goal(1.0, 1.0), &Preempt::new(), &mut |_| {});
        assert_eq!(outcome, ActionOutcome::WrongFlightMode);
        assert_eq!(r.state.command_generation(), before);
        assert!(r.state.take_pending().is_none());
        assert_eq!(r.state.read_command().waypoint, None);
    }

    #[test]
    fn control_mode_must_be_waypoint() {
        let r = rig();
        ready(&r.state);
        engine_step(&r.state, |t| t.ctrl_mode = 0x02);
        let (outcome, _) = r.ctl.execute(&goal(1.0, 1.0), &Preempt::new(), &mut |_| {});
        assert_eq!(outcome, ActionOutcome::WrongCtrlMode);
        assert!(r.state.take_pending().is_none());
    }

    #[test]
    fn not_ready_is_reported_before_control_mode() {
        let r = rig();
        ready(&r.state);
        engine_step(&r.state, |t| {
            t.ctrl_mode = 0x00;
            t.waypt_state = DeviceState::Lock2 as u16;
        });
        assert_eq!(r.ctl.validate(&goal(1.0, 1.0)), ActionOutcome::NotReady);
        engine_step(&r.state, |t| t.waypt_state = DeviceState::Ready as u16);
        assert_eq!(r.ctl.validate(&goal(1.0, 1.0)), ActionOutcome::WrongCtrlMode);
    }

    #[test]
    fn device_state_below_ready_is_not_ready() {
        let r = rig();
        ready(&r.state);
        for raw in 0..4 {
            engine_step(&r.state, |t| t.waypt_state = raw);
            let (outcome, _) = r.ctl.execute(&goal(1.0, 1.0), &Preempt::new(), &mut |_| {});
            assert_eq!(outcome, ActionOutcome::NotReady);
        }
        engine_step(&r.state, |t| t.waypt_state = DeviceState::LlpChecking as u16);
        assert_eq!(r.ctl.validate(&goal(1.0, 1.0)), ActionOutcome::Valid);
    }

    #[test]
    fn outside_geofence_writes_nothing() {
        let r = rig();
        ready(&r.state);
        let square = [Point::new(0.0, 0.0), Point::new(0.0, 1.0), Point::new(1.0, 1.0), Point::new(1.0, 0.0)];
        r.geofence.configure(&square).unwrap();
        let before = r.state.command_generation();

        let (outcome, _) = r.ctl.execute(&goal(2.0, 0.5), &Preempt::new(), &mut |_| {});
        assert_eq!(outcome, ActionOutcome::OutOfGeofence);
        assert_eq!(r.state.command_generation(), before);
        assert_eq!(r.ctl.validate(&goal(0.5, 0.5)), ActionOutcome::Valid);
    }

    fn run_in_background(r: &Rig, g: WaypointGoal, preempt: Preempt) -> thread::JoinHandle<(ActionOutcome, Vec<WaypointFeedback>)> {
        let ctl = r.ctl.clone();
        thread::spawn(move || {
            let mut seen = Vec::new();
            let (outcome, _) = ctl.execute(&g, &preempt, &mut |fb| seen.push(*fb));
            (outcome, seen)
        })
    }

    fn wait_submitted(state: &SharedVehicleState) {
        for _ in 0..500 {
            if state.read_command().waypoint.is_some() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("goal never submitted");
    }

    #[test]
    fn reached_pos_time_succeeds() {
        let r = rig();
        ready(&r.state);
        let job = run_in_background(&r, goal(1.0, 1.0), Preempt::new());
        wait_submitted(&r.state);

        let pending = r.state.take_pending().unwrap();
        assert_eq!(pending.groups, vec![CommandGroup::Mode, CommandGroup::Waypoint]);
        let rec = pending.cmd.waypoint.unwrap();
        assert_eq!(rec.chksum, rec.checksum());
        r.state.mark_flushed(pending.generation);
        thread::sleep(Duration::from_millis(20));

        engine_step(&r.state, |t| {
            t.nav_status = NavStatus::WITHIN_20M;
            t.dist_to_wp = 55;
        });
        thread::sleep(Duration::from_millis(20));
        engine_step(&r.state, |t| t.nav_status = NavStatus::WITHIN_20M | NavStatus::REACHED_POS | NavStatus::REACHED_POS_TIME);

        let (outcome, feedback) = job.join().unwrap();
        assert_eq!(outcome, ActionOutcome::Succeeded);
        assert!(feedback.iter().any(|f| (f.distance - 5.5).abs() < 1e-9));
        assert_eq!(feedback.last().unwrap().status & NavStatus::REACHED_POS_TIME, NavStatus::REACHED_POS_TIME);
        assert_eq!(r.state.read_command().waypoint, None);
    }

    #[test]
    fn latched_nav_status_from_previous_goal_is_ignored() {
        let r = rig();
        ready(&r.state);
        engine_step(&r.state, |t| t.nav_status = NavStatus::WITHIN_20M | NavStatus::REACHED_POS | NavStatus::REACHED_POS_TIME);

        let job = run_in_background(&r, goal(1.0, 1.0), Preempt::new());
        wait_submitted(&r.state);
        let pending = r.state.take_pending().unwrap();
        r.state.mark_flushed(pending.generation);
        for _ in 0..5 {
            thread::sleep(Duration::from_millis(10));
            imu_step(&r.state);
        }
        assert!(!job.is_finished());

        engine_step(&r.state, |t| {
            t.nav_status = 0;
            t.dist_to_wp = 4_000;
        });
        thread::sleep(Duration::from_millis(20));
        imu_step(&r.state);
        thread::sleep(Duration::from_millis(20));
        assert!(!job.is_finished());
        engine_step(&r.state, |t| t.nav_status = NavStatus::REACHED_POS | NavStatus::REACHED_POS_TIME);

        let (outcome, feedback) = job.join().unwrap();
        assert_eq!(outcome, ActionOutcome::Succeeded);
        assert!((feedback[0].distance - 400.0).abs() < 1e-9);
        assert_eq!(feedback[0].status, 0);
    }

    #[test]
    fn pilot_abort_aborts_on_that_tick() {
        let r = rig();
        ready(&r.state);
        let job = run_in_background(&r, goal(1.0, 1.0), Preempt::new());
        wait_submitted(&r.state);
        engine_step(&r.state, |t| t.nav_status = NavStatus::WITHIN_20M);
        thread::sleep(Duration::from_millis(20));
        engine_step(&r.state, |t| t.nav_status = NavStatus::PILOT_ABORT);

        let (outcome, feedback) = job.join().unwrap();
        assert_eq!(outcome, ActionOutcome::Aborted);
        assert_eq!(feedback.last().unwrap().status, NavStatus::PILOT_ABORT);
    }

    #[test]
    fn leaving_gps_mode_while_polling_fails_immediately() {
        let r = rig();
        ready(&r.state);
        let job = run_in_background(&r, goal(1.0, 1.0), Preempt::new());
        wait_submitted(&r.state);
        engine_step(&r.state, |_| {});
        thread::sleep(Duration::from_millis(20));
        engine_step(&r.state, |t| t.uav_status = FlightMode::Attitude as u16);

        let (outcome, _) = job.join().unwrap();
        assert_eq!(outcome, ActionOutcome::WrongFlightMode);
    }

    #[test]
    fn preempt_from_another_task() {
        let r = rig();
        ready(&r.state);
        let preempt = Preempt::new();
        let job = run_in_background(&r, goal(1.0, 1.0), preempt.clone());
        wait_submitted(&r.state);
        engine_step(&r.state, |_| {});
        thread::sleep(Duration::from_millis(20));
        preempt.request();

        let (outcome, _) = job.join().unwrap();
        assert_eq!(outcome, ActionOutcome::Preempted);
        assert_eq!(r.state.read_command().waypoint, None);
    }

    #[test]
    fn stop_and_link_fault_end_the_goal() {
        let r = rig();
        ready(&r.state);
        // never flushed: no engine running
        let job = run_in_background(&r, goal(1.0, 1.0), Preempt::new());
        wait_submitted(&r.state);
        r.stop.stop();
        assert_eq!(job.join().unwrap().0, ActionOutcome::Preempted);

        let r = rig();
        ready(&r.state);
        let job = run_in_background(&r, goal(1.0, 1.0), Preempt::new());
        wait_submitted(&r.state);
        r.status.lock().fault = Some("serial read failed".into());
        assert_eq!(job.join().unwrap().0, ActionOutcome::Aborted);
    }

    #[test]
    fn result_pose_comes_from_fused_estimate() {
        let t = Telemetry {
            fusion_latitude: 515_000_000,
            fusion_longitude: -1_250_000,
            fusion_height: 12_500,
            gps_heading: 90_000,
            nav_status: NavStatus::REACHED_POS,
            ..Default::default()
        };
        let res = result_of(&t);
        assert!((res.geo_pose.position.latitude - 51.5).abs() < 1e-9);
        assert!((res.geo_pose.position.longitude + 0.125).abs() < 1e-9);
        assert!((res.geo_pose.position.altitude - 12.5).abs() < 1e-9);
        let (_, _, yaw) = res.geo_pose.orientation.to_rpy();
        assert!((yaw - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        assert_eq!(res.status, NavStatus::REACHED_POS);
    }
}
