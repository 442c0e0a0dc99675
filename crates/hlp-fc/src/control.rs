use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;

use hlp_proto::{Announcement, CtrlModeRequest, CtrlModeResponse, Outbound, Topic, Twist};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::publish::MessageBus;
use crate::state::{CommandGroup, CtrlInput, FlightMode, SdkMode, SharedVehicleState};

/// Pitch, roll, yaw, thrust, height and GPS position all under serial control.
pub const CTRL_ALL_AXES: u8 = 0x3F;

fn default_thrust_range() -> i16 {
    4095
}
fn default_stick_range() -> i16 {
    2047
}
fn default_max_climb() -> f64 {
    2.0
}
fn default_max_yaw_rate() -> f64 {
    FRAC_PI_2
}
fn default_max_speed() -> f64 {
    3.0
}

/// Device command ranges and the physical rates they map onto.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlLimits {
    #[serde(default = "default_thrust_range")]
    pub thrust_range: i16,
    #[serde(default = "default_stick_range")]
    pub stick_range: i16,
    /// m/s at full thrust
    #[serde(default = "default_max_climb")]
    pub max_climb_rate: f64,
    /// rad/s at full yaw stick
    #[serde(default = "default_max_yaw_rate")]
    pub max_yaw_rate: f64,
    /// m/s at full pitch stick
    #[serde(default = "default_max_speed")]
    pub max_forward_speed: f64,
    /// m/s at full roll stick
    #[serde(default = "default_max_speed")]
    pub max_lateral_speed: f64,
}

impl Default for ControlLimits {
    fn default() -> Self {
        Self {
            thrust_range: default_thrust_range(),
            stick_range: default_stick_range(),
            max_climb_rate: default_max_climb(),
            max_yaw_rate: default_max_yaw_rate(),
            max_forward_speed: default_max_speed(),
            max_lateral_speed: default_max_speed(),
        }
    }
}

fn stick(value: f64, max_value: f64, range: i16) -> i16 {
    let raw = value * (range as f64 / max_value);
    let bound = range as f64;
    if value > 0.0 {
        raw.min(bound) as i16
    } else {
        raw.max(-bound) as i16
    }
}

/// Velocity command to CTRL packet fields. Thrust only climbs; the other
/// axes are symmetric and clamped per sign.
pub fn map_twist(cmd: &Twist, limits: &ControlLimits) -> CtrlInput {
    let thrust_range = limits.thrust_range as f64;
    let thrust = (cmd.linear.z * (thrust_range / limits.max_climb_rate)).clamp(0.0, thrust_range) as i16;
    CtrlInput {
        pitch: stick(cmd.linear.x, limits.max_forward_speed, limits.stick_range),
        roll: stick(cmd.linear.y, limits.max_lateral_speed, limits.stick_range),
        yaw: stick(cmd.angular.z, limits.max_yaw_rate, limits.stick_range),
        thrust,
        ctrl: CTRL_ALL_AXES,
    }
}

fn mode_word(mode: u8) -> &'static str {
    match mode {
        0x00 => "zero",
        0x01 => "one",
        0x02 => "two",
        0x03 => "three",
        _ => "invalid",
    }
}

/// Human-readable lines describing a control mode request.
pub fn describe_mode(req: &CtrlModeRequest) -> [String; 3] {
    [
        format!("Control mode set to {}", mode_word(req.ctrl_mode)),
        if req.ctrl_enabled == 0x01 { "Control mode is enabled" } else { "Control mode is disabled" }.to_string(),
        if req.disable_onoff_stick == 0x01 { "On off via stick is enabled" } else { "On off via stick is disabled" }
            .to_string(),
    ]
}

/// Entry point for external velocity commands and control mode requests.
pub struct ControlCommandRouter {
    state: Arc<SharedVehicleState>,
    bus: Arc<dyn MessageBus>,
    limits: ControlLimits,
    externalise_state: bool,
}

impl ControlCommandRouter {
    pub fn new(state: Arc<SharedVehicleState>, bus: Arc<dyn MessageBus>, limits: ControlLimits, externalise_state: bool) -> Self {
        Self { state, bus, limits, externalise_state }
    }

    /// Returns the staged input, or `None` when the flight mode forbids it.
    pub fn handle_twist(&self, cmd: &Twist) -> Option<CtrlInput> {
        let uav_status = self.state.read().uav_status;
        match FlightMode::from_status(uav_status) {
            Some(FlightMode::Gps) => warn!("control: UAV in GPS mode"),
            Some(FlightMode::Height) => warn!("control: UAV in Height mode"),
            Some(FlightMode::Attitude) => {
                error!("control: UAV in manual mode, ignoring command");
                return None;
            }
            None => {
                error!("control: UAV in unknown flight mode (status 0x{:04X}), ignoring command", uav_status);
                return None;
            }
        }

        let input = map_twist(cmd, &self.limits);
        self.state.write_command(&[CommandGroup::Ctrl], |c| c.ctrl = input);
        debug!("control: staged {:?}", input);
        Some(input)
    }

    /// Control mode service. The write is flushed on the next engine tick;
    /// the response echoes the direct motor command fields.
    pub fn set_ctrl_mode(&self, req: &CtrlModeRequest) -> CtrlModeResponse {
        let (motors, _) = self.state.write_command(&[CommandGroup::Mode], |c| {
            c.sdk = SdkMode {
                ctrl_mode: req.ctrl_mode,
                ctrl_enabled: req.ctrl_enabled,
                disable_motor_onoff_by_stick: req.disable_onoff_stick,
            };
            c.motors
        });

        if self.externalise_state && self.bus.has_consumers(Topic::Announce) {
            for text in describe_mode(req) {
                self.bus.publish(Outbound::Announce(Announcement { text }));
            }
        }
        CtrlModeResponse { motors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlp_proto::Vector3;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Announcements(Mutex<Vec<String>>);

    impl MessageBus for Announcements {
        fn has_consumers(&self, topic: Topic) -> bool {
            topic == Topic::Announce
        }

        fn publish(&self, msg: Outbound) {
            if let Outbound::Announce(a) = msg {
                self.0.lock().push(a.text);
            }
        }
    }

    fn twist(x: f64, y: f64, z: f64, yaw: f64) -> Twist {
        Twist { linear: Vector3::new(x, y, z), angular: Vector3::new(0.0, 0.0, yaw) }
    }

    fn rig(mode: u16) -> (ControlCommandRouter, Arc<SharedVehicleState>, Arc<Announcements>) {
        let state = Arc::new(SharedVehicleState::new());
        let mut w = state.begin_write();
        w.uav_status = mode;
        w.commit();
        let bus = Arc::new(Announcements::default());
        (ControlCommandRouter::new(state.clone(), bus.clone(), ControlLimits::default(), true), state, bus)
    }

    #[test]
    fn over_range_speed_is_clamped() {
        let limits = ControlLimits::default();
        let fast = map_twist(&twist(5.0, -5.0, 3.0, -4.0), &limits);
        assert_eq!(fast.pitch, 2047);
        assert_eq!(fast.roll, -2047);
        assert_eq!(fast.thrust, 4095);
        assert_eq!(fast.yaw, -2047);
        assert_eq!(fast.ctrl, CTRL_ALL_AXES);
    }

    #[test]
    fn in_range_values_scale_linearly() {
        let limits = ControlLimits::default();
        let half = map_twist(&twist(1.5, 0.75, 1.0, FRAC_PI_2 / 2.0), &limits);
        assert_eq!(half.pitch, 1023);
        assert_eq!(half.roll, 511);
        assert_eq!(half.thrust, 2047);
        assert_eq!(half.yaw, 1023);

        let sink = map_twist(&twist(0.0, 0.0, -1.0, 0.0), &limits);
        assert_eq!(sink.thrust, 0);
    }

    #[test]
    fn manual_mode_has_no_side_effect() {
        let (router, state, _) = rig(FlightMode::Attitude as u16);
        let before = state.command_generation();
        assert!(router.handle_twist(&twist(1.0, 0.0, 0.0, 0.0)).is_none());
        assert_eq!(state.command_generation(), before);
        assert!(state.take_pending().is_none());

        let (unknown, state, _) = rig(0x02);
        assert!(unknown.handle_twist(&twist(1.0, 0.0, 0.0, 0.0)).is_none());
        assert!(state.take_pending().is_none());
    }

    #[test]
    fn gps_mode_stages_ctrl_group() {
        let (router, state, _) = rig(FlightMode::Gps as u16);
        let staged = router.handle_twist(&twist(3.0, 0.0, 0.0, 0.0)).unwrap();
        assert_eq!(staged.pitch, 2047);
        let pending = state.take_pending().unwrap();
        assert_eq!(pending.groups, vec![CommandGroup::Ctrl]);
        assert_eq!(pending.cmd.ctrl, staged);
    }

    #[test]
    fn ctrl_mode_service_writes_mode_group_and_announces() {
        let (router, state, bus) = rig(FlightMode::Gps as u16);
        state.update_command(|c| c.motors = [0, 10, 0, 10]);
        let res = router.set_ctrl_mode(&CtrlModeRequest { ctrl_mode: 2, ctrl_enabled: 1, disable_onoff_stick: 0 });
        assert_eq!(res.motors, [0, 10, 0, 10]);

        let pending = state.take_pending().unwrap();
        assert_eq!(pending.groups, vec![CommandGroup::Mode]);
        assert_eq!(pending.cmd.sdk.ctrl_mode, 2);

        assert_eq!(
            *bus.0.lock(),
            vec![
                "Control mode set to two".to_string(),
                "Control mode is enabled".to_string(),
                "On off via stick is disabled".to_string(),
            ]
        );
        assert_eq!(describe_mode(&CtrlModeRequest { ctrl_mode: 9, ctrl_enabled: 0, disable_onoff_stick: 1 })[0], "Control mode set to invalid");
    }
}
