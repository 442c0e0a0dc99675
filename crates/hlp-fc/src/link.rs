use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::state::{CommandGroup, CommandSide, StopToken, Telemetry};

/// Telemetry (variable) packet groups. Each one is sent by the device at its
/// own rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TelemetryGroup {
    Status = 0,
    Gps = 1,
    ImuMag = 2,
    Aux = 3,
}

impl TelemetryGroup {
    pub fn id(&self) -> u8 {
        *self as u8
    }
}

/// HLP variable and command addresses.
pub mod addr {
    pub const UAV_STATUS: u16 = 0x0001;
    pub const FLIGHT_TIME: u16 = 0x0002;
    pub const BATTERY_VOLTAGE: u16 = 0x0003;
    pub const HL_CPU_LOAD: u16 = 0x0004;
    pub const HL_UP_TIME: u16 = 0x0005;
    pub const MOTOR_RPM: u16 = 0x0100;
    pub const GPS_LATITUDE: u16 = 0x0106;
    pub const GPS_LONGITUDE: u16 = 0x0107;
    pub const GPS_HEIGHT: u16 = 0x0108;
    pub const GPS_SPEED_X: u16 = 0x0109;
    pub const GPS_SPEED_Y: u16 = 0x010A;
    pub const GPS_HEADING: u16 = 0x010B;
    pub const GPS_POSITION_ACCURACY: u16 = 0x010C;
    pub const GPS_HEIGHT_ACCURACY: u16 = 0x010D;
    pub const GPS_SPEED_ACCURACY: u16 = 0x010E;
    pub const GPS_SAT_NUM: u16 = 0x010F;
    pub const GPS_STATUS: u16 = 0x0110;
    pub const ANGVEL_PITCH: u16 = 0x0200;
    pub const ANGVEL_ROLL: u16 = 0x0201;
    pub const ANGVEL_YAW: u16 = 0x0202;
    pub const ACC_X: u16 = 0x0203;
    pub const ACC_Y: u16 = 0x0204;
    pub const ACC_Z: u16 = 0x0205;
    pub const HX: u16 = 0x0206;
    pub const HY: u16 = 0x0207;
    pub const HZ: u16 = 0x0208;
    pub const ANGLE_PITCH: u16 = 0x0300;
    pub const ANGLE_ROLL: u16 = 0x0301;
    pub const ANGLE_YAW: u16 = 0x0302;
    pub const FUSION_LATITUDE: u16 = 0x0303;
    pub const FUSION_LONGITUDE: u16 = 0x0304;
    pub const FUSION_DHEIGHT: u16 = 0x0305;
    pub const FUSION_HEIGHT: u16 = 0x0306;
    pub const FUSION_SPEED_X: u16 = 0x0307;
    pub const FUSION_SPEED_Y: u16 = 0x0308;
    pub const RC_CHANNEL: u16 = 0x0600;
    pub const LASER_DISTANCE: u16 = 0x1001;
    pub const WP_NAV_STATUS: u16 = 0x100C;
    pub const WP_DIST_TO_WP: u16 = 0x100D;
    /// Waypoint state as documented by the firmware sources.
    pub const WP_STATE_DOCUMENTED: u16 = 0x100E;
    /// Waypoint state as actually exported by current firmware builds.
    pub const WP_STATE_FIRMWARE: u16 = 0x101E;
    pub const SDK_CTRL_MODE: u16 = 0x100F;
    pub const SDK_CTRL_ENABLED: u16 = 0x1010;
    pub const SDK_DISABLE_ONOFF: u16 = 0x1011;

    pub const CMD_CTRL_MODE: u16 = 0x0600;
    pub const CMD_CTRL_ENABLED: u16 = 0x0601;
    pub const CMD_DISABLE_ONOFF: u16 = 0x0602;
    pub const CMD_MOTOR: u16 = 0x0500;
    pub const CMD_PITCH: u16 = 0x050A;
    pub const CMD_ROLL: u16 = 0x050B;
    pub const CMD_YAW: u16 = 0x050C;
    pub const CMD_THRUST: u16 = 0x050D;
    pub const CMD_CTRL: u16 = 0x050E;
    pub const CMD_WP_ACTIVATED: u16 = 0x1001;
    pub const CMD_WP_PROPERTIES: u16 = 0x1002;
    pub const CMD_WP_MAX_SPEED: u16 = 0x1003;
    pub const CMD_WP_TIME: u16 = 0x1004;
    pub const CMD_WP_POS_ACC: u16 = 0x1005;
    pub const CMD_WP_CHKSUM: u16 = 0x1006;
    pub const CMD_WP_X: u16 = 0x1007;
    pub const CMD_WP_Y: u16 = 0x1008;
    pub const CMD_WP_YAW: u16 = 0x1009;
    pub const CMD_WP_HEIGHT: u16 = 0x100A;
    pub const CMD_WP_CMD: u16 = 0x100B;
}

/// Version and protocol limits exchanged during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct VersionInfo {
    pub ver_major: u16,
    pub ver_minor: u16,
    pub max_desc_length: u16,
    pub max_name_length: u16,
    pub max_unit_length: u16,
    pub max_var_packets: u16,
}

impl VersionInfo {
    pub const LOCAL: VersionInfo = VersionInfo {
        ver_major: 0,
        ver_minor: 1,
        max_desc_length: 64,
        max_name_length: 32,
        max_unit_length: 32,
        max_var_packets: 4,
    };

    /// Names of the entries that differ from `other`.
    pub fn mismatches(&self, other: &VersionInfo) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.ver_major != other.ver_major {
            out.push("major version");
        }
        if self.ver_minor != other.ver_minor {
            out.push("minor version");
        }
        if self.max_desc_length != other.max_desc_length {
            out.push("MAX_DESC_LENGTH");
        }
        if self.max_name_length != other.max_name_length {
            out.push("MAX_NAME_LENGTH");
        }
        if self.max_unit_length != other.max_unit_length {
            out.push("MAX_UNIT_LENGTH");
        }
        if self.max_var_packets != other.max_var_packets {
            out.push("MAX_VAR_PACKETS");
        }
        out
    }
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self::LOCAL
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.ver_major, self.ver_minor)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("device/remote mismatch: {0}")]
    VersionMismatch(String),
    #[error("device lists not received after {0} attempts")]
    NegotiationTimeout(u32),
    #[error("address 0x{0:04X} not offered by device")]
    UnknownAddress(u16),
    #[error("transport: {0}")]
    Transport(#[from] io::Error),
    #[error("link closed")]
    Closed,
}

/// Outbound byte sink handed to a link at registration time.
pub type TransmitFn = Box<dyn FnMut(&[u8]) -> io::Result<()> + Send>;

/// The vendor communication engine. Implementations own the wire protocol;
/// this crate only deals in addresses and raw values.
pub trait DeviceLink: Send {
    /// Request versions and address lists. `Ok(None)` while the device is
    /// still sending its lists.
    fn negotiate(&mut self) -> Result<Option<VersionInfo>, LinkError>;

    fn set_engine_rate(&mut self, rate_hz: u16, heartbeat_hz: u16);

    fn define_telemetry_address(&mut self, group: u8, addr: u16) -> Result<(), LinkError>;

    fn define_command_address(&mut self, group: u8, addr: u16, requires_ack: bool) -> Result<(), LinkError>;

    fn set_group_rate(&mut self, group: u8, hz: u16) -> Result<(), LinkError>;

    /// Stage a value for a command address; sent on `flush_command_group`.
    fn write_address(&mut self, addr: u16, raw: i32);

    /// Latest value received for a telemetry address.
    fn read_address(&self, addr: u16) -> Option<i32>;

    fn flush_command_group(&mut self, group: u8) -> Result<(), LinkError>;

    /// Run one engine step. Returns true when new telemetry arrived.
    fn tick(&mut self) -> Result<bool, LinkError>;

    /// Packets received so far for a telemetry group.
    fn group_packets(&self, group: u8) -> u64;

    fn attach_transmit(&mut self, _tx: TransmitFn) {}

    fn receive(&mut self, _bytes: &[u8]) {}
}

pub type SharedDeviceLink = Arc<Mutex<Box<dyn DeviceLink>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryField {
    UavStatus,
    FlightTime,
    BatteryVoltage,
    CpuLoad,
    UpTime,
    MotorRpm(usize),
    Channel(usize),
    FusionLatitude,
    FusionLongitude,
    FusionDHeight,
    FusionHeight,
    FusionSpeedX,
    FusionSpeedY,
    NavStatus,
    DistToWp,
    WayptState,
    CtrlMode,
    CtrlEnabled,
    DisableOnOff,
    GpsLatitude,
    GpsLongitude,
    GpsHeight,
    GpsSpeedX,
    GpsSpeedY,
    GpsHeading,
    GpsPositionAccuracy,
    GpsHeightAccuracy,
    GpsSpeedAccuracy,
    GpsSatNum,
    GpsStatus,
    AngvelPitch,
    AngvelRoll,
    AngvelYaw,
    AccX,
    AccY,
    AccZ,
    Hx,
    Hy,
    Hz,
    AnglePitch,
    AngleRoll,
    AngleYaw,
    LaserDistance,
}

impl TelemetryField {
    /// Store a raw value, truncating to the field's device width. Attitude
    /// angles are 32 bit on the device and kept whole.
    pub fn apply(self, t: &mut Telemetry, raw: i32) {
        use TelemetryField::*;
        match self {
            UavStatus => t.uav_status = raw as u16,
            FlightTime => t.flight_time = raw as u16,
            BatteryVoltage => t.battery_voltage = raw as i16,
            CpuLoad => t.cpu_load = raw as u16,
            UpTime => t.up_time = raw as u16,
            MotorRpm(i) => t.motor_rpm[i] = raw as u8,
            Channel(i) => t.channel[i] = raw as u16,
            FusionLatitude => t.fusion_latitude = raw,
            FusionLongitude => t.fusion_longitude = raw,
            FusionDHeight => t.fusion_dheight = raw,
            FusionHeight => t.fusion_height = raw,
            FusionSpeedX => t.fusion_speed_x = raw as i16,
            FusionSpeedY => t.fusion_speed_y = raw as i16,
            NavStatus => t.nav_status = raw as u16,
            DistToWp => t.dist_to_wp = raw as u16,
            WayptState => t.waypt_state = raw as u16,
            CtrlMode => t.ctrl_mode = raw as u8,
            CtrlEnabled => t.ctrl_enabled = raw as u8,
            DisableOnOff => t.disable_motor_onoff_by_stick = raw as u8,
            GpsLatitude => t.gps_latitude = raw,
            GpsLongitude => t.gps_longitude = raw,
            GpsHeight => t.gps_height = raw,
            GpsSpeedX => t.gps_speed_x = raw,
            GpsSpeedY => t.gps_speed_y = raw,
            GpsHeading => t.gps_heading = raw,
            GpsPositionAccuracy => t.gps_position_accuracy = raw as u32,
            GpsHeightAccuracy => t.gps_height_accuracy = raw as u32,
            GpsSpeedAccuracy => t.gps_speed_accuracy = raw as u32,
            GpsSatNum => t.gps_sat_num = raw as u32,
            GpsStatus => t.gps_status = raw,
            AngvelPitch => t.angvel_pitch = raw as i16,
            AngvelRoll => t.angvel_roll = raw as i16,
            AngvelYaw => t.angvel_yaw = raw as i16,
            AccX => t.acc_x = raw as i16,
            AccY => t.acc_y = raw as i16,
            AccZ => t.acc_z = raw as i16,
            Hx => t.hx = raw as i16,
            Hy => t.hy = raw as i16,
            Hz => t.hz = raw as i16,
            AnglePitch => t.angle_pitch = raw,
            AngleRoll => t.angle_roll = raw,
            AngleYaw => t.angle_yaw = raw,
            LaserDistance => t.laser_distance = raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandField {
    CtrlMode,
    CtrlEnabled,
    DisableOnOff,
    Motor(usize),
    Pitch,
    Roll,
    Yaw,
    Thrust,
    Ctrl,
    WpActivated,
    WpProperties,
    WpMaxSpeed,
    WpTime,
    WpPosAcc,
    WpChksum,
    WpX,
    WpY,
    WpYaw,
    WpHeight,
    WpCmd,
}

impl CommandField {
    /// Raw value to send; waypoint fields are absent without a pending record.
    pub fn read(self, c: &CommandSide) -> Option<i32> {
        use CommandField::*;
        let v = match self {
            CtrlMode => c.sdk.ctrl_mode as i32,
            CtrlEnabled => c.sdk.ctrl_enabled as i32,
            DisableOnOff => c.sdk.disable_motor_onoff_by_stick as i32,
            Motor(i) => c.motors[i] as i32,
            Pitch => c.ctrl.pitch as i32,
            Roll => c.ctrl.roll as i32,
            Yaw => c.ctrl.yaw as i32,
            Thrust => c.ctrl.thrust as i32,
            Ctrl => c.ctrl.ctrl as i32,
            _ => {
                let wp = c.waypoint.as_ref()?;
                match self {
                    WpActivated => wp.wp_activated as i32,
                    WpProperties => wp.properties as i32,
                    WpMaxSpeed => wp.max_speed as i32,
                    WpTime => wp.time as i32,
                    WpPosAcc => wp.pos_acc as i32,
                    WpChksum => wp.chksum as i32,
                    WpX => wp.x,
                    WpY => wp.y,
                    WpYaw => wp.yaw,
                    WpHeight => wp.height,
                    _ => wp.command as i32,
                }
            }
        };
        Some(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryBinding {
    pub group: TelemetryGroup,
    pub addr: u16,
    pub field: TelemetryField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBinding {
    pub group: CommandGroup,
    pub addr: u16,
    pub field: CommandField,
}

pub fn telemetry_bindings(waypt_state_addr: u16) -> Vec<TelemetryBinding> {
    use TelemetryField as F;
    use TelemetryGroup as G;

    let mut out = Vec::new();
    let mut bind = |group, addr, field| out.push(TelemetryBinding { group, addr, field });

    bind(G::Status, addr::UAV_STATUS, F::UavStatus);
    bind(G::Status, addr::FLIGHT_TIME, F::FlightTime);
    bind(G::Status, addr::BATTERY_VOLTAGE, F::BatteryVoltage);
    bind(G::Status, addr::HL_CPU_LOAD, F::CpuLoad);
    bind(G::Status, addr::HL_UP_TIME, F::UpTime);
    for i in 0..crate::state::NUM_MOTORS {
        bind(G::Status, addr::MOTOR_RPM + i as u16, F::MotorRpm(i));
    }
    for i in 0..crate::state::NUM_RC_CHANNELS {
        bind(G::Status, addr::RC_CHANNEL + i as u16, F::Channel(i));
    }
    bind(G::Status, addr::FUSION_LATITUDE, F::FusionLatitude);
    bind(G::Status, addr::FUSION_LONGITUDE, F::FusionLongitude);
    bind(G::Status, addr::FUSION_DHEIGHT, F::FusionDHeight);
    bind(G::Status, addr::FUSION_HEIGHT, F::FusionHeight);
    bind(G::Status, addr::FUSION_SPEED_X, F::FusionSpeedX);
    bind(G::Status, addr::FUSION_SPEED_Y, F::FusionSpeedY);
    bind(G::Status, addr::WP_NAV_STATUS, F::NavStatus);
    bind(G::Status, addr::WP_DIST_TO_WP, F::DistToWp);
    bind(G::Status, waypt_state_addr, F::WayptState);
    bind(G::Status, addr::SDK_CTRL_MODE, F::CtrlMode);
    bind(G::Status, addr::SDK_CTRL_ENABLED, F::CtrlEnabled);
    bind(G::Status, addr::SDK_DISABLE_ONOFF, F::DisableOnOff);

    bind(G::Gps, addr::GPS_LATITUDE, F::GpsLatitude);
    bind(G::Gps, addr::GPS_LONGITUDE, F::GpsLongitude);
    bind(G::Gps, addr::GPS_HEIGHT, F::GpsHeight);
    bind(G::Gps, addr::GPS_SPEED_X, F::GpsSpeedX);
    bind(G::Gps, addr::GPS_SPEED_Y, F::GpsSpeedY);
    bind(G::Gps, addr::GPS_HEADING, F::GpsHeading);
    bind(G::Gps, addr::GPS_POSITION_ACCURACY, F::GpsPositionAccuracy);
    bind(G::Gps, addr::GPS_HEIGHT_ACCURACY, F::GpsHeightAccuracy);
    bind(G::Gps, addr::GPS_SPEED_ACCURACY, F::GpsSpeedAccuracy);
    bind(G::Gps, addr::GPS_SAT_NUM, F::GpsSatNum);
    bind(G::Gps, addr::GPS_STATUS, F::GpsStatus);

    bind(G::ImuMag, addr::ANGVEL_PITCH, F::AngvelPitch);
    bind(G::ImuMag, addr::ANGVEL_ROLL, F::AngvelRoll);
    bind(G::ImuMag, addr::ANGVEL_YAW, F::AngvelYaw);
    bind(G::ImuMag, addr::ACC_X, F::AccX);
    bind(G::ImuMag, addr::ACC_Y, F::AccY);
    bind(G::ImuMag, addr::ACC_Z, F::AccZ);
    bind(G::ImuMag, addr::HX, F::Hx);
    bind(G::ImuMag, addr::HY, F::Hy);
    bind(G::ImuMag, addr::HZ, F::Hz);
    bind(G::ImuMag, addr::ANGLE_PITCH, F::AnglePitch);
    bind(G::ImuMag, addr::ANGLE_ROLL, F::AngleRoll);
    bind(G::ImuMag, addr::ANGLE_YAW, F::AngleYaw);

    bind(G::Aux, addr::LASER_DISTANCE, F::LaserDistance);
    out
}

pub fn command_bindings() -> Vec<CommandBinding> {
    use CommandField as F;
    use CommandGroup as G;

    let mut out = Vec::new();
    let mut bind = |group, addr, field| out.push(CommandBinding { group, addr, field });

    bind(G::Mode, addr::CMD_CTRL_MODE, F::CtrlMode);
    bind(G::Mode, addr::CMD_CTRL_ENABLED, F::CtrlEnabled);
    bind(G::Mode, addr::CMD_DISABLE_ONOFF, F::DisableOnOff);
    for i in 0..crate::state::NUM_MOTORS {
        bind(G::Mode, addr::CMD_MOTOR + i as u16, F::Motor(i));
    }

    bind(G::Ctrl, addr::CMD_PITCH, F::Pitch);
    bind(G::Ctrl, addr::CMD_ROLL, F::Roll);
    bind(G::Ctrl, addr::CMD_YAW, F::Yaw);
    bind(G::Ctrl, addr::CMD_THRUST, F::Thrust);
    bind(G::Ctrl, addr::CMD_CTRL, F::Ctrl);

    bind(G::Waypoint, addr::CMD_WP_ACTIVATED, F::WpActivated);
    bind(G::Waypoint, addr::CMD_WP_PROPERTIES, F::WpProperties);
    bind(G::Waypoint, addr::CMD_WP_MAX_SPEED, F::WpMaxSpeed);
    bind(G::Waypoint, addr::CMD_WP_TIME, F::WpTime);
    bind(G::Waypoint, addr::CMD_WP_POS_ACC, F::WpPosAcc);
    bind(G::Waypoint, addr::CMD_WP_CHKSUM, F::WpChksum);
    bind(G::Waypoint, addr::CMD_WP_X, F::WpX);
    bind(G::Waypoint, addr::CMD_WP_Y, F::WpY);
    bind(G::Waypoint, addr::CMD_WP_YAW, F::WpYaw);
    bind(G::Waypoint, addr::CMD_WP_HEIGHT, F::WpHeight);
    bind(G::Waypoint, addr::CMD_WP_CMD, F::WpCmd);
    out
}

/// Per-group telemetry rates requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupRates {
    pub status_hz: u16,
    pub gps_hz: u16,
    pub imu_mag_hz: u16,
    pub aux_hz: u16,
}

impl GroupRates {
    pub fn rate_of(&self, group: TelemetryGroup) -> u16 {
        match group {
            TelemetryGroup::Status => self.status_hz,
            TelemetryGroup::Gps => self.gps_hz,
            TelemetryGroup::ImuMag => self.imu_mag_hz,
            TelemetryGroup::Aux => self.aux_hz,
        }
    }
}

/// Maps the shared vehicle state onto a device link's addresses.
pub struct HlpLink {
    link: SharedDeviceLink,
    telemetry: Vec<TelemetryBinding>,
    commands: Vec<CommandBinding>,
}

impl HlpLink {
    pub fn new(link: Box<dyn DeviceLink>, waypt_state_addr: u16) -> Self {
        if waypt_state_addr != addr::WP_STATE_FIRMWARE {
            info!("link: waypoint state bound at 0x{:04X} (firmware default 0x{:04X})", waypt_state_addr, addr::WP_STATE_FIRMWARE);
        }
        Self {
            link: Arc::new(Mutex::new(link)),
            telemetry: telemetry_bindings(waypt_state_addr),
            commands: command_bindings(),
        }
    }

    pub fn shared(&self) -> SharedDeviceLink {
        self.link.clone()
    }

    pub fn set_engine_rate(&self, rate_hz: u16, heartbeat_hz: u16) {
        self.link.lock().set_engine_rate(rate_hz, heartbeat_hz);
    }

    /// Wait for the device lists and check versions. A mismatch is returned
    /// immediately; only an incomplete handshake is retried.
    pub fn negotiate(
        &self,
        expected: &VersionInfo,
        attempts: u32,
        retry: Duration,
        stop: &StopToken,
    ) -> Result<VersionInfo, LinkError> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            let got = self.link.lock().negotiate()?;
            if let Some(device) = got {
                info!("link: received versions from HLP");
                info!("link: {:<16} {:>6} {:>6}", "type", "device", "remote");
                info!("link: {:<16} {:>6} {:>6}", "major version", device.ver_major, expected.ver_major);
                info!("link: {:<16} {:>6} {:>6}", "minor version", device.ver_minor, expected.ver_minor);
                info!("link: {:<16} {:>6} {:>6}", "MAX_DESC_LENGTH", device.max_desc_length, expected.max_desc_length);
                info!("link: {:<16} {:>6} {:>6}", "MAX_NAME_LENGTH", device.max_name_length, expected.max_name_length);
                info!("link: {:<16} {:>6} {:>6}", "MAX_UNIT_LENGTH", device.max_unit_length, expected.max_unit_length);
                info!("link: {:<16} {:>6} {:>6}", "MAX_VAR_PACKETS", device.max_var_packets, expected.max_var_packets);

                let diff = device.mismatches(expected);
                if !diff.is_empty() {
                    error!("link: versions do not match ({}), must abort", diff.join(", "));
                    return Err(LinkError::VersionMismatch(diff.join(", ")));
                }
                return Ok(device);
            }
            if attempt < attempts {
                warn!("link: device lists incomplete (attempt {}/{}), retrying in {:?}", attempt, attempts, retry);
                if stop.wait_timeout(retry) {
                    return Err(LinkError::Closed);
                }
            }
        }
        Err(LinkError::NegotiationTimeout(attempts))
    }

    /// Define every variable and command address and request group rates.
    /// Addresses the device does not offer are logged and skipped.
    pub fn configure(&self, rates: &GroupRates) -> Result<(), LinkError> {
        let mut link = self.link.lock();

        for b in &self.telemetry {
            match link.define_telemetry_address(b.group.id(), b.addr) {
                Ok(()) => {}
                Err(LinkError::UnknownAddress(a)) => {
                    warn!("link: variable 0x{:04X} ({:?}) not offered by device, field stays zero", a, b.field)
                }
                Err(e) => return Err(e),
            }
        }
        for g in [TelemetryGroup::Status, TelemetryGroup::Gps, TelemetryGroup::ImuMag, TelemetryGroup::Aux] {
            link.set_group_rate(g.id(), rates.rate_of(g))?;
            debug!("link: variable group {:?} at {} Hz", g, rates.rate_of(g));
        }
        info!("link: variable packets configured");

        for b in &self.commands {
            match link.define_command_address(b.group.id(), b.addr, b.group.requires_ack()) {
                Ok(()) => {}
                Err(LinkError::UnknownAddress(a)) => {
                    warn!("link: command 0x{:04X} ({:?}) not offered by device", a, b.field)
                }
                Err(e) => return Err(e),
            }
        }
        info!("link: command packets configured");
        Ok(())
    }

    /// Stage and send the given command groups.
    pub fn flush(&self, cmd: &CommandSide, groups: &[CommandGroup]) -> Result<(), LinkError> {
        let mut link = self.link.lock();
        for g in groups {
            let mut staged = 0;
            for b in self.commands.iter().filter(|b| b.group == *g) {
                if let Some(v) = b.field.read(cmd) {
                    link.write_address(b.addr, v);
                    staged += 1;
                }
            }
            if staged > 0 {
                link.flush_command_group(g.id())?;
            }
        }
        Ok(())
    }

    pub fn tick(&self) -> Result<bool, LinkError> {
        self.link.lock().tick()
    }

    /// Copy the latest received values into a telemetry draft.
    pub fn synchronize(&self, draft: &mut Telemetry) {
        let link = self.link.lock();
        for b in &self.telemetry {
            if let Some(v) = link.read_address(b.addr) {
                b.field.apply(draft, v);
            }
        }
        draft.status_seq = link.group_packets(TelemetryGroup::Status.id());
    }
}
