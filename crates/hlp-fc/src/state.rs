use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use crate::waypoint::WaypointRecord;

pub const NUM_MOTORS: usize = 4;
pub const NUM_RC_CHANNELS: usize = 8;

pub const SERIAL_INTERFACE_ENABLED: u16 = 0x20;
pub const SERIAL_INTERFACE_ACTIVE: u16 = 0x40;

/// Flight mode in the low nibble of `uav_status`. Values come from the HLP
/// firmware (sdk.h) and must stay in sync with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FlightMode {
    Attitude = 0x01,
    Height = 0x03,
    Gps = 0x07,
}

impl FlightMode {
    pub const MASK: u16 = 0x000F;

    pub fn from_status(uav_status: u16) -> Option<Self> {
        match uav_status & Self::MASK {
            0x01 => Some(FlightMode::Attitude),
            0x03 => Some(FlightMode::Height),
            0x07 => Some(FlightMode::Gps),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FlightMode::Attitude => "Attitude",
            FlightMode::Height => "Height",
            FlightMode::Gps => "GPS",
        }
    }
}

/// Waypoint state machine running on the HLP (sdk.c). Numbering is fixed by
/// the firmware; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum DeviceState {
    Reset = 0,
    Lock1 = 1,
    Lock2 = 2,
    Lock3 = 3,
    Ready = 4,
    LlpChecking = 5,
}

impl DeviceState {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(DeviceState::Reset),
            1 => Some(DeviceState::Lock1),
            2 => Some(DeviceState::Lock2),
            3 => Some(DeviceState::Lock3),
            4 => Some(DeviceState::Ready),
            5 => Some(DeviceState::LlpChecking),
            _ => None,
        }
    }

    /// READY and LLP_CHECKING accept a new waypoint.
    pub fn accepts_waypoint(raw: u16) -> bool {
        raw >= DeviceState::Ready as u16
    }
}

/// Telemetry side, raw device units. Replaced wholesale once per engine tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    /// Engine tick that produced this record.
    pub tick: u64,
    /// Status group packets received by the link when this record was
    /// taken. Nav status, distance and waypoint state are no newer than this.
    pub status_seq: u64,

    pub uav_status: u16,
    pub flight_time: u16,
    /// mV
    pub battery_voltage: i16,
    pub cpu_load: u16,
    pub up_time: u16,
    pub motor_rpm: [u8; NUM_MOTORS],
    pub channel: [u16; NUM_RC_CHANNELS],

    // fused estimate: 1e-7 deg, mm, mm/s
    pub fusion_latitude: i32,
    pub fusion_longitude: i32,
    pub fusion_dheight: i32,
    pub fusion_height: i32,
    pub fusion_speed_x: i16,
    pub fusion_speed_y: i16,

    pub nav_status: u16,
    /// dm
    pub dist_to_wp: u16,
    pub waypt_state: u16,

    // SDK echo
    pub ctrl_mode: u8,
    pub ctrl_enabled: u8,
    pub disable_motor_onoff_by_stick: u8,

    pub gps_latitude: i32,
    pub gps_longitude: i32,
    pub gps_height: i32,
    pub gps_speed_x: i32,
    pub gps_speed_y: i32,
    /// 1/1000 deg
    pub gps_heading: i32,
    pub gps_position_accuracy: u32,
    pub gps_height_accuracy: u32,
    pub gps_speed_accuracy: u32,
    pub gps_sat_num: u32,
    pub gps_status: i32,

    pub angvel_pitch: i16,
    pub angvel_roll: i16,
    pub angvel_yaw: i16,
    pub acc_x: i16,
    pub acc_y: i16,
    pub acc_z: i16,
    pub hx: i16,
    pub hy: i16,
    pub hz: i16,
    /// 1/1000 deg
    pub angle_pitch: i32,
    pub angle_roll: i32,
    /// 1/1000 deg, 0..360000
    pub angle_yaw: i32,

    pub laser_distance: i32,
}

impl Telemetry {
    pub fn flight_mode(&self) -> Option<FlightMode> {
        FlightMode::from_status(self.uav_status)
    }

    pub fn gps_fix(&self) -> bool {
        self.gps_status & 0x01 != 0
    }
}

/// Command packet groups as configured on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandGroup {
    Mode = 0,
    Ctrl = 1,
    Waypoint = 2,
}

impl CommandGroup {
    pub const ALL: [CommandGroup; 3] = [CommandGroup::Mode, CommandGroup::Ctrl, CommandGroup::Waypoint];

    pub fn id(&self) -> u8 {
        *self as u8
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }

    /// Mode and waypoint writes must be acknowledged by the device.
    pub fn requires_ack(&self) -> bool {
        !matches!(self, CommandGroup::Ctrl)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CtrlInput {
    pub pitch: i16,
    pub roll: i16,
    pub yaw: i16,
    pub thrust: i16,
    /// bit 0..5: pitch, roll, yaw, thrust, height, GPS position under serial control
    pub ctrl: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SdkMode {
    pub ctrl_mode: u8,
    pub ctrl_enabled: u8,
    pub disable_motor_onoff_by_stick: u8,
}

/// Command side, drained to the device by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSide {
    pub sdk: SdkMode,
    pub motors: [u8; NUM_MOTORS],
    pub ctrl: CtrlInput,
    pub waypoint: Option<WaypointRecord>,
}

#[derive(Debug, Default)]
struct CommandSlot {
    cmd: CommandSide,
    dirty: u8,
    generation: u64,
}

/// Commands taken from the command side for one flush.
#[derive(Debug, Clone)]
pub struct PendingCommands {
    pub cmd: CommandSide,
    pub groups: Vec<CommandGroup>,
    pub generation: u64,
}

/// The one record shared between the engine (writer), the publishers and the
/// command paths.
///
/// Telemetry is copy-on-write: the writer fills a private draft and swaps it
/// in under a short exclusive lock, so a reader always holds a record from a
/// single tick. Commands sit behind their own mutex so the control path never
/// contends with telemetry readers.
#[derive(Debug, Default)]
pub struct SharedVehicleState {
    telemetry: RwLock<Arc<Telemetry>>,
    writer: Mutex<()>,
    command: Mutex<CommandSlot>,
    flushed: AtomicU64,
    updates: Mutex<u64>,
    updated: Condvar,
}

pub struct WriteHandle<'a> {
    state: &'a SharedVehicleState,
    draft: Telemetry,
    _writer: MutexGuard<'a, ()>,
}

impl std::ops::Deref for WriteHandle<'_> {
    type Target = Telemetry;

    fn deref(&self) -> &Telemetry {
        &self.draft
    }
}

impl std::ops::DerefMut for WriteHandle<'_> {
    fn deref_mut(&mut self) -> &mut Telemetry {
        &mut self.draft
    }
}

impl WriteHandle<'_> {
    /// Publish the draft as the new telemetry record. Dropping the handle
    /// without committing discards the draft.
    pub fn commit(mut self) -> u64 {
        let tick = self.state.telemetry.read().tick + 1;
        self.draft.tick = tick;
        let fresh = Arc::new(std::mem::take(&mut self.draft));
        *self.state.telemetry.write() = fresh;

        let mut updates = self.state.updates.lock();
        *updates = tick;
        self.state.updated.notify_all();
        tick
    }
}

impl SharedVehicleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> Arc<Telemetry> {
        self.telemetry.read().clone()
    }

    /// Exclusive write access; a second writer blocks until the first handle
    /// is committed or dropped.
    pub fn begin_write(&self) -> WriteHandle<'_> {
        let guard = self.writer.lock();
        let draft = (**self.telemetry.read()).clone();
        WriteHandle { state: self, draft, _writer: guard }
    }

    pub fn read_command(&self) -> CommandSide {
        self.command.lock().cmd.clone()
    }

    /// Mutate the command side and mark `groups` for the next flush. Returns
    /// the generation to pass to `is_flushed`.
    pub fn write_command<R>(&self, groups: &[CommandGroup], f: impl FnOnce(&mut CommandSide) -> R) -> (R, u64) {
        let mut slot = self.command.lock();
        let out = f(&mut slot.cmd);
        for g in groups {
            slot.dirty |= g.bit();
        }
        slot.generation += 1;
        (out, slot.generation)
    }

    /// Local bookkeeping that must not reach the device (no group marked).
    pub fn update_command<R>(&self, f: impl FnOnce(&mut CommandSide) -> R) -> R {
        f(&mut self.command.lock().cmd)
    }

    pub fn command_generation(&self) -> u64 {
        self.command.lock().generation
    }

    pub fn take_pending(&self) -> Option<PendingCommands> {
        let mut slot = self.command.lock();
        if slot.dirty == 0 {
            return None;
        }
        let groups = CommandGroup::ALL.iter().copied().filter(|g| slot.dirty & g.bit() != 0).collect();
        slot.dirty = 0;
        Some(PendingCommands { cmd: slot.cmd.clone(), groups, generation: slot.generation })
    }

    pub fn mark_flushed(&self, generation: u64) {
        self.flushed.fetch_max(generation, Ordering::AcqRel);
        // flushes are observed by waiters on the update condition as well
        let _updates = self.updates.lock();
        self.updated.notify_all();
    }

    pub fn is_flushed(&self, generation: u64) -> bool {
        self.flushed.load(Ordering::Acquire) >= generation
    }

    pub fn last_tick(&self) -> u64 {
        *self.updates.lock()
    }

    /// Block until a tick newer than `seen` is committed or `timeout`
    /// elapses. Returns the latest tick number.
    pub fn wait_for_update(&self, seen: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut updates = self.updates.lock();
        while *updates <= seen {
            if self.updated.wait_until(&mut updates, deadline).timed_out() {
                break;
            }
        }
        *updates
    }

    /// Wake everything blocked in `wait_for_update` (used on shutdown).
    pub fn wake_all(&self) {
        let _updates = self.updates.lock();
        self.updated.notify_all();
    }
}

/// Cooperative stop signal shared by every periodic task.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let mut stopped = self.inner.stopped.lock();
        *stopped = true;
        self.inner.cv.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Sleep until `deadline` unless stopped first. Returns true on stop.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            if self.inner.cv.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_until(Instant::now() + timeout)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub connected: bool,
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub version: Option<String>,
    pub last_rx: Option<Instant>,
    pub fault: Option<String>,
}

impl LinkStatus {
    pub fn rx_age(&self) -> Option<Duration> {
        self.last_rx.map(|t| t.elapsed())
    }
}

pub type SharedLinkStatus = Arc<Mutex<LinkStatus>>;
