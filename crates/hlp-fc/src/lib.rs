pub mod control;
pub mod engine;
pub mod link;
pub mod probe;
pub mod publish;
pub mod session;
pub mod sim;
pub mod state;
pub mod transport;
pub mod units;
pub mod waypoint;

use serde::Deserialize;

pub use control::{ControlCommandRouter, ControlLimits};
pub use engine::{EngineConfig, EngineScheduler};
pub use link::{DeviceLink, HlpLink, LinkError, VersionInfo};
pub use publish::{MessageBus, PublishConfig};
pub use session::Session;
pub use sim::{SimConfig, SimHandle, SimLink};
pub use state::{FlightMode, SharedVehicleState, StopToken};
pub use waypoint::{Preempt, WaypointActionController, WaypointConfig};

fn default_kind() -> String {
    "sim".into()
}
fn default_waypoint_state_address() -> u16 {
    link::addr::WP_STATE_FIRMWARE
}
fn default_negotiate_attempts() -> u32 {
    3
}
fn default_negotiate_retry_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Device link implementation. Only the in-process simulator ships with
    /// this crate; the vendor engine is linked in by the integrator.
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Variable the HLP exports its waypoint state machine on. Firmware in the
    /// field uses 0x101E; the vendor documentation lists 0x100E.
    #[serde(default = "default_waypoint_state_address")]
    pub waypoint_state_address: u16,

    #[serde(default = "default_negotiate_attempts")]
    pub negotiate_attempts: u32,

    #[serde(default = "default_negotiate_retry_ms")]
    pub negotiate_retry_ms: u64,

    /// Version and limits this bridge was built against.
    #[serde(default)]
    pub expected: VersionInfo,

    #[serde(default)]
    pub sim: SimConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            waypoint_state_address: default_waypoint_state_address(),
            negotiate_attempts: default_negotiate_attempts(),
            negotiate_retry_ms: default_negotiate_retry_ms(),
            expected: VersionInfo::LOCAL,
            sim: SimConfig::default(),
        }
    }
}

fn default_device() -> String {
    "/dev/ttyS2".into()
}
fn default_baud() -> u32 {
    57600
}
fn default_probe_window_ms() -> u64 {
    1500
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,

    /// If true, probe candidate ports/bauds and use the first one with traffic.
    #[serde(default)]
    pub probe: bool,

    /// Probe candidates. Example: ["/dev/ttyS2","/dev/ttyUSB0"]
    pub candidate_devs: Option<Vec<String>>,
    pub candidate_bauds: Option<Vec<u32>>,

    /// Listen window per probe attempt
    #[serde(default = "default_probe_window_ms")]
    pub probe_window_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud: default_baud(),
            probe: false,
            candidate_devs: None,
            candidate_bauds: None,
            probe_window_ms: default_probe_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FcConfig {
    #[serde(default)]
    pub link: LinkConfig,

    /// No serial section: the link runs without a byte transport.
    pub serial: Option<SerialConfig>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub control: ControlLimits,

    #[serde(default)]
    pub waypoint: WaypointConfig,
}
