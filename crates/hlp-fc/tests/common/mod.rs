#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hlp_fc::{FcConfig, MessageBus, Session, SimConfig, SimHandle, SimLink};
use hlp_nav::GeofenceGuard;
use hlp_proto::{CtrlModeRequest, Outbound, Topic};
use parking_lot::Mutex;

/// Bus with a consumer on every topic; keeps everything it is given.
#[derive(Default)]
pub struct RecordingBus {
    pub seen: Mutex<Vec<Outbound>>,
}

impl RecordingBus {
    pub fn count(&self, topic: Topic) -> usize {
        self.seen.lock().iter().filter(|m| m.topic() == topic).count()
    }

    pub fn announcements(&self) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .filter_map(|m| match m {
                Outbound::Announce(a) => Some(a.text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl MessageBus for RecordingBus {
    fn has_consumers(&self, _topic: Topic) -> bool {
        true
    }

    fn publish(&self, msg: Outbound) {
        self.seen.lock().push(msg);
    }
}

/// Fast rates so a bench session settles in well under a second.
pub fn bench_config() -> FcConfig {
    let mut cfg = FcConfig::default();
    cfg.engine.rate_hz = 200;
    cfg.publish.imu_mag_hz = 50;
    cfg.publish.gps_hz = 20;
    cfg.publish.status_hz = 50;
    cfg.publish.aux_hz = 20;
    cfg.waypoint.iteration_rate_hz = 50;
    cfg.link.negotiate_retry_ms = 10;
    cfg
}

pub struct Bench {
    pub session: Session,
    pub sim: SimHandle,
    pub bus: Arc<RecordingBus>,
}

pub fn start_with(cfg: FcConfig, sim_cfg: SimConfig) -> anyhow::Result<Bench> {
    let (link, sim) = SimLink::new(sim_cfg);
    let bus = Arc::new(RecordingBus::default());
    let session = Session::start(&cfg, Box::new(link), None, bus.clone(), Arc::new(GeofenceGuard::new()))?;
    Ok(Bench { session, sim, bus })
}

pub fn start() -> Bench {
    start_with(bench_config(), SimConfig::default()).unwrap()
}

pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Put the HLP into waypoint control and wait for the echo.
pub fn enable_waypoint_control(bench: &Bench) {
    bench.session.router().set_ctrl_mode(&CtrlModeRequest { ctrl_mode: 3, ctrl_enabled: 1, disable_onoff_stick: 0 });
    let state = bench.session.state().clone();
    assert!(wait_for(Duration::from_secs(2), || {
        let t = state.read();
        t.ctrl_mode == 3 && t.ctrl_enabled == 1
    }));
}
