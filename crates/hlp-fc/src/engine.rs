use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, error, info};

use crate::link::{HlpLink, LinkError};
use crate::state::{SharedLinkStatus, SharedVehicleState, StopToken};

fn default_rate() -> u16 {
    100
}
fn default_heartbeat() -> u16 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_rate")]
    pub rate_hz: u16,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_hz: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { rate_hz: default_rate(), heartbeat_hz: default_heartbeat() }
    }
}

impl EngineConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz.max(1) as f64)
    }
}

/// The only writer of the telemetry side. Each period: flush pending
/// commands, tick the link, pull fresh values in one commit.
pub struct EngineScheduler {
    link: Arc<HlpLink>,
    state: Arc<SharedVehicleState>,
    status: SharedLinkStatus,
    stop: StopToken,
    period: Duration,
}

impl EngineScheduler {
    pub fn new(
        link: Arc<HlpLink>,
        state: Arc<SharedVehicleState>,
        status: SharedLinkStatus,
        stop: StopToken,
        cfg: &EngineConfig,
    ) -> Self {
        Self { link, state, status, stop, period: cfg.period() }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<Result<(), LinkError>>> {
        thread::Builder::new().name("hlp-engine".into()).spawn(move || self.run())
    }

    pub fn run(&self) -> Result<(), LinkError> {
        info!("engine: running at {:.1} Hz", 1.0 / self.period.as_secs_f64());
        let mut deadline = Instant::now() + self.period;
        loop {
            // timeout is the normal case; a signal means stop
            if self.stop.wait_until(deadline) {
                debug!("engine: stop requested");
                return Ok(());
            }
            deadline += self.period;
            let now = Instant::now();
            if deadline < now {
                // overran: skip missed periods instead of bursting
                deadline = now + self.period;
            }

            if let Err(e) = self.step() {
                error!("engine: halted: {}", e);
                {
                    let mut st = self.status.lock();
                    st.connected = false;
                    st.fault.get_or_insert_with(|| format!("engine: {}", e));
                }
                // wake goal pollers so they notice the fault
                self.state.wake_all();
                return Err(e);
            }
        }
    }

    /// One engine period.
    pub fn step(&self) -> Result<bool, LinkError> {
        if self.status.lock().fault.is_some() {
            return Err(LinkError::Closed);
        }

        if let Some(pending) = self.state.take_pending() {
            self.link.flush(&pending.cmd, &pending.groups)?;
            self.state.mark_flushed(pending.generation);
        }

        let fresh = self.link.tick()?;
        if fresh {
            let mut draft = self.state.begin_write();
            self.link.synchronize(&mut draft);
            draft.commit();
            let mut st = self.status.lock();
            st.connected = true;
            st.last_rx = Some(Instant::now());
        }
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::addr;
    use crate::link::tests::ScriptedLink;
    use crate::state::CommandGroup;

    fn engine(scripted: ScriptedLink) -> (EngineScheduler, Arc<SharedVehicleState>, SharedLinkStatus, StopToken) {
        let link = Arc::new(HlpLink::new(Box::new(scripted), addr::WP_STATE_FIRMWARE));
        let state = Arc::new(SharedVehicleState::new());
        let status = SharedLinkStatus::default();
        let stop = StopToken::new();
        let cfg = EngineConfig { rate_hz: 200, heartbeat_hz: 10 };
        (EngineScheduler::new(link, state.clone(), status.clone(), stop.clone(), &cfg), state, status, stop)
    }

    #[test]
    fn step_flushes_then_commits_fresh_data() {
        let mut scripted = ScriptedLink { fresh: true, ..Default::default() };
        scripted.values.insert(addr::BATTERY_VOLTAGE, 11_900);
        let flushed = scripted.flushed.clone();
        let (engine, state, status, _) = engine(scripted);

        let (_, gen) = state.write_command(&[CommandGroup::Ctrl], |c| c.ctrl.thrust = 1000);
        assert!(engine.step().unwrap());
        assert!(state.is_flushed(gen));
        assert_eq!(flushed.lock().len(), 1);
        assert_eq!(state.read().battery_voltage, 11_900);
        assert_eq!(state.read().tick, 1);
        assert!(status.lock().connected);
    }

    #[test]
    fn stale_tick_leaves_snapshot_alone() {
        let (engine, state, _, _) = engine(ScriptedLink::default());
        assert!(!engine.step().unwrap());
        assert_eq!(state.last_tick(), 0);
    }

    #[test]
    fn transport_error_halts_the_engine() {
        let (engine, _, status, _) = engine(ScriptedLink { fail_tick: true, ..Default::default() });
        let err = engine.run().unwrap_err();
        assert!(matches!(err, LinkError::Transport(_)));
        assert!(!status.lock().connected);
    }

    #[test]
    fn recorded_fault_stops_ticking() {
        let (engine, _, status, _) = engine(ScriptedLink { fresh: true, ..Default::default() });
        status.lock().fault = Some("read: gone".into());
        assert!(matches!(engine.step(), Err(LinkError::Closed)));
    }

    #[test]
    fn stop_exits_without_a_final_tick() {
        let (engine, state, _, stop) = engine(ScriptedLink { fresh: true, ..Default::default() });
        let handle = engine.spawn().unwrap();
        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        stop.stop();
        handle.join().unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));

        let ticks_at_stop = state.last_tick();
        assert!(ticks_at_stop > 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(state.last_tick(), ticks_at_stop);
    }
}
