use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use hlp_nav::GeofenceGuard;
use tracing::{error, info, warn};

use crate::control::ControlCommandRouter;
use crate::engine::EngineScheduler;
use crate::link::{DeviceLink, HlpLink, LinkError, VersionInfo};
use crate::publish::{publishers, spawn_publisher, MessageBus};
use crate::state::{LinkStatus, SharedLinkStatus, SharedVehicleState, StopToken};
use crate::transport::{spawn_reader, transmitter, ByteTransport};
use crate::waypoint::WaypointActionController;
use crate::FcConfig;

/// A negotiated, configured link with its engine and publishers running.
///
/// Nothing is published unless negotiation succeeded. Dropping the session
/// shuts it down.
pub struct Session {
    state: Arc<SharedVehicleState>,
    status: SharedLinkStatus,
    stop: StopToken,
    link: Arc<HlpLink>,
    geofence: Arc<GeofenceGuard>,
    router: Arc<ControlCommandRouter>,
    waypoints: Arc<WaypointActionController>,
    version: VersionInfo,
    transport: Option<Arc<dyn ByteTransport>>,
    reader: Option<JoinHandle<()>>,
    engine: Option<JoinHandle<Result<(), LinkError>>>,
    publishers: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn start(
        cfg: &FcConfig,
        device: Box<dyn DeviceLink>,
        transport: Option<Arc<dyn ByteTransport>>,
        bus: Arc<dyn MessageBus>,
        geofence: Arc<GeofenceGuard>,
    ) -> Result<Session> {
        let state = Arc::new(SharedVehicleState::new());
        let status = SharedLinkStatus::default();
        let stop = StopToken::new();
        let link = Arc::new(HlpLink::new(device, cfg.link.waypoint_state_address));

        let mut reader = None;
        if let Some(t) = &transport {
            status.lock().port = Some(t.describe());
            link.shared().lock().attach_transmit(transmitter(t.clone(), status.clone()));
            match spawn_reader(t.clone(), link.shared(), status.clone(), stop.clone()) {
                Ok(h) => reader = Some(h),
                Err(e) => {
                    error!("session: failed to spawn transport reader: {}", e);
                    t.close();
                    return Err(e).context("spawn transport reader");
                }
            }
        }

        link.set_engine_rate(cfg.engine.rate_hz, cfg.engine.heartbeat_hz);

        let retry = Duration::from_millis(cfg.link.negotiate_retry_ms);
        let negotiated = link
            .negotiate(&cfg.link.expected, cfg.link.negotiate_attempts, retry, &stop)
            .and_then(|version| link.configure(&cfg.publish.rates()).map(|()| version));
        let version = match negotiated {
            Ok(v) => v,
            Err(e) => {
                teardown(&stop, transport.as_deref(), reader);
                return Err(anyhow!(e)).context("HLP link setup failed");
            }
        };
        {
            let mut st = status.lock();
            st.version = Some(version.to_string());
            st.connected = true;
        }

        let engine = match EngineScheduler::new(link.clone(), state.clone(), status.clone(), stop.clone(), &cfg.engine).spawn() {
            Ok(h) => h,
            Err(e) => {
                error!("session: failed to spawn engine thread: {}", e);
                teardown(&stop, transport.as_deref(), reader);
                bail!("engine thread not started: {}", e);
            }
        };

        let mut handles = Vec::new();
        for (publisher, rate) in publishers(&cfg.publish) {
            let group = publisher.group();
            match spawn_publisher(publisher, rate, state.clone(), bus.clone(), stop.clone()) {
                Ok(h) => handles.push(h),
                // the remaining groups keep publishing
                Err(e) => error!("session: failed to spawn {:?} publisher: {}", group, e),
            }
        }

        let router = Arc::new(ControlCommandRouter::new(
            state.clone(),
            bus,
            cfg.control.clone(),
            cfg.publish.externalise_state,
        ));
        let waypoints = Arc::new(WaypointActionController::new(
            state.clone(),
            geofence.clone(),
            status.clone(),
            stop.clone(),
            cfg.waypoint.clone(),
        ));

        info!("session: HLP {} up, {} publisher group(s) running", version, handles.len());
        Ok(Session {
            state,
            status,
            stop,
            link,
            geofence,
            router,
            waypoints,
            version,
            transport,
            reader,
            engine: Some(engine),
            publishers: handles,
        })
    }

    pub fn state(&self) -> &Arc<SharedVehicleState> {
        &self.state
    }

    pub fn router(&self) -> &Arc<ControlCommandRouter> {
        &self.router
    }

    pub fn waypoints(&self) -> &Arc<WaypointActionController> {
        &self.waypoints
    }

    pub fn geofence(&self) -> &Arc<GeofenceGuard> {
        &self.geofence
    }

    pub fn link(&self) -> &Arc<HlpLink> {
        &self.link
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn version(&self) -> VersionInfo {
        self.version
    }

    pub fn link_status(&self) -> LinkStatus {
        self.status.lock().clone()
    }

    /// False once the engine has halted, on stop or on a link fault.
    pub fn is_running(&self) -> bool {
        self.engine.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Stop every task and join them. Returns the engine's error if it halted
    /// on a link fault. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.engine.is_none() && self.reader.is_none() && self.publishers.is_empty() {
            return Ok(());
        }
        info!("session: shutting down");
        self.stop.stop();
        self.state.wake_all();

        for h in self.publishers.drain(..) {
            if h.join().is_err() {
                warn!("session: publisher thread panicked");
            }
        }

        let engine = match self.engine.take() {
            Some(h) => h.join().map_err(|_| anyhow!("engine thread panicked")),
            None => Ok(Ok(())),
        };

        if let Some(t) = &self.transport {
            t.close();
        }
        if let Some(h) = self.reader.take() {
            if h.join().is_err() {
                warn!("session: transport reader panicked");
            }
        }
        self.status.lock().connected = false;
        info!("session: stopped");

        engine?.context("engine halted")
    }
}

/// Unwind a partially started session: stop, unblock the reader, join it.
fn teardown(stop: &StopToken, transport: Option<&dyn ByteTransport>, reader: Option<JoinHandle<()>>) {
    stop.stop();
    if let Some(t) = transport {
        t.close();
    }
    if let Some(h) = reader {
        if h.join().is_err() {
            warn!("session: transport reader panicked");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("session: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::tests::ScriptedLink;
    use crate::transport::tests::LoopTransport;
    use hlp_proto::{Outbound, Topic};
    use std::thread;

    struct NoConsumers;

    impl MessageBus for NoConsumers {
        fn has_consumers(&self, _topic: Topic) -> bool {
            false
        }

        fn publish(&self, _msg: Outbound) {}
    }

    #[test]
    fn teardown_joins_the_reader() {
        let transport = Arc::new(LoopTransport::default());
        let device: Box<dyn DeviceLink> = Box::new(ScriptedLink::default());
        let link = Arc::new(parking_lot::Mutex::new(device));
        let stop = StopToken::new();
        let reader = spawn_reader(transport.clone(), link, SharedLinkStatus::default(), stop.clone()).unwrap();
        thread::sleep(Duration::from_millis(20));

        teardown(&stop, Some(&*transport as &dyn ByteTransport), Some(reader));
        assert!(stop.is_stopped());
        assert!(!transport.is_open());
        // the reader's clone is gone once it has been joined
        assert_eq!(Arc::strong_count(&transport), 1);
    }

    #[test]
    fn failed_setup_leaves_no_thread_behind() {
        let mut device = VersionInfo::LOCAL;
        device.ver_minor += 1;
        let scripted = ScriptedLink { version: Some(device), ..Default::default() };
        let transport = Arc::new(LoopTransport::default());
        let shared: Arc<dyn ByteTransport> = transport.clone();

        let err = Session::start(
            &FcConfig::default(),
            Box::new(scripted),
            Some(shared),
            Arc::new(NoConsumers),
            Arc::new(GeofenceGuard::new()),
        )
        .err()
        .unwrap();
        assert!(format!("{:#}", err).contains("minor version"));
        assert!(!transport.is_open());
        assert_eq!(Arc::strong_count(&transport), 1);
    }
}
