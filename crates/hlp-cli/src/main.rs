use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hlp_fc::control::ControlLimits;
use hlp_fc::engine::EngineConfig;
use hlp_fc::probe::{default_candidate_bauds, default_candidate_devs, probe_serial, ProbeReport};
use hlp_fc::publish::{MessageBus, PublishConfig};
use hlp_fc::transport::{ByteTransport, SerialTransport};
use hlp_fc::waypoint::WaypointConfig;
use hlp_fc::{DeviceLink, FcConfig, LinkConfig, Preempt, SerialConfig, Session, SimLink};
use hlp_nav::{doctor as nav_doctor, GeofenceGuard, Point};
use hlp_proto::{Inbound, Outbound, Topic, WaypointGoal, WaypointReport};

use parking_lot::Mutex;

#[derive(Debug, Parser)]
#[command(name = "hlp-bridge", version, about = "Bridge between an AscTec HLP and a message bus")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration without touching the device.
    Doctor,
    /// Negotiate with the HLP, publish telemetry as JSON lines on stdout and
    /// take JSON commands on stdin.
    Run,
    /// Probe serial ports/bauds for HLP traffic.
    Probe,
    Geofence { #[command(subcommand)] cmd: GeofenceCmd },
}

#[derive(Debug, Subcommand)]
enum GeofenceCmd {
    /// Test a point against the configured geofence.
    Check { lat: f64, lon: f64 },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    link: LinkConfig,
    serial: Option<SerialConfig>,
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    publish: PublishConfig,
    #[serde(default)]
    control: ControlLimits,
    #[serde(default)]
    waypoint: WaypointConfig,

    geofence: Option<GeofenceCfg>,
    bus: Option<BusCfg>,
}

#[derive(Debug, serde::Deserialize)]
struct GeofenceCfg {
    /// [lat, lon] pairs in degrees
    points: Vec<[f64; 2]>,
}

#[derive(Debug, serde::Deserialize)]
struct BusCfg {
    /// Topics with a consumer. Empty means all.
    #[serde(default)]
    topics: Vec<Topic>,
}

impl Config {
    fn fc(&self) -> FcConfig {
        FcConfig {
            link: self.link.clone(),
            serial: self.serial.clone(),
            engine: self.engine.clone(),
            publish: self.publish.clone(),
            control: self.control.clone(),
            waypoint: self.waypoint.clone(),
        }
    }

    fn geofence_points(&self) -> Vec<Point> {
        self.geofence.as_ref().map(|g| g.points.iter().map(|p| Point::from(*p)).collect()).unwrap_or_default()
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

/// Writes every publication as one JSON object per line.
struct JsonLinesBus {
    topics: HashSet<Topic>,
    out: Mutex<std::io::Stdout>,
}

impl JsonLinesBus {
    fn new(cfg: Option<&BusCfg>) -> Self {
        let topics = match cfg {
            Some(b) if !b.topics.is_empty() => b.topics.iter().copied().collect(),
            _ => Topic::ALL.iter().copied().collect(),
        };
        Self { topics, out: Mutex::new(std::io::stdout()) }
    }
}

impl MessageBus for JsonLinesBus {
    fn has_consumers(&self, topic: Topic) -> bool {
        self.topics.contains(&topic)
    }

    fn publish(&self, msg: Outbound) {
        let line = match serde_json::to_string(&msg) {
            Ok(l) => l,
            Err(e) => {
                warn!("bus: cannot encode {:?}: {}", msg.topic(), e);
                return;
            }
        };
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line) {
            debug!("bus: stdout closed: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg).await?,
        Command::Probe => probe(&cfg)?,
        Command::Geofence { cmd } => geofence_cmd(&cfg, cmd)?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    nav_doctor::check_geofence(&cfg.geofence_points())?;
    nav_doctor::check_rates(
        cfg.engine.rate_hz,
        &[
            ("publish.imu_mag_hz", cfg.publish.imu_mag_hz),
            ("publish.gps_hz", cfg.publish.gps_hz),
            ("publish.status_hz", cfg.publish.status_hz),
            ("publish.aux_hz", cfg.publish.aux_hz),
            ("waypoint.iteration_rate_hz", cfg.waypoint.iteration_rate_hz),
        ],
    )?;
    nav_doctor::check_waypoint_defaults(
        cfg.waypoint.default_max_speed,
        cfg.waypoint.default_position_accuracy,
        cfg.waypoint.default_timeout,
    )?;
    anyhow::ensure!(cfg.link.negotiate_attempts > 0, "link.negotiate_attempts must be > 0");
    anyhow::ensure!(cfg.link.kind == "sim", "link.kind {:?} is not built into this binary", cfg.link.kind);

    if let Some(serial) = &cfg.serial {
        if serial.probe {
            info!("doctor: serial probe enabled (OK)");
        } else {
            anyhow::ensure!(!serial.device.is_empty(), "serial.device missing");
            anyhow::ensure!(serial.baud > 0, "serial.baud invalid");
        }
    }

    info!("doctor: OK");
    Ok(())
}

fn run_probe(serial: &SerialConfig) -> ProbeReport {
    let devs = serial.candidate_devs.clone().unwrap_or_else(default_candidate_devs);
    let bauds = serial.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds);
    probe_serial(&devs, &bauds, Duration::from_millis(serial.probe_window_ms))
}

fn probe(cfg: &Config) -> Result<()> {
    let default_serial = SerialConfig::default();
    let res = run_probe(cfg.serial.as_ref().unwrap_or(&default_serial));
    if let Some((dev, baud)) = res.chosen {
        println!("CHOSEN: {} @ {}", dev, baud);
    } else {
        println!("CHOSEN: none");
    }
    for p in res.probes {
        println!("probe dev={} baud={} rx={} {}ms note={}", p.dev, p.baud, p.rx_bytes, p.elapsed_ms, p.note);
    }
    Ok(())
}

fn resolve_port(serial: &SerialConfig) -> Result<(String, u32)> {
    if serial.probe {
        match run_probe(serial).chosen {
            Some(chosen) => Ok(chosen),
            None => anyhow::bail!("serial probe failed: no HLP traffic seen"),
        }
    } else {
        Ok((serial.device.clone(), serial.baud))
    }
}

fn geofence_cmd(cfg: &Config, cmd: GeofenceCmd) -> Result<()> {
    match cmd {
        GeofenceCmd::Check { lat, lon } => {
            let guard = GeofenceGuard::new();
            let points = cfg.geofence_points();
            if !points.is_empty() {
                guard.configure(&points).context("geofence.points")?;
            }
            let inside = guard.contains(lat, lon);
            println!("valid={} inside={}", guard.is_valid(), inside);
            Ok(())
        }
    }
}

fn open_device(cfg: &FcConfig) -> Result<Box<dyn DeviceLink>> {
    match cfg.link.kind.as_str() {
        "sim" => {
            let (link, _handle) = SimLink::new(cfg.link.sim.clone());
            info!("run: using simulated HLP");
            Ok(Box::new(link))
        }
        other => anyhow::bail!("unknown link.kind: {}", other),
    }
}

fn open_transport(cfg: &FcConfig) -> Result<Option<Arc<dyn ByteTransport>>> {
    let Some(serial) = &cfg.serial else { return Ok(None) };
    let (dev, baud) = resolve_port(serial)?;
    let port = SerialTransport::open(&dev, baud, Duration::from_millis(50))
        .with_context(|| format!("open serial {} @ {}", dev, baud))?;
    Ok(Some(Arc::new(port)))
}

struct ActiveGoal {
    preempt: Preempt,
    task: JoinHandle<()>,
}

impl ActiveGoal {
    async fn cancel(self) {
        self.preempt.request();
        if let Err(e) = self.task.await {
            warn!("run: goal task failed: {}", e);
        }
    }
}

fn spawn_goal(session: &Session, bus: Arc<dyn MessageBus>, goal: WaypointGoal) -> ActiveGoal {
    let preempt = Preempt::new();
    let ctl = session.waypoints().clone();
    let p = preempt.clone();
    let task = tokio::task::spawn_blocking(move || {
        let feedback_bus = bus.clone();
        let (outcome, result) = ctl.execute(&goal, &p, &mut |fb| {
            if feedback_bus.has_consumers(Topic::WaypointFeedback) {
                feedback_bus.publish(Outbound::WaypointFeedback(*fb));
            }
        });
        info!("run: goal finished: {:?}", outcome);
        bus.publish(Outbound::WaypointResult(WaypointReport { outcome, result }));
    });
    ActiveGoal { preempt, task }
}

async fn handle_inbound(session: &Session, bus: &Arc<dyn MessageBus>, active: &mut Option<ActiveGoal>, cmd: Inbound) {
    match cmd {
        Inbound::CmdVel(twist) => {
            session.router().handle_twist(&twist);
        }
        Inbound::CtrlMode(req) => {
            let res = session.router().set_ctrl_mode(&req);
            info!("run: ctrl mode {:?} -> motors {:?}", req, res.motors);
        }
        Inbound::Goal(goal) => {
            // one goal at a time: a new goal preempts the running one
            if let Some(old) = active.take() {
                info!("run: preempting running goal");
                old.cancel().await;
            }
            *active = Some(spawn_goal(session, bus.clone(), goal));
        }
        Inbound::Cancel => match active.take() {
            Some(old) => old.cancel().await,
            None => debug!("run: cancel without an active goal"),
        },
        Inbound::Geofence(req) => {
            let points: Vec<Point> = req.points.iter().map(|p| Point::from(*p)).collect();
            if session.geofence().configure(&points).is_err() {
                warn!("run: geofence update rejected");
            }
        }
    }
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");
    let fc = cfg.fc();

    let geofence = Arc::new(GeofenceGuard::new());
    let points = cfg.geofence_points();
    if !points.is_empty() {
        geofence.configure(&points).context("initial geofence")?;
    }

    let bus: Arc<dyn MessageBus> = Arc::new(JsonLinesBus::new(cfg.bus.as_ref()));
    let device = open_device(&fc)?;
    let transport = open_transport(&fc)?;

    let start_bus = bus.clone();
    let start_geofence = geofence.clone();
    let session = tokio::task::spawn_blocking(move || Session::start(&fc, device, transport, start_bus, start_geofence))
        .await
        .context("session start task")??;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut active: Option<ActiveGoal> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match serde_json::from_str::<Inbound>(&line) {
                    Ok(cmd) => handle_inbound(&session, &bus, &mut active, cmd).await,
                    Err(e) => warn!("run: bad command {:?}: {}", line, e),
                },
                Ok(None) => {
                    info!("run: stdin closed, telemetry continues");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("run: stdin read failed: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("run: interrupt received");
                break;
            }
            _ = watchdog.tick() => {
                if !session.is_running() {
                    warn!("run: engine stopped: {:?}", session.link_status().fault);
                    break;
                }
            }
        }
    }

    // shutdown preempts a polling goal; wait for its result to go out
    let mut session = session;
    let stopped = tokio::task::spawn_blocking(move || session.shutdown()).await.context("shutdown task")?;
    if let Some(goal) = active.take() {
        goal.cancel().await;
    }
    stopped
}
