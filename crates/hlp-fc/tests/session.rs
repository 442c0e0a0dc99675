mod common;

use std::time::Duration;

use common::{bench_config, start, start_with, wait_for};
use hlp_fc::{SimConfig, VersionInfo};
use hlp_proto::Topic;

#[test]
fn telemetry_flows_once_negotiated() {
    let bench = start();
    assert!(wait_for(Duration::from_secs(2), || {
        bench.bus.count(Topic::Imu) > 0 && bench.bus.count(Topic::Status) > 0 && bench.bus.count(Topic::Gps) > 0
    }));

    let st = bench.session.link_status();
    assert!(st.connected);
    assert_eq!(st.version.as_deref(), Some("0.1"));
    assert!(bench.session.is_running());
    assert_eq!(bench.sim.group_rate(0), Some(50));
    assert_eq!(bench.sim.group_rate(1), Some(20));
}

#[test]
fn version_mismatch_is_fatal_and_silent() {
    let sim = SimConfig { version: VersionInfo { ver_major: 1, ..VersionInfo::LOCAL }, ..Default::default() };
    let err = start_with(bench_config(), sim).err().unwrap();
    let text = format!("{:#}", err);
    assert!(text.contains("major version"), "{}", text);
}

#[test]
fn limits_mismatch_is_fatal() {
    let sim = SimConfig { version: VersionInfo { max_var_packets: 8, ..VersionInfo::LOCAL }, ..Default::default() };
    let err = start_with(bench_config(), sim).err().unwrap();
    assert!(format!("{:#}", err).contains("MAX_VAR_PACKETS"));
}

#[test]
fn incomplete_lists_give_up_after_attempts() {
    let mut cfg = bench_config();
    cfg.link.negotiate_attempts = 2;
    let sim = SimConfig { lists_ready_after: 5, ..Default::default() };
    let err = start_with(cfg, sim).err().unwrap();
    assert!(format!("{:#}", err).contains("after 2 attempts"));
}

#[test]
fn shutdown_stops_publication() {
    let mut bench = start();
    assert!(wait_for(Duration::from_secs(2), || bench.bus.count(Topic::Imu) > 0));

    bench.session.shutdown().unwrap();
    assert!(!bench.session.is_running());
    assert!(!bench.session.link_status().connected);

    let after = bench.bus.seen.lock().len();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(bench.bus.seen.lock().len(), after);

    // second call is a no-op
    bench.session.shutdown().unwrap();
}
