use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::transport::{ByteTransport, SerialTransport};

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub rx_bytes: usize,
    pub elapsed_ms: u64,
    pub note: String,
}

impl ProbeResult {
    pub fn traffic_seen(&self) -> bool {
        self.rx_bytes > 0
    }
}

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/ttyS2".into(),
        "/dev/ttyS0".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![57600, 115200, 230400]
}

/// Watch an open transport for inbound bytes until `window` elapses.
pub fn listen(transport: &dyn ByteTransport, window: Duration) -> std::io::Result<usize> {
    let start = Instant::now();
    let mut buf = [0u8; 128];
    let mut total = 0;
    while start.elapsed() < window {
        total += transport.read(&mut buf)?;
        if total > 0 {
            break;
        }
    }
    Ok(total)
}

/// Try each device/baud pair in turn and stop at the first one that shows
/// inbound traffic. The HLP streams variable packets unprompted once powered,
/// so any bytes at all are taken as a sign of life.
pub fn probe_serial(candidate_devs: &[String], candidate_bauds: &[u32], window: Duration) -> ProbeReport {
    let mut probes = Vec::new();

    for dev in candidate_devs {
        for &baud in candidate_bauds {
            let start = Instant::now();
            let (rx_bytes, note) = match SerialTransport::open(dev, baud, Duration::from_millis(50)) {
                Ok(transport) => {
                    let seen = listen(&transport, window);
                    transport.close();
                    match seen {
                        Ok(0) => (0, "no traffic".to_string()),
                        Ok(n) => (n, "traffic".to_string()),
                        Err(e) => (0, format!("read failed: {}", e)),
                    }
                }
                Err(e) => {
                    warn!("probe: open failed dev={} baud={} err={}", dev, baud, e);
                    (0, format!("open failed: {}", e))
                }
            };

            let result = ProbeResult {
                dev: dev.clone(),
                baud,
                rx_bytes,
                elapsed_ms: start.elapsed().as_millis() as u64,
                note,
            };
            let hit = result.traffic_seen();
            probes.push(result);
            if hit {
                info!("probe: OK {} @ {}", dev, baud);
                return ProbeReport { chosen: Some((dev.clone(), baud)), probes };
            }
        }
    }

    ProbeReport { chosen: None, probes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::LoopTransport;

    #[test]
    fn listen_stops_at_first_bytes() {
        let t = LoopTransport::default();
        t.push(Ok(vec![0xAA; 7]));
        let started = Instant::now();
        assert_eq!(listen(&t, Duration::from_secs(5)).unwrap(), 7);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn listen_gives_up_after_window() {
        let t = LoopTransport::default();
        assert_eq!(listen(&t, Duration::from_millis(40)).unwrap(), 0);
    }

    #[test]
    fn missing_device_is_reported_not_fatal() {
        let devs = vec!["/dev/hlp-bridge-does-not-exist".to_string()];
        let report = probe_serial(&devs, &[57600], Duration::from_millis(10));
        assert!(report.chosen.is_none());
        assert_eq!(report.probes.len(), 1);
        assert!(report.probes[0].note.starts_with("open failed"));
    }
}
