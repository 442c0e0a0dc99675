use anyhow::Result;

use crate::geofence::{Point, Polygon};

pub fn check_geofence(points: &[Point]) -> Result<()> {
    if points.is_empty() {
        // no fence configured: waypoints are unrestricted
        return Ok(());
    }
    Polygon::new(points).map_err(|e| anyhow::anyhow!("geofence.points invalid: {}", e))?;
    Ok(())
}

pub fn check_rates(engine_hz: u16, groups: &[(&str, u16)]) -> Result<()> {
    anyhow::ensure!(engine_hz > 0 && engine_hz <= 1000, "engine.rate_hz should be 1..1000");
    for (name, hz) in groups {
        anyhow::ensure!(*hz > 0, "{} rate must be > 0", name);
        anyhow::ensure!(*hz <= engine_hz, "{} rate {}Hz exceeds engine rate {}Hz", name, hz, engine_hz);
    }
    Ok(())
}

pub fn check_waypoint_defaults(max_speed: f64, position_accuracy: f64, timeout: f64) -> Result<()> {
    anyhow::ensure!(max_speed > 0.0 && max_speed <= 10.0, "waypoint max speed should be (0, 10] m/s");
    anyhow::ensure!(position_accuracy > 0.0 && position_accuracy < 65.0, "waypoint position accuracy out of range");
    anyhow::ensure!(timeout >= 0.0 && timeout < 655.0, "waypoint timeout out of range");
    Ok(())
}
