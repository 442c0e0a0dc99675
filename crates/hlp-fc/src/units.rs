//! Raw HLP units to SI and back.
//!
//! | field                         | raw unit            | SI                   |
//! |-------------------------------|---------------------|----------------------|
//! | angle_roll/pitch/yaw          | 1/1000 deg          | rad                  |
//! | angvel_roll/pitch/yaw         | 0.0154 deg/s        | rad/s                |
//! | acc_x/y/z                     | 1/10000 g           | m/s^2                |
//! | latitude/longitude            | 1e-7 deg            | deg                  |
//! | heights, accuracies, speeds   | mm, mm/s            | m, m/s               |
//! | distance to waypoint          | dm                  | m                    |
//! | battery, cpu load, up time    | 1/1000              | V, fraction, s       |
//! | waypoint yaw                  | 1/1000 deg, 0..360k | rad                  |
//! | waypoint max speed            | 0.1 m/s, max 100    | m/s                  |
//! | waypoint time                 | 0.01 s              | s                    |

use std::f64::consts::PI;

pub const GRAVITY: f64 = 9.81;
pub const ACC_RAW_PER_G: f64 = 10_000.0;
pub const GYRO_DEG_PER_RAW: f64 = 0.0154;
pub const YAW_FULL_TURN: i32 = 360_000;
/// 10 m/s, the HLP limit in GPS mode.
pub const MAX_SPEED_RAW: u8 = 100;

pub fn attitude_to_rad(raw: f64) -> f64 {
    (raw / 1000.0).to_radians()
}

/// Yaw is reported in 0..360 deg; publish it in (-pi, pi].
pub fn yaw_to_rad(raw: i32) -> f64 {
    let yaw = attitude_to_rad(raw as f64);
    if yaw > PI {
        yaw - 2.0 * PI
    } else {
        yaw
    }
}

pub fn acc_to_mps2(raw: i16) -> f64 {
    raw as f64 / ACC_RAW_PER_G * GRAVITY
}

pub fn angvel_to_rad_s(raw: i16) -> f64 {
    (raw as f64 * GYRO_DEG_PER_RAW).to_radians()
}

pub fn e7_to_deg(raw: i32) -> f64 {
    raw as f64 * 1.0e-7
}

pub fn milli(raw: f64) -> f64 {
    raw * 1.0e-3
}

pub fn dm_to_m(raw: u16) -> f64 {
    raw as f64 * 0.1
}

/// Accuracy is a 3-sigma value in mm; returns the variance in m^2.
pub fn accuracy_variance(raw_mm: u32) -> f64 {
    let sigma = raw_mm as f64 * 1.0e-3 / 3.0;
    sigma * sigma
}

pub fn diagonal3(a: f64, b: f64, c: f64) -> [f64; 9] {
    let mut m = [0.0; 9];
    m[0] = a;
    m[4] = b;
    m[8] = c;
    m
}

pub fn deg_to_e7(deg: f64) -> i32 {
    (deg * 1.0e7) as i32
}

pub fn m_to_mm(m: f64) -> i32 {
    (m * 1.0e3) as i32
}

/// Radians to waypoint yaw in 0..360000.
pub fn rad_to_device_yaw(yaw: f64) -> i32 {
    let raw = (yaw * 180_000.0 / PI).round() as i32;
    raw.rem_euclid(YAW_FULL_TURN)
}

pub fn device_yaw_to_rad(raw: i32) -> f64 {
    raw as f64 * PI / 180_000.0
}

pub fn speed_to_device(mps: f64) -> u8 {
    (mps * 10.0).clamp(0.0, MAX_SPEED_RAW as f64) as u8
}

pub fn seconds_to_centis(s: f64) -> u16 {
    (s * 100.0) as u16
}

pub fn m_to_mm_u16(m: f64) -> u16 {
    (m * 1.0e3) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attitude_and_yaw() {
        assert!((attitude_to_rad(90_000.0) - PI / 2.0).abs() < 1e-12);
        assert!((yaw_to_rad(270_000) + PI / 2.0).abs() < 1e-12);
        assert!((yaw_to_rad(90_000) - PI / 2.0).abs() < 1e-12);
        assert!((yaw_to_rad(200_000) + 160f64.to_radians()).abs() < 1e-12);
        assert!((attitude_to_rad(-40_000.0) + 40f64.to_radians()).abs() < 1e-12);
    }

    #[test]
    fn one_g_reads_as_gravity() {
        assert!((acc_to_mps2(10_000) - GRAVITY).abs() < 1e-12);
        assert!((acc_to_mps2(-5_000) + GRAVITY / 2.0).abs() < 1e-12);
    }

    #[test]
    fn position_scales() {
        assert!((e7_to_deg(515_000_000) - 51.5).abs() < 1e-9);
        assert!((milli(1500.0) - 1.5).abs() < 1e-12);
        assert!((dm_to_m(123) - 12.3).abs() < 1e-9);
        assert_eq!(deg_to_e7(51.5), 515_000_000);
        assert_eq!(m_to_mm(12.5), 12_500);
    }

    #[test]
    fn accuracy_is_squared_third() {
        assert!((accuracy_variance(3000) - 1.0).abs() < 1e-12);
        let m = diagonal3(1.0, 2.0, 3.0);
        assert_eq!(m, [1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0]);
    }

    #[test]
    fn device_yaw_wraps_into_full_turn() {
        assert_eq!(rad_to_device_yaw(0.0), 0);
        assert_eq!(rad_to_device_yaw(PI / 2.0), 90_000);
        assert_eq!(rad_to_device_yaw(-PI / 2.0), 270_000);
        assert!((device_yaw_to_rad(90_000) - PI / 2.0).abs() < 1e-12);
    }

    #[test]
    fn speed_is_capped_at_device_max() {
        assert_eq!(speed_to_device(3.0), 30);
        assert_eq!(speed_to_device(25.0), MAX_SPEED_RAW);
        assert_eq!(speed_to_device(-1.0), 0);
        assert_eq!(seconds_to_centis(1.5), 150);
        assert_eq!(m_to_mm_u16(2.5), 2500);
    }
}
