//! Telemetry composition.
//!
//! One pipe-separated ASCII line per report, always stamped with mission
//! elapsed time. IMU triplets appear only while the IMU is healthy and the
//! card-capacity field only while the SD is mounted, so a degraded sensor
//! shrinks the report instead of filling it with stale zeros.

use std::fmt::Write as _;

/// Format mission elapsed time as `T+HH:MM:SS`.
pub fn format_mission_time(elapsed_ms: u64) -> String {
    let total_seconds = elapsed_ms / 1_000;
    let hours = total_seconds / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;
    format!("T+{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Everything a telemetry line carries, gathered in one pass over the
/// sensors.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSnapshot {
    pub imu_ok: bool,
    pub sd_ok: bool,
    pub rf_ok: bool,
    pub battery_v: f32,
    pub temperature_c: f32,
    pub lux: f32,
    pub gyro: [f32; 3],
    pub accel: [f32; 3],
    pub mag: [f32; 3],
    pub sd_free_percent: u8,
    pub seu_total: u32,
}

fn flag(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "FAIL"
    }
}

/// Compose the downlink telemetry line.
pub fn compose(snapshot: &SensorSnapshot, mission_elapsed_ms: u64) -> String {
    let mut line = format_mission_time(mission_elapsed_ms);
    let _ = write!(
        line,
        "|IMU:{},SD:{},RF:{}|BAT:{:.2}V|TEMP:{:.1}C|LUX:{:.1}",
        flag(snapshot.imu_ok),
        flag(snapshot.sd_ok),
        flag(snapshot.rf_ok),
        snapshot.battery_v,
        snapshot.temperature_c,
        snapshot.lux,
    );

    if snapshot.imu_ok {
        let _ = write!(
            line,
            "|GYR:{:.1},{:.1},{:.1}|ACC:{:.2},{:.2},{:.2}|MAG:{:.1},{:.1},{:.1}",
            snapshot.gyro[0],
            snapshot.gyro[1],
            snapshot.gyro[2],
            snapshot.accel[0],
            snapshot.accel[1],
            snapshot.accel[2],
            snapshot.mag[0],
            snapshot.mag[1],
            snapshot.mag[2],
        );
    }

    if snapshot.sd_ok {
        let _ = write!(line, "|SD:{}%", snapshot.sd_free_percent);
    }

    let _ = write!(line, "|SEU:{}", snapshot.seu_total);
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SensorSnapshot {
        SensorSnapshot {
            imu_ok: true,
            sd_ok: true,
            rf_ok: true,
            battery_v: 4.05,
            temperature_c: 21.53,
            lux: 480.0,
            gyro: [0.1, -0.2, 0.3],
            accel: [0.0, 0.0, 1.0],
            mag: [0.3, 0.2, 0.1],
            sd_free_percent: 97,
            seu_total: 2,
        }
    }

    #[test]
    fn test_mission_time_formatting() {
        assert_eq!(format_mission_time(0), "T+00:00:00");
        assert_eq!(format_mission_time(61_000), "T+00:01:01");
        assert_eq!(format_mission_time(3_600_000 + 62_000), "T+01:01:02");
        assert_eq!(format_mission_time(100 * 3_600_000), "T+100:00:00");
    }

    #[test]
    fn test_full_telemetry_line() {
        let line = compose(&snapshot(), 61_000);
        assert_eq!(
            line,
            "T+00:01:01|IMU:OK,SD:OK,RF:OK|BAT:4.05V|TEMP:21.5C|LUX:480.0\
             |GYR:0.1,-0.2,0.3|ACC:0.00,0.00,1.00|MAG:0.3,0.2,0.1|SD:97%|SEU:2"
        );
    }

    #[test]
    fn test_degraded_sensors_shrink_the_line() {
        let mut snap = snapshot();
        snap.imu_ok = false;
        snap.sd_ok = false;
        let line = compose(&snap, 0);
        assert!(!line.contains("GYR:"));
        assert!(!line.contains("SD:97"));
        assert!(line.starts_with("T+00:00:00|IMU:FAIL,SD:FAIL,RF:OK|"));
        assert!(line.ends_with("|SEU:2"));
    }
}
