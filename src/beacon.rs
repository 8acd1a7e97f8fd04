//! Adaptive beacon scheduling.
//!
//! Cadence follows the contact status: frequent before the ground station
//! has ever been heard, hourly once contact is established, and every five
//! minutes when a full day passes with no valid command. A low battery
//! skips the transmission but keeps the rhythm, so the schedule does not
//! collapse into a burst when power returns.

use tracing::{debug, info};

use crate::config::{
    BEACON_INTERVAL_LOST_MS, BEACON_INTERVAL_NORMAL_MS, BEACON_INTERVAL_NO_CONTACT_MS,
    BEACON_LOST_THRESHOLD_MS, BEACON_MIN_BATTERY_VOLTAGE,
};
use crate::telemetry::format_mission_time;

/// Contact status, mirrored in the beacon prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactMode {
    /// Never heard the ground station.
    Searching,
    /// Contact established, nothing heard for over a day.
    Lost,
    /// Contact established and recent.
    Connected,
}

impl ContactMode {
    pub fn prefix(&self) -> &'static str {
        match self {
            ContactMode::Searching => "BEACON:SEARCHING",
            ContactMode::Lost => "BEACON:LOST",
            ContactMode::Connected => "BEACON:CONNECTED",
        }
    }
}

/// What to do with the current beacon slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeaconAction {
    Send(String),
    /// Battery too low; slot consumed, nothing transmitted.
    SkipLowBattery,
}

pub struct BeaconScheduler {
    last_ground_contact_ms: u64,
    last_beacon_ms: u64,
    skipped: u32,
}

impl BeaconScheduler {
    pub fn new() -> Self {
        Self {
            last_ground_contact_ms: 0,
            last_beacon_ms: 0,
            skipped: 0,
        }
    }

    /// Current mode given the replicated contact flag.
    pub fn mode(&self, now_ms: u64, contact_established: bool) -> ContactMode {
        if !contact_established {
            return ContactMode::Searching;
        }
        if now_ms.wrapping_sub(self.last_ground_contact_ms) > BEACON_LOST_THRESHOLD_MS {
            ContactMode::Lost
        } else {
            ContactMode::Connected
        }
    }

    /// Beacon interval for the current mode.
    pub fn interval_ms(&self, now_ms: u64, contact_established: bool) -> u64 {
        match self.mode(now_ms, contact_established) {
            ContactMode::Searching => BEACON_INTERVAL_NO_CONTACT_MS,
            ContactMode::Lost => BEACON_INTERVAL_LOST_MS,
            ContactMode::Connected => BEACON_INTERVAL_NORMAL_MS,
        }
    }

    pub fn due(&self, now_ms: u64, contact_established: bool) -> bool {
        now_ms.wrapping_sub(self.last_beacon_ms) >= self.interval_ms(now_ms, contact_established)
    }

    /// Decide the current beacon slot: compose the message or skip it on a
    /// low pack voltage (0 < V < threshold; non-positive readings mean a
    /// faulted sensor and do not suppress the beacon). Either way the slot
    /// is consumed.
    pub fn emit(
        &mut self,
        now_ms: u64,
        contact_established: bool,
        mission_elapsed_ms: u64,
        boot_count: u32,
        battery_voltage: f32,
    ) -> BeaconAction {
        self.last_beacon_ms = now_ms;

        if battery_voltage > 0.0 && battery_voltage < BEACON_MIN_BATTERY_VOLTAGE {
            self.skipped = self.skipped.wrapping_add(1);
            debug!(
                "beacon slot skipped, battery {:.2}V below {:.2}V",
                battery_voltage, BEACON_MIN_BATTERY_VOLTAGE
            );
            return BeaconAction::SkipLowBattery;
        }

        let mode = self.mode(now_ms, contact_established);
        let contact = if contact_established { "YES" } else { "NO" };
        let message = format!(
            "{}|{}|B:{}|C:{}|V:{:.1}",
            mode.prefix(),
            format_mission_time(mission_elapsed_ms),
            boot_count,
            contact,
            battery_voltage,
        );
        BeaconAction::Send(message)
    }

    /// Record a valid command from the ground station. Returns true on the
    /// very first contact of the mission.
    pub fn register_ground_contact(&mut self, now_ms: u64, already_established: bool) -> bool {
        self.last_ground_contact_ms = now_ms;
        if !already_established {
            info!("first ground contact established");
            return true;
        }
        false
    }

    pub fn last_beacon_ms(&self) -> u64 {
        self.last_beacon_ms
    }

    pub fn last_ground_contact_ms(&self) -> u64 {
        self.last_ground_contact_ms
    }

    pub fn skipped(&self) -> u32 {
        self.skipped
    }
}

impl Default for BeaconScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_tracks_contact_status() {
        let mut sched = BeaconScheduler::new();
        assert_eq!(sched.interval_ms(0, false), BEACON_INTERVAL_NO_CONTACT_MS);

        sched.register_ground_contact(10_000, false);
        assert_eq!(sched.interval_ms(20_000, true), BEACON_INTERVAL_NORMAL_MS);

        let after_a_day = 10_000 + BEACON_LOST_THRESHOLD_MS + 1;
        assert_eq!(sched.interval_ms(after_a_day, true), BEACON_INTERVAL_LOST_MS);
    }

    #[test]
    fn test_low_battery_skips_but_keeps_rhythm() {
        let mut sched = BeaconScheduler::new();
        let action = sched.emit(60_000, false, 60_000, 1, 2.9);
        assert_eq!(action, BeaconAction::SkipLowBattery);
        assert_eq!(sched.skipped(), 1);
        assert_eq!(sched.last_beacon_ms(), 60_000);
        assert!(!sched.due(60_500, false));
    }

    #[test]
    fn test_faulted_battery_sensor_does_not_suppress() {
        let mut sched = BeaconScheduler::new();
        match sched.emit(60_000, false, 60_000, 3, -1.0) {
            BeaconAction::Send(msg) => {
                assert!(msg.starts_with("BEACON:SEARCHING|T+00:01:00|B:3|C:NO|V:"));
            }
            BeaconAction::SkipLowBattery => panic!("beacon suppressed on sensor fault"),
        }
    }

    #[test]
    fn test_connected_beacon_contents() {
        let mut sched = BeaconScheduler::new();
        sched.register_ground_contact(1_000, false);
        match sched.emit(2_000, true, 2_000, 7, 4.05) {
            BeaconAction::Send(msg) => {
                assert_eq!(msg, "BEACON:CONNECTED|T+00:00:02|B:7|C:YES|V:4.1");
            }
            BeaconAction::SkipLowBattery => panic!("unexpected skip"),
        }
    }
}
