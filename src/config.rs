//! Centralized configuration: radio parameters, mission timing, beacon
//! cadence, and the per-satellite identity/key record.
//!
//! Radio parameters live in one place so the RX path, the TX path, and the
//! recovery path can never drift apart (the uplink and downlink share a
//! single sync word for ground-station compatibility).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::hal::LoraConfig;

// ==================== RADIO ====================

/// Receive (uplink) frequency, MHz.
pub const LORA_FREQ_RX_MHZ: f32 = 401.5;
/// Transmit (downlink) frequency, MHz.
pub const LORA_FREQ_TX_MHZ: f32 = 468.5;
pub const LORA_BANDWIDTH_KHZ: f32 = 125.0;
pub const LORA_SPREADING_FACTOR: u8 = 9;
pub const LORA_CODING_RATE: u8 = 7;
/// Must be identical for RX and TX.
pub const LORA_SYNC_WORD: u8 = 0x12;
pub const LORA_PREAMBLE_LEN: u16 = 8;

/// Largest payload a single LoRa transmission will carry.
pub const LORA_MAX_PAYLOAD: usize = 240;

/// Pacing delay after each downlink message so the ground receiver can keep
/// up with streamed replies.
pub const DOWNLINK_PACING_MS: u64 = 50;

/// RX configuration used everywhere the radio enters receive mode.
pub fn rx_config() -> LoraConfig {
    LoraConfig {
        freq_mhz: LORA_FREQ_RX_MHZ,
        bandwidth_khz: LORA_BANDWIDTH_KHZ,
        spreading_factor: LORA_SPREADING_FACTOR,
        coding_rate: LORA_CODING_RATE,
        sync_word: LORA_SYNC_WORD,
        preamble_len: LORA_PREAMBLE_LEN,
    }
}

/// TX configuration: same link parameters, downlink frequency.
pub fn tx_config() -> LoraConfig {
    LoraConfig {
        freq_mhz: LORA_FREQ_TX_MHZ,
        ..rx_config()
    }
}

// ==================== WATCHDOG ====================

pub const WDT_TIMEOUT_MS: u64 = 60_000;
pub const WDT_FEED_INTERVAL_MS: u64 = 10_000;

// ==================== MISSION TIMING ====================

/// Hold-off before the antenna deployment sequence may start.
pub const DEPLOY_WAIT_TIME_MS: u64 = 300_000;
pub const DEPLOY_HEAT_TIME_MS: u64 = 90_000;
pub const DEPLOY_COOL_TIME_MS: u64 = 90_000;
pub const DEPLOY_RETRY_WAIT_MS: u64 = 900_000;
pub const DEPLOY_MAX_RETRIES: u8 = 3;

/// Telemetry cadence while operational.
pub const STATUS_INTERVAL_MS: u64 = 60_000;

/// Error-state radio recovery retry cadence.
pub const RECOVERY_INTERVAL_MS: u64 = 5_000;

// ==================== BEACON ====================
//
// Adaptive beacon timing based on ground-station contact status:
// no contact yet -> frequent, contact established -> hourly,
// contact lost for a day -> every five minutes.

pub const BEACON_INTERVAL_NO_CONTACT_MS: u64 = 60_000;
pub const BEACON_INTERVAL_NORMAL_MS: u64 = 3_600_000;
pub const BEACON_INTERVAL_LOST_MS: u64 = 300_000;
pub const BEACON_LOST_THRESHOLD_MS: u64 = 86_400_000;

/// Below this pack voltage a beacon slot is skipped (rhythm is preserved).
/// A zero or negative reading means the sensor is faulted, not the battery.
pub const BEACON_MIN_BATTERY_VOLTAGE: f32 = 3.3;

// ==================== RADIATION PROTECTION ====================

/// TMR scrub cadence.
pub const SCRUB_INTERVAL_MS: u64 = 10_000;

// ==================== IDENTITY ====================

/// HMAC-SHA256 key length, bytes.
pub const HMAC_KEY_LEN: usize = 32;

/// Factory satellite id. Commands addressed to any other id are dropped.
pub const DEFAULT_SAT_ID: &str = "ab4ec7121663a28e7226dbaa238da777";

/// Factory HMAC key (hex). Replaced with the flight key before integration.
pub const DEFAULT_HMAC_KEY_HEX: &str =
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Per-satellite identity record, shared by the firmware, the simulator and
/// the ground tooling so both ends of the link sign and address frames the
/// same way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatConfig {
    pub sat_id: String,
    pub hmac_key_hex: String,
}

impl Default for SatConfig {
    fn default() -> Self {
        Self {
            sat_id: DEFAULT_SAT_ID.to_string(),
            hmac_key_hex: DEFAULT_HMAC_KEY_HEX.to_string(),
        }
    }
}

impl SatConfig {
    /// Load from a JSON file (`{"sat_id": "...", "hmac_key_hex": "..."}`).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::Unreadable)?;
        let cfg: SatConfig =
            serde_json::from_str(&raw).map_err(|_| ConfigError::Malformed)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sat_id.is_empty() {
            return Err(ConfigError::EmptySatId);
        }
        let key = hex::decode(&self.hmac_key_hex).map_err(|_| ConfigError::BadKey)?;
        if key.len() != HMAC_KEY_LEN {
            return Err(ConfigError::BadKey);
        }
        Ok(())
    }

    /// Decoded HMAC key bytes.
    pub fn hmac_key(&self) -> Vec<u8> {
        hex::decode(&self.hmac_key_hex).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    Unreadable,
    Malformed,
    EmptySatId,
    BadKey,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::Unreadable => write!(f, "config file not readable"),
            ConfigError::Malformed => write!(f, "config file is not valid JSON"),
            ConfigError::EmptySatId => write!(f, "satellite id is empty"),
            ConfigError::BadKey => write!(f, "HMAC key must be 32 bytes of hex"),
        }
    }
}

impl std::error::Error for ConfigError {}
