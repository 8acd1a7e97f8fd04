//! Accelerometer capture pipeline: 30 Hz for 60 seconds into a fixed-size
//! binary file on the SD card.
//!
//! File format: 16-byte header (`ACCEL30`, version, rate, sample count,
//! reserved) followed by 1800 samples of three little-endian f32 values in
//! g, 21,616 bytes total. The first recording of the mission is triggered
//! automatically on first ground contact, guarded by a nonvolatile flag so
//! a reboot cannot re-trigger it.

use arrayvec::ArrayString;
use tracing::{info, warn};

use crate::hal::{FileStore, Imu};
use crate::watchdog::WatchdogGate;

pub const SAMPLE_RATE_HZ: u16 = 30;
pub const DURATION_SEC: u16 = 60;
pub const TOTAL_SAMPLES: u16 = SAMPLE_RATE_HZ * DURATION_SEC;

pub const HEADER_SIZE: usize = 16;
pub const SAMPLE_SIZE: usize = 12;
pub const FILE_MAGIC: &[u8; 7] = b"ACCEL30";
pub const FORMAT_VERSION: u8 = 1;

/// Complete recording size: header plus every sample.
pub const RECORDING_SIZE: usize = HEADER_SIZE + TOTAL_SAMPLES as usize * SAMPLE_SIZE;

const SAMPLE_INTERVAL_MS: u64 = 1_000 / SAMPLE_RATE_HZ as u64;
const PROGRESS_INTERVAL_MS: u64 = 10_000;
const RECORDINGS_DIR: &str = "/accel";
const MAX_LISTED_RECORDINGS: usize = 20;

/// Extra SD headroom required beyond the recording itself.
const SPACE_MARGIN: u64 = 1_024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Error,
}

pub struct AccelRecorder {
    state: RecorderState,
    path: ArrayString<64>,
    samples_recorded: u16,
    start_ms: u64,
    /// Next-sample schedule point; advanced by the interval, not to `now`,
    /// so coarse tick grains still hit the nominal rate.
    next_sample_ms: u64,
    last_progress_ms: u64,
}

impl AccelRecorder {
    pub fn new() -> Self {
        Self {
            state: RecorderState::Idle,
            path: ArrayString::new(),
            samples_recorded: 0,
            start_ms: 0,
            next_sample_ms: 0,
            last_progress_ms: 0,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    /// Begin a recording. Errors are fixed downlink tags.
    pub fn start(
        &mut self,
        now_ms: u64,
        fs: &mut dyn FileStore,
        imu_ok: bool,
        sd_ok: bool,
        wdt: &mut WatchdogGate,
    ) -> Result<String, &'static str> {
        wdt.feed();

        if self.state == RecorderState::Recording {
            return Err("ERR:ACCEL_BUSY");
        }
        if !sd_ok || !fs.available() {
            return Err("ERR:SD_NOT_AVAILABLE");
        }
        if !imu_ok {
            return Err("ERR:IMU_NOT_AVAILABLE");
        }
        let free = fs.total_bytes().saturating_sub(fs.used_bytes());
        if free < RECORDING_SIZE as u64 + SPACE_MARGIN {
            return Err("ERR:SD_FULL");
        }

        if !fs.exists(RECORDINGS_DIR) && fs.mkdir(RECORDINGS_DIR).is_err() {
            return Err("ERR:SD_NOT_AVAILABLE");
        }

        self.path.clear();
        let name = format!("{}/rec_{}.bin", RECORDINGS_DIR, now_ms);
        if self.path.try_push_str(&name).is_err() {
            return Err("ERR:ACCEL_WRITE_FAILED");
        }

        let mut header = [0u8; HEADER_SIZE];
        header[..7].copy_from_slice(FILE_MAGIC);
        header[7] = FORMAT_VERSION;
        header[8..10].copy_from_slice(&SAMPLE_RATE_HZ.to_le_bytes());
        header[10..12].copy_from_slice(&TOTAL_SAMPLES.to_le_bytes());
        if fs.write(&self.path, &header).is_err() {
            return Err("ERR:ACCEL_WRITE_FAILED");
        }

        self.state = RecorderState::Recording;
        self.samples_recorded = 0;
        self.start_ms = now_ms;
        self.next_sample_ms = now_ms + SAMPLE_INTERVAL_MS;
        self.last_progress_ms = now_ms;

        info!(
            "recording started: {} ({} samples @ {} Hz)",
            self.path, TOTAL_SAMPLES, SAMPLE_RATE_HZ
        );
        Ok(format!("OK:ACCEL_RECORDING:{}s", DURATION_SEC))
    }

    /// Per-loop sampling step. At most one sample per call; returns a
    /// progress, completion, or error message when one is due.
    pub fn tick(
        &mut self,
        now_ms: u64,
        fs: &mut dyn FileStore,
        imu: &mut dyn Imu,
        wdt: &mut WatchdogGate,
    ) -> Option<String> {
        if self.state != RecorderState::Recording {
            return None;
        }
        if now_ms < self.next_sample_ms {
            return None;
        }

        wdt.feed();

        let [x, y, z] = imu.read_accel();

        let mut sample = [0u8; SAMPLE_SIZE];
        sample[0..4].copy_from_slice(&x.to_le_bytes());
        sample[4..8].copy_from_slice(&y.to_le_bytes());
        sample[8..12].copy_from_slice(&z.to_le_bytes());

        if fs.append(&self.path, &sample).is_err() {
            warn!("sample write failed, aborting recording");
            self.state = RecorderState::Error;
            return Some("ERR:ACCEL_WRITE_FAILED".to_string());
        }

        self.samples_recorded += 1;
        self.next_sample_ms += SAMPLE_INTERVAL_MS;
        // Resync after a long stall rather than bursting to catch up.
        if now_ms.saturating_sub(self.next_sample_ms) > 1_000 {
            self.next_sample_ms = now_ms + SAMPLE_INTERVAL_MS;
        }

        if self.samples_recorded >= TOTAL_SAMPLES {
            self.state = RecorderState::Idle;
            let size = fs.file_size(&self.path).unwrap_or(0);
            info!(
                "recording complete: {} ({} samples, {} bytes)",
                self.path, self.samples_recorded, size
            );
            return Some(format!("OK:ACCEL_COMPLETE:{}:{}B", self.path, size));
        }

        if now_ms.wrapping_sub(self.last_progress_ms) >= PROGRESS_INTERVAL_MS {
            self.last_progress_ms = now_ms;
            let percent = u32::from(self.samples_recorded) * 100 / u32::from(TOTAL_SAMPLES);
            return Some(format!("ACCEL:PROGRESS:{}%", percent));
        }

        None
    }

    /// Abort and delete the partial file.
    pub fn cancel(&mut self, fs: &mut dyn FileStore) -> Option<String> {
        if self.state == RecorderState::Recording {
            let _ = fs.remove(&self.path);
            self.state = RecorderState::Idle;
            info!("recording cancelled");
            return Some("OK:ACCEL_CANCELLED".to_string());
        }
        self.state = RecorderState::Idle;
        None
    }

    pub fn status(&self) -> String {
        match self.state {
            RecorderState::Idle => "ACCEL:IDLE".to_string(),
            RecorderState::Recording => {
                let percent = u32::from(self.samples_recorded) * 100 / u32::from(TOTAL_SAMPLES);
                format!("ACCEL:REC:{}%", percent)
            }
            RecorderState::Error => "ACCEL:ERROR".to_string(),
        }
    }

    /// List stored recordings, bounded, one message per file.
    pub fn list_recordings(&self, fs: &mut dyn FileStore) -> Vec<String> {
        let entries = match fs.list_dir(RECORDINGS_DIR) {
            Ok(entries) => entries,
            Err(_) => return vec!["ACCEL:NO_RECORDINGS".to_string()],
        };
        let mut replies = vec!["ACCEL:RECORDINGS".to_string()];
        let mut count = 0usize;
        for entry in entries {
            if entry.is_dir {
                continue;
            }
            if count >= MAX_LISTED_RECORDINGS {
                break;
            }
            replies.push(format!("ACCEL:F:{},{}", entry.name, entry.size));
            count += 1;
        }
        replies.push(format!("ACCEL:END:{}", count));
        replies
    }
}

impl Default for AccelRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_size_constant() {
        assert_eq!(RECORDING_SIZE, 21_616);
        assert_eq!(TOTAL_SAMPLES, 1_800);
    }
}
