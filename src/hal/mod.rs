//! Hardware abstraction layer.
//!
//! The control plane never touches hardware directly; it consumes the
//! contracts below. Flight builds implement them over the real drivers,
//! the simulator and the test suite use the shared-state fakes in [`sim`].

pub mod sim;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

// ==================== RADIO PHY ====================

/// Physical-layer LoRa configuration handed to the driver on every
/// RX/TX switch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoraConfig {
    pub freq_mhz: f32,
    pub bandwidth_khz: f32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub sync_word: u8,
    pub preamble_len: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyError {
    ConfigFailed,
    PacketTooLong,
    TxTimeout,
    TxFailed,
    RxFailed,
}

impl core::fmt::Display for PhyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PhyError::ConfigFailed => write!(f, "radio configuration failed"),
            PhyError::PacketTooLong => write!(f, "packet exceeds PHY limit"),
            PhyError::TxTimeout => write!(f, "transmit timed out"),
            PhyError::TxFailed => write!(f, "transmit failed"),
            PhyError::RxFailed => write!(f, "receive readout failed"),
        }
    }
}

/// Half-duplex LoRa transceiver. The driver buffers exactly one inbound
/// frame; the packet-received interrupt only raises the flag installed via
/// [`LoraPhy::install_rx_flag`].
pub trait LoraPhy: Send {
    fn configure(&mut self, cfg: &LoraConfig) -> Result<(), PhyError>;
    fn start_receive(&mut self) -> Result<(), PhyError>;
    fn transmit(&mut self, payload: &str) -> Result<(), PhyError>;
    /// Drain the buffered inbound frame after the RX flag fired.
    fn read_data(&mut self) -> Result<String, PhyError>;
    /// Install the flag the RX-complete interrupt sets.
    fn install_rx_flag(&mut self, flag: Arc<AtomicBool>);
}

// ==================== NONVOLATILE STORE ====================

/// Byte-addressable nonvolatile store (EEPROM-class, at least 512 bytes).
/// Writes are staged until `commit`.
pub trait NvStore: Send {
    fn read(&self, addr: usize) -> u8;
    fn write(&mut self, addr: usize, value: u8);
    fn commit(&mut self) -> bool;
    fn capacity(&self) -> usize;
}

// ==================== FILESYSTEM ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    NotADirectory,
    IsADirectory,
    NoSpace,
    Io,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// SD-card filesystem. Byte-level I/O lives in the driver; the control
/// plane only issues whole-buffer operations.
pub trait FileStore: Send {
    fn available(&self) -> bool;
    fn exists(&self, path: &str) -> bool;
    fn mkdir(&mut self, path: &str) -> Result<(), FsError>;
    fn rmdir(&mut self, path: &str) -> Result<(), FsError>;
    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError>;
    fn read(&self, path: &str) -> Result<Vec<u8>, FsError>;
    fn file_size(&self, path: &str) -> Result<u64, FsError>;
    /// Create or truncate.
    fn write(&mut self, path: &str, data: &[u8]) -> Result<usize, FsError>;
    fn append(&mut self, path: &str, data: &[u8]) -> Result<usize, FsError>;
    /// Write at a byte offset, extending the file with zeros if needed.
    fn write_at(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize, FsError>;
    fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError>;
    fn remove(&mut self, path: &str) -> Result<(), FsError>;
    fn total_bytes(&self) -> u64;
    fn used_bytes(&self) -> u64;
}

// ==================== IMU ====================

/// Nine-axis inertial unit. Readings are already converted to engineering
/// units by the driver (accel in g, gyro in dps, mag in gauss).
pub trait Imu: Send {
    fn healthy(&self) -> bool;
    fn accel_available(&self) -> bool;
    fn read_accel(&mut self) -> [f32; 3];
    fn gyro_available(&self) -> bool;
    fn read_gyro(&mut self) -> [f32; 3];
    fn mag_available(&self) -> bool;
    fn read_mag(&mut self) -> [f32; 3];
}

// ==================== ANALOG SENSORS ====================

/// Battery, thermistor and luminosity channels. Conversion math
/// (voltage divider, Steinhart-Hart, lux scaling) is the driver's problem.
pub trait SensorBank: Send {
    fn battery_voltage(&mut self) -> f32;
    fn temperature_c(&mut self) -> f32;
    fn luminosity_lux(&mut self) -> f32;
}

// ==================== WATCHDOG / CLOCK / DEPLOYMENT ====================

/// Hardware watchdog primitive. Construction arms it; `kick` resets the
/// countdown.
pub trait WatchdogTimer: Send {
    fn kick(&mut self);
}

/// Monotonic time source. All interval math in the firmware is
/// `now - then >= interval` on unsigned milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
    /// Short pacing sleep. Simulated clocks advance virtual time instead.
    fn sleep_ms(&self, ms: u64);
}

/// Antenna deployment I/O: the continuity switch (released = LOW =
/// deployed) and the burn-wire driver.
pub trait DeployIo: Send {
    fn switch_released(&self) -> bool;
    fn set_burn_wire(&mut self, on: bool);
    fn burn_wire_on(&self) -> bool;
}

// ==================== BOARD BUNDLE ====================

/// Everything the mission needs from the hardware, gathered once at boot.
pub struct Board {
    pub phy: Box<dyn LoraPhy>,
    pub nv: Box<dyn NvStore>,
    pub fs: Box<dyn FileStore>,
    pub imu: Box<dyn Imu>,
    pub sensors: Box<dyn SensorBank>,
    pub deploy: Box<dyn DeployIo>,
    pub wdt: Box<dyn WatchdogTimer>,
    pub clock: Arc<dyn Clock>,
}

// ==================== HOST CLOCK ====================

/// Wall-clock-backed monotonic clock for host builds (simulator binary).
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}
