//! Simulated hardware.
//!
//! Every fake is a thin front over shared state (`Arc<Mutex<_>>`), so the
//! simulator binary and the test suite can hold a [`SimBus`] handle to
//! inspect and perturb the "hardware" while the mission owns the boxed
//! trait objects. Soft resets mint fresh fronts over the same state, which
//! is exactly what a microcontroller reboot looks like from the outside:
//! RAM gone, EEPROM and SD card intact.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    Board, Clock, DeployIo, DirEntry, FileStore, FsError, Imu, LoraConfig, LoraPhy, NvStore,
    PhyError, SensorBank, WatchdogTimer,
};

const NV_CAPACITY: usize = 512;
const DEFAULT_CARD_BYTES: u64 = 64 * 1024 * 1024;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ==================== CLOCK ====================

/// Virtual monotonic clock. `sleep_ms` advances virtual time so paced
/// downlink streams do not stall simulated runs.
pub struct SimClock {
    now: AtomicU64,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

// ==================== RADIO PHY ====================

struct PhyState {
    configured: Option<LoraConfig>,
    receiving: bool,
    rx_flag: Option<Arc<AtomicBool>>,
    inbound: VecDeque<String>,
    transmitted: Vec<String>,
    fail_next_configs: u32,
    fail_next_transmits: u32,
    transmit_error: PhyError,
}

pub struct SimPhy {
    state: Arc<Mutex<PhyState>>,
}

impl LoraPhy for SimPhy {
    fn configure(&mut self, cfg: &LoraConfig) -> Result<(), PhyError> {
        let mut s = lock(&self.state);
        if s.fail_next_configs > 0 {
            s.fail_next_configs -= 1;
            return Err(PhyError::ConfigFailed);
        }
        s.configured = Some(*cfg);
        s.receiving = false;
        Ok(())
    }

    fn start_receive(&mut self) -> Result<(), PhyError> {
        let mut s = lock(&self.state);
        s.receiving = true;
        // A frame queued while the radio was away from RX is delivered as
        // soon as receive mode resumes.
        if !s.inbound.is_empty() {
            if let Some(flag) = &s.rx_flag {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn transmit(&mut self, payload: &str) -> Result<(), PhyError> {
        let mut s = lock(&self.state);
        if s.fail_next_transmits > 0 {
            s.fail_next_transmits -= 1;
            return Err(s.transmit_error);
        }
        s.transmitted.push(payload.to_string());
        Ok(())
    }

    fn read_data(&mut self) -> Result<String, PhyError> {
        let mut s = lock(&self.state);
        let frame = s.inbound.pop_front().ok_or(PhyError::RxFailed)?;
        if !s.inbound.is_empty() {
            if let Some(flag) = &s.rx_flag {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(frame)
    }

    fn install_rx_flag(&mut self, flag: Arc<AtomicBool>) {
        lock(&self.state).rx_flag = Some(flag);
    }
}

// ==================== NONVOLATILE STORE ====================

struct NvState {
    data: Vec<u8>,
    commits: u32,
}

pub struct SimNvStore {
    state: Arc<Mutex<NvState>>,
}

impl NvStore for SimNvStore {
    fn read(&self, addr: usize) -> u8 {
        let s = lock(&self.state);
        s.data.get(addr).copied().unwrap_or(0xFF)
    }

    fn write(&mut self, addr: usize, value: u8) {
        let mut s = lock(&self.state);
        if addr < s.data.len() {
            s.data[addr] = value;
        }
    }

    fn commit(&mut self) -> bool {
        lock(&self.state).commits += 1;
        true
    }

    fn capacity(&self) -> usize {
        NV_CAPACITY
    }
}

// ==================== FILESYSTEM ====================

struct FsState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    capacity: u64,
    available: bool,
}

impl FsState {
    fn used(&self) -> u64 {
        self.files.values().map(|v| v.len() as u64).sum()
    }
}

fn parent_of(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(trimmed[..idx].to_string()),
        None => None,
    }
}

fn leaf_of(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

pub struct SimFileStore {
    state: Arc<Mutex<FsState>>,
}

impl FileStore for SimFileStore {
    fn available(&self) -> bool {
        lock(&self.state).available
    }

    fn exists(&self, path: &str) -> bool {
        let s = lock(&self.state);
        s.files.contains_key(path) || s.dirs.contains(path)
    }

    fn mkdir(&mut self, path: &str) -> Result<(), FsError> {
        let mut s = lock(&self.state);
        if s.files.contains_key(path) {
            return Err(FsError::Io);
        }
        s.dirs.insert(path.to_string());
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<(), FsError> {
        let mut s = lock(&self.state);
        if !s.dirs.contains(path) {
            return Err(FsError::NotFound);
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let occupied = s.files.keys().any(|f| f.starts_with(&prefix))
            || s.dirs.iter().any(|d| d.starts_with(&prefix));
        if occupied {
            return Err(FsError::Io);
        }
        s.dirs.remove(path);
        Ok(())
    }

    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let s = lock(&self.state);
        if s.files.contains_key(path) {
            return Err(FsError::NotADirectory);
        }
        if path != "/" && !s.dirs.contains(path) {
            return Err(FsError::NotFound);
        }
        let wanted = path.trim_end_matches('/');
        let wanted = if wanted.is_empty() { "/" } else { wanted };
        let mut entries = Vec::new();
        for d in &s.dirs {
            if parent_of(d).as_deref() == Some(wanted) {
                entries.push(DirEntry {
                    name: leaf_of(d),
                    size: 0,
                    is_dir: true,
                });
            }
        }
        for (f, data) in &s.files {
            if parent_of(f).as_deref() == Some(wanted) {
                entries.push(DirEntry {
                    name: leaf_of(f),
                    size: data.len() as u64,
                    is_dir: false,
                });
            }
        }
        Ok(entries)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let s = lock(&self.state);
        if s.dirs.contains(path) {
            return Err(FsError::IsADirectory);
        }
        s.files.get(path).cloned().ok_or(FsError::NotFound)
    }

    fn file_size(&self, path: &str) -> Result<u64, FsError> {
        let s = lock(&self.state);
        s.files
            .get(path)
            .map(|d| d.len() as u64)
            .ok_or(FsError::NotFound)
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<usize, FsError> {
        let mut s = lock(&self.state);
        let existing = s.files.get(path).map_or(0, |d| d.len() as u64);
        if s.used() - existing + data.len() as u64 > s.capacity {
            return Err(FsError::NoSpace);
        }
        s.files.insert(path.to_string(), data.to_vec());
        Ok(data.len())
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<usize, FsError> {
        let mut s = lock(&self.state);
        if s.used() + data.len() as u64 > s.capacity {
            return Err(FsError::NoSpace);
        }
        s.files
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn write_at(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let mut s = lock(&self.state);
        let end = offset as usize + data.len();
        if s.used() + end as u64 > s.capacity {
            return Err(FsError::NoSpace);
        }
        let file = s.files.entry(path.to_string()).or_default();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[offset as usize..end].copy_from_slice(data);
        Ok(data.len())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError> {
        let mut s = lock(&self.state);
        let data = s.files.remove(from).ok_or(FsError::NotFound)?;
        s.files.insert(to.to_string(), data);
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), FsError> {
        let mut s = lock(&self.state);
        s.files.remove(path).map(|_| ()).ok_or(FsError::NotFound)
    }

    fn total_bytes(&self) -> u64 {
        lock(&self.state).capacity
    }

    fn used_bytes(&self) -> u64 {
        lock(&self.state).used()
    }
}

// ==================== IMU / SENSORS ====================

struct ImuState {
    healthy: bool,
    accel: [f32; 3],
    gyro: [f32; 3],
    mag: [f32; 3],
}

pub struct SimImu {
    state: Arc<Mutex<ImuState>>,
}

impl Imu for SimImu {
    fn healthy(&self) -> bool {
        lock(&self.state).healthy
    }

    fn accel_available(&self) -> bool {
        lock(&self.state).healthy
    }

    fn read_accel(&mut self) -> [f32; 3] {
        lock(&self.state).accel
    }

    fn gyro_available(&self) -> bool {
        lock(&self.state).healthy
    }

    fn read_gyro(&mut self) -> [f32; 3] {
        lock(&self.state).gyro
    }

    fn mag_available(&self) -> bool {
        lock(&self.state).healthy
    }

    fn read_mag(&mut self) -> [f32; 3] {
        lock(&self.state).mag
    }
}

struct SensorState {
    battery_v: f32,
    temp_c: f32,
    lux: f32,
}

pub struct SimSensors {
    state: Arc<Mutex<SensorState>>,
}

impl SensorBank for SimSensors {
    fn battery_voltage(&mut self) -> f32 {
        lock(&self.state).battery_v
    }

    fn temperature_c(&mut self) -> f32 {
        lock(&self.state).temp_c
    }

    fn luminosity_lux(&mut self) -> f32 {
        lock(&self.state).lux
    }
}

// ==================== WATCHDOG / DEPLOY ====================

struct WdtState {
    kicks: u64,
}

pub struct SimWatchdog {
    state: Arc<Mutex<WdtState>>,
}

impl WatchdogTimer for SimWatchdog {
    fn kick(&mut self) {
        lock(&self.state).kicks += 1;
    }
}

struct DeployState {
    switch_released: bool,
    burn_wire: bool,
}

pub struct SimDeployIo {
    state: Arc<Mutex<DeployState>>,
}

impl DeployIo for SimDeployIo {
    fn switch_released(&self) -> bool {
        lock(&self.state).switch_released
    }

    fn set_burn_wire(&mut self, on: bool) {
        lock(&self.state).burn_wire = on;
    }

    fn burn_wire_on(&self) -> bool {
        lock(&self.state).burn_wire
    }
}

// ==================== BUS ====================

/// Handle over the whole simulated board. Cloneable state lives here; the
/// mission gets boxed fronts from [`SimBus::board`]. Keeping the bus alive
/// across `board()` calls models state that survives a reboot.
pub struct SimBus {
    pub clock: Arc<SimClock>,
    phy: Arc<Mutex<PhyState>>,
    nv: Arc<Mutex<NvState>>,
    fs: Arc<Mutex<FsState>>,
    imu: Arc<Mutex<ImuState>>,
    sensors: Arc<Mutex<SensorState>>,
    wdt: Arc<Mutex<WdtState>>,
    deploy: Arc<Mutex<DeployState>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SimClock::new()),
            phy: Arc::new(Mutex::new(PhyState {
                configured: None,
                receiving: false,
                rx_flag: None,
                inbound: VecDeque::new(),
                transmitted: Vec::new(),
                fail_next_configs: 0,
                fail_next_transmits: 0,
                transmit_error: PhyError::TxFailed,
            })),
            nv: Arc::new(Mutex::new(NvState {
                data: vec![0xFF; NV_CAPACITY],
                commits: 0,
            })),
            fs: Arc::new(Mutex::new(FsState {
                files: BTreeMap::new(),
                dirs: BTreeSet::new(),
                capacity: DEFAULT_CARD_BYTES,
                available: true,
            })),
            imu: Arc::new(Mutex::new(ImuState {
                healthy: true,
                accel: [0.0, 0.0, 1.0],
                gyro: [0.0; 3],
                mag: [0.0; 3],
            })),
            sensors: Arc::new(Mutex::new(SensorState {
                battery_v: 4.05,
                temp_c: 21.5,
                lux: 480.0,
            })),
            wdt: Arc::new(Mutex::new(WdtState { kicks: 0 })),
            deploy: Arc::new(Mutex::new(DeployState {
                switch_released: false,
                burn_wire: false,
            })),
        }
    }

    /// Mint a fresh set of boxed fronts over the shared state.
    pub fn board(&self) -> Board {
        self.board_with_clock(Arc::clone(&self.clock) as Arc<dyn Clock>)
    }

    /// Same fronts, but driven by a caller-supplied clock. The simulator
    /// binary runs the simulated peripherals against wall-clock time.
    pub fn board_with_clock(&self, clock: Arc<dyn Clock>) -> Board {
        Board {
            phy: Box::new(SimPhy {
                state: Arc::clone(&self.phy),
            }),
            nv: Box::new(SimNvStore {
                state: Arc::clone(&self.nv),
            }),
            fs: Box::new(SimFileStore {
                state: Arc::clone(&self.fs),
            }),
            imu: Box::new(SimImu {
                state: Arc::clone(&self.imu),
            }),
            sensors: Box::new(SimSensors {
                state: Arc::clone(&self.sensors),
            }),
            deploy: Box::new(SimDeployIo {
                state: Arc::clone(&self.deploy),
            }),
            wdt: Box::new(SimWatchdog {
                state: Arc::clone(&self.wdt),
            }),
            clock,
        }
    }

    pub fn advance(&self, ms: u64) {
        self.clock.advance(ms);
    }

    // ---------- radio ----------

    /// Queue an uplink frame and raise the RX-complete flag, as the PHY
    /// interrupt would.
    pub fn inject_uplink(&self, frame: &str) {
        let mut s = lock(&self.phy);
        s.inbound.push_back(frame.to_string());
        if let Some(flag) = &s.rx_flag {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn transmitted(&self) -> Vec<String> {
        lock(&self.phy).transmitted.clone()
    }

    pub fn drain_transmitted(&self) -> Vec<String> {
        std::mem::take(&mut lock(&self.phy).transmitted)
    }

    pub fn fail_next_transmits(&self, n: u32, error: PhyError) {
        let mut s = lock(&self.phy);
        s.fail_next_transmits = n;
        s.transmit_error = error;
    }

    pub fn fail_next_configs(&self, n: u32) {
        lock(&self.phy).fail_next_configs = n;
    }

    pub fn phy_config(&self) -> Option<LoraConfig> {
        lock(&self.phy).configured
    }

    pub fn phy_receiving(&self) -> bool {
        lock(&self.phy).receiving
    }

    // ---------- nonvolatile store ----------

    pub fn nv_byte(&self, addr: usize) -> u8 {
        lock(&self.nv).data[addr]
    }

    pub fn flip_nv_bit(&self, addr: usize, bit: u8) {
        lock(&self.nv).data[addr] ^= 1 << bit;
    }

    pub fn nv_commits(&self) -> u32 {
        lock(&self.nv).commits
    }

    // ---------- filesystem ----------

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.fs).files.get(path).cloned()
    }

    pub fn file_names(&self) -> Vec<String> {
        lock(&self.fs).files.keys().cloned().collect()
    }

    pub fn set_sd_available(&self, available: bool) {
        lock(&self.fs).available = available;
    }

    pub fn set_sd_capacity(&self, bytes: u64) {
        lock(&self.fs).capacity = bytes;
    }

    // ---------- sensors / imu ----------

    pub fn set_battery_voltage(&self, v: f32) {
        lock(&self.sensors).battery_v = v;
    }

    pub fn set_imu_healthy(&self, healthy: bool) {
        lock(&self.imu).healthy = healthy;
    }

    pub fn set_accel(&self, accel: [f32; 3]) {
        lock(&self.imu).accel = accel;
    }

    // ---------- watchdog / deployment ----------

    pub fn watchdog_kicks(&self) -> u64 {
        lock(&self.wdt).kicks
    }

    pub fn set_switch_released(&self, released: bool) {
        lock(&self.deploy).switch_released = released;
    }

    pub fn burn_wire_on(&self) -> bool {
        lock(&self.deploy).burn_wire
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_clock_sleep_advances_virtual_time() {
        let clock = SimClock::new();
        clock.sleep_ms(75);
        assert_eq!(clock.now_ms(), 75);
    }

    #[test]
    fn test_write_at_extends_with_zeros() {
        let bus = SimBus::new();
        let mut board = bus.board();
        board.fs.write_at("/t.bin", 4, &[0xAA, 0xBB]).unwrap();
        assert_eq!(bus.file("/t.bin").unwrap(), vec![0, 0, 0, 0, 0xAA, 0xBB]);
    }

    #[test]
    fn test_list_dir_sees_only_direct_children() {
        let bus = SimBus::new();
        let mut board = bus.board();
        board.fs.mkdir("/accel").unwrap();
        board.fs.write("/accel/a.bin", b"xy").unwrap();
        board.fs.write("/top.txt", b"z").unwrap();
        let root = board.fs.list_dir("/").unwrap();
        assert_eq!(root.len(), 2);
        let sub = board.fs.list_dir("/accel").unwrap();
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].name, "a.bin");
        assert_eq!(sub[0].size, 2);
    }

    #[test]
    fn test_uplink_flag_raised_on_injection() {
        let bus = SimBus::new();
        let mut board = bus.board();
        let flag = Arc::new(AtomicBool::new(false));
        board.phy.install_rx_flag(Arc::clone(&flag));
        bus.inject_uplink("hello");
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(board.phy.read_data().unwrap(), "hello");
    }
}
