//! Radiation protection: triple modular redundancy and CRC-guarded
//! nonvolatile checkpointing.
//!
//! At LEO altitudes a single charged particle can flip a bit in RAM and
//! corrupt the state machine (worst case: re-firing the burn wire on a
//! deployed antenna). Critical variables are therefore stored three times
//! and read through 2-of-3 voting; a periodic scrub rewrites minority
//! copies. The checkpoint in the nonvolatile store carries a CRC32 so a
//! corrupted record is detected and replaced with safe defaults instead of
//! being trusted.

use tracing::{debug, info, warn};

use crate::antenna::AntennaState;
use crate::hal::NvStore;
use crate::mission::MissionState;

// Nonvolatile checkpoint layout. The CRC window covers [0..100); the
// first-recording flag sits at 200, deliberately outside the window so
// updating it does not require a full checkpoint rewrite.
const NV_MAGIC: u8 = 0xAB;
const ADDR_MAGIC: usize = 0;
const ADDR_STATE: usize = 1;
const ADDR_BOOT_COUNT: usize = 2;
const ADDR_DEPLOYED: usize = 6;
const ADDR_MISSION_START: usize = 7;
const CRC_WINDOW: usize = 100;
const ADDR_CRC: usize = 100;
const ADDR_FIRST_ACCEL: usize = 200;
const FIRST_ACCEL_DONE: u8 = 0xAA;

/// Standard CRC32 (IEEE 802.3 polynomial, reflected): init `0xFFFFFFFF`,
/// final XOR `0xFFFFFFFF`. `crc32(b"123456789") == 0xCBF43926`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

/// Triple-redundant storage for one value. Written only through
/// [`TmrCell::set`] (all three copies at once), read through 2-of-3
/// majority voting.
#[derive(Debug, Clone, Copy)]
pub struct TmrCell<T: Copy + PartialEq> {
    copy1: T,
    copy2: T,
    copy3: T,
}

impl<T: Copy + PartialEq> TmrCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            copy1: value,
            copy2: value,
            copy3: value,
        }
    }

    pub fn set(&mut self, value: T) {
        self.copy1 = value;
        self.copy2 = value;
        self.copy3 = value;
    }

    /// Majority vote. With all three copies distinct there is no majority;
    /// copy1 is returned and the caller applies its safe-default policy.
    pub fn get(&self) -> T {
        if self.copy1 == self.copy2 || self.copy1 == self.copy3 {
            self.copy1
        } else {
            self.copy2
        }
    }

    /// True when all three copies disagree with each other.
    pub fn is_catastrophic(&self) -> bool {
        self.copy1 != self.copy2 && self.copy1 != self.copy3 && self.copy2 != self.copy3
    }

    /// Rewrite any copy that disagrees with the majority. Returns true when
    /// a correction was made.
    pub fn scrub(&mut self) -> bool {
        let correct = self.get();
        let mut corrected = false;
        if self.copy1 != correct {
            self.copy1 = correct;
            corrected = true;
        }
        if self.copy2 != correct {
            self.copy2 = correct;
            corrected = true;
        }
        if self.copy3 != correct {
            self.copy3 = correct;
            corrected = true;
        }
        corrected
    }

    /// Overwrite a single copy, bypassing the set-all-three rule. Ground
    /// testing and the test suite use this to model an SEU.
    pub fn inject_upset(&mut self, copy: usize, value: T) {
        match copy {
            0 => self.copy1 = value,
            1 => self.copy2 = value,
            _ => self.copy3 = value,
        }
    }
}

/// The replicated-variable set plus the nonvolatile checkpoint behind it.
/// Single owner of the `NvStore`; every mutation of a protected variable
/// flows through the typed accessors here.
pub struct RadiationStore {
    mission_state: TmrCell<MissionState>,
    antenna_state: TmrCell<AntennaState>,
    antenna_deployed: TmrCell<bool>,
    ground_contact: TmrCell<bool>,
    rf_ok: TmrCell<bool>,
    imu_ok: TmrCell<bool>,
    sd_ok: TmrCell<bool>,
    boot_count: TmrCell<u32>,

    seu_corrections_total: u32,
    catastrophic_events: u32,
    last_scrub_ms: u64,
    mission_start_ms: u32,

    nv: Box<dyn NvStore>,
}

impl RadiationStore {
    pub fn new(nv: Box<dyn NvStore>) -> Self {
        Self {
            mission_state: TmrCell::new(MissionState::Boot),
            antenna_state: TmrCell::new(AntennaState::Idle),
            antenna_deployed: TmrCell::new(false),
            ground_contact: TmrCell::new(false),
            rf_ok: TmrCell::new(true),
            imu_ok: TmrCell::new(true),
            sd_ok: TmrCell::new(false),
            boot_count: TmrCell::new(0),
            seu_corrections_total: 0,
            catastrophic_events: 0,
            last_scrub_ms: 0,
            mission_start_ms: 0,
            nv,
        }
    }

    /// Restore from the checkpoint (or start fresh), then bump and persist
    /// the boot counter. Returns true when a valid checkpoint was found.
    pub fn init(&mut self, now_ms: u64) -> bool {
        let loaded = self.load_checkpoint();
        if loaded {
            let boots = self.boot_count.get().wrapping_add(1);
            self.boot_count.set(boots);
            info!("checkpoint restored, boot #{}", boots);
        } else {
            self.boot_count.set(1);
            self.mission_start_ms = now_ms as u32;
            info!("no valid checkpoint, starting fresh mission clock");
        }
        self.last_scrub_ms = now_ms;
        self.save_checkpoint();
        loaded
    }

    // ---------- typed accessors ----------

    pub fn mission_state(&mut self) -> MissionState {
        if self.mission_state.is_catastrophic() {
            warn!("mission state TMR copies all differ; forcing Boot");
            self.mission_state.set(MissionState::Boot);
            self.catastrophic_events += 1;
        }
        self.mission_state.get()
    }

    pub fn set_mission_state(&mut self, state: MissionState) {
        self.mission_state.set(state);
    }

    pub fn antenna_state(&mut self) -> AntennaState {
        if self.antenna_state.is_catastrophic() {
            warn!("antenna state TMR copies all differ; forcing Idle");
            self.antenna_state.set(AntennaState::Idle);
            self.catastrophic_events += 1;
        }
        self.antenna_state.get()
    }

    pub fn set_antenna_state(&mut self, state: AntennaState) {
        self.antenna_state.set(state);
    }

    pub fn antenna_deployed(&self) -> bool {
        self.antenna_deployed.get()
    }

    pub fn set_antenna_deployed(&mut self, deployed: bool) {
        self.antenna_deployed.set(deployed);
    }

    pub fn ground_contact(&self) -> bool {
        self.ground_contact.get()
    }

    pub fn set_ground_contact(&mut self, established: bool) {
        self.ground_contact.set(established);
    }

    pub fn rf_ok(&self) -> bool {
        self.rf_ok.get()
    }

    pub fn set_rf_ok(&mut self, ok: bool) {
        self.rf_ok.set(ok);
    }

    pub fn imu_ok(&self) -> bool {
        self.imu_ok.get()
    }

    pub fn set_imu_ok(&mut self, ok: bool) {
        self.imu_ok.set(ok);
    }

    pub fn sd_ok(&self) -> bool {
        self.sd_ok.get()
    }

    pub fn set_sd_ok(&mut self, ok: bool) {
        self.sd_ok.set(ok);
    }

    pub fn boot_count(&self) -> u32 {
        self.boot_count.get()
    }

    pub fn mission_start_ms(&self) -> u32 {
        self.mission_start_ms
    }

    pub fn seu_total(&self) -> u32 {
        self.seu_corrections_total
    }

    pub fn catastrophic_events(&self) -> u32 {
        self.catastrophic_events
    }

    pub fn last_scrub_ms(&self) -> u64 {
        self.last_scrub_ms
    }

    // ---------- scrubbing ----------

    /// Scrub every replicated cell, rewriting minority copies. Returns the
    /// number of cells corrected this pass.
    pub fn scrub_all(&mut self, now_ms: u64) -> u32 {
        let mut corrections = 0u32;
        if self.mission_state.scrub() {
            corrections += 1;
        }
        if self.antenna_state.scrub() {
            corrections += 1;
        }
        if self.antenna_deployed.scrub() {
            corrections += 1;
        }
        if self.ground_contact.scrub() {
            corrections += 1;
        }
        if self.rf_ok.scrub() {
            corrections += 1;
        }
        if self.imu_ok.scrub() {
            corrections += 1;
        }
        if self.sd_ok.scrub() {
            corrections += 1;
        }
        if self.boot_count.scrub() {
            corrections += 1;
        }

        if corrections > 0 {
            self.seu_corrections_total = self.seu_corrections_total.wrapping_add(corrections);
            warn!(
                "scrub corrected {} upset(s), {} total",
                corrections, self.seu_corrections_total
            );
        }
        self.last_scrub_ms = now_ms;
        corrections
    }

    // ---------- checkpointing ----------

    /// Persist the protected variables: fields, then CRC32 over the first
    /// 100 bytes, then commit.
    pub fn save_checkpoint(&mut self) {
        let state = self.mission_state.get();
        let deployed = self.antenna_deployed.get();
        let boots = self.boot_count.get();

        self.nv.write(ADDR_MAGIC, NV_MAGIC);
        self.nv.write(ADDR_STATE, state as u8);
        for (i, b) in boots.to_le_bytes().iter().enumerate() {
            self.nv.write(ADDR_BOOT_COUNT + i, *b);
        }
        self.nv.write(ADDR_DEPLOYED, u8::from(deployed));
        for (i, b) in self.mission_start_ms.to_le_bytes().iter().enumerate() {
            self.nv.write(ADDR_MISSION_START + i, *b);
        }

        let mut window = [0u8; CRC_WINDOW];
        for (i, slot) in window.iter_mut().enumerate() {
            *slot = self.nv.read(i);
        }
        let crc = crc32(&window);
        for (i, b) in crc.to_le_bytes().iter().enumerate() {
            self.nv.write(ADDR_CRC + i, *b);
        }

        self.nv.commit();
        debug!("checkpoint saved, crc 0x{:08X}", crc);
    }

    /// Verify magic and CRC, then restore the protected variables. Returns
    /// false (leaving defaults in place) when the record is absent or
    /// corrupted.
    pub fn load_checkpoint(&mut self) -> bool {
        if self.nv.read(ADDR_MAGIC) != NV_MAGIC {
            debug!("no checkpoint magic, first boot");
            return false;
        }

        let mut window = [0u8; CRC_WINDOW];
        for (i, slot) in window.iter_mut().enumerate() {
            *slot = self.nv.read(i);
        }
        let mut stored = [0u8; 4];
        for (i, slot) in stored.iter_mut().enumerate() {
            *slot = self.nv.read(ADDR_CRC + i);
        }
        let stored_crc = u32::from_le_bytes(stored);
        let computed_crc = crc32(&window);
        if stored_crc != computed_crc {
            warn!(
                "checkpoint CRC mismatch (stored 0x{:08X}, computed 0x{:08X})",
                stored_crc, computed_crc
            );
            return false;
        }

        let mut boots = [0u8; 4];
        for (i, slot) in boots.iter_mut().enumerate() {
            *slot = self.nv.read(ADDR_BOOT_COUNT + i);
        }
        self.boot_count.set(u32::from_le_bytes(boots));

        let deployed = self.nv.read(ADDR_DEPLOYED) == 1;
        self.antenna_deployed.set(deployed);

        let mut start = [0u8; 4];
        for (i, slot) in start.iter_mut().enumerate() {
            *slot = self.nv.read(ADDR_MISSION_START + i);
        }
        self.mission_start_ms = u32::from_le_bytes(start);

        // A deployed antenna means the mission can resume operations
        // directly; anything else restarts the deployment sequence from
        // the top regardless of the state the checkpoint recorded.
        let restored = if deployed {
            MissionState::Operational
        } else {
            MissionState::Boot
        };
        self.mission_state.set(restored);
        self.antenna_state.set(if deployed {
            AntennaState::Complete
        } else {
            AntennaState::Idle
        });

        true
    }

    // ---------- first-contact recording flag ----------

    pub fn first_accel_done(&self) -> bool {
        self.nv.read(ADDR_FIRST_ACCEL) == FIRST_ACCEL_DONE
    }

    pub fn mark_first_accel_done(&mut self) {
        self.nv.write(ADDR_FIRST_ACCEL, FIRST_ACCEL_DONE);
        self.nv.commit();
    }

    // ---------- fault injection ----------

    /// Model an SEU in one copy of the mission-state cell.
    pub fn inject_mission_state_upset(&mut self, copy: usize, value: MissionState) {
        self.mission_state.inject_upset(copy, value);
    }

    /// Model an SEU in one copy of the boot counter.
    pub fn inject_boot_count_upset(&mut self, copy: usize, value: u32) {
        self.boot_count.inject_upset(copy, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_reference_vectors() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0x0000_0000);
        assert_eq!(crc32(&[0x00]), 0xD202_EF8D);
        assert_eq!(crc32(b"hello"), 0x3610_A686);
    }

    #[test]
    fn test_tmr_single_upset_corrected() {
        let mut cell = TmrCell::new(7u32);
        cell.inject_upset(1, 99);
        assert_eq!(cell.get(), 7);
        assert!(cell.scrub());
        assert_eq!(cell.get(), 7);
        assert!(!cell.scrub());
    }

    #[test]
    fn test_tmr_catastrophic_detected() {
        let mut cell = TmrCell::new(1u8);
        cell.inject_upset(1, 2);
        cell.inject_upset(2, 3);
        assert!(cell.is_catastrophic());
    }
}
