//! Mission state machine and top-level orchestration.
//!
//! Single-threaded cooperative loop: the host calls [`Mission::tick`]
//! forever, and the only preemption anywhere is the PHY's RX-complete
//! interrupt setting a flag that [`crate::radio::RadioLink`] drains. Every
//! tick feeds the watchdog, scrubs the TMR cells on schedule, and then runs
//! one step of the current state's handler. Within a tick, a received
//! command is parsed and answered before any beacon or telemetry is
//! emitted, so a command's response stream is never interleaved.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::antenna::{AntennaDeployer, AntennaState, DeployEvent};
use crate::beacon::{BeaconAction, BeaconScheduler};
use crate::codec::{Authenticator, FrameCodec, HmacAuthenticator};
use crate::commands::CommandVerb;
use crate::config::{
    SatConfig, DEPLOY_WAIT_TIME_MS, RECOVERY_INTERVAL_MS, SCRUB_INTERVAL_MS, STATUS_INTERVAL_MS,
};
use crate::files;
use crate::hal::{Board, Clock, DeployIo, FileStore, Imu, SensorBank};
use crate::image::ImageUploader;
use crate::radiation::RadiationStore;
use crate::radio::RadioLink;
use crate::recorder::AccelRecorder;
use crate::soak::SoakCounters;
use crate::telemetry::{self, SensorSnapshot};
use crate::watchdog::WatchdogGate;
use crate::Frame;

/// Pre-reset settle delay, so the restart acknowledgement leaves the radio
/// before the core goes down.
const RESET_SETTLE_MS: u64 = 500;

/// Top-level mission states. Replicated in the radiation store and
/// persisted through the checkpoint; this module is the only writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MissionState {
    Boot = 0,
    WaitDeploy = 1,
    Deploying = 2,
    Operational = 3,
    Error = 4,
}

impl MissionState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MissionState::Boot),
            1 => Some(MissionState::WaitDeploy),
            2 => Some(MissionState::Deploying),
            3 => Some(MissionState::Operational),
            4 => Some(MissionState::Error),
            _ => None,
        }
    }
}

pub struct Mission {
    clock: Arc<dyn Clock>,
    wdt: WatchdogGate,
    radio: RadioLink,
    store: RadiationStore,
    codec: FrameCodec,
    beacon: BeaconScheduler,
    antenna: AntennaDeployer,
    recorder: AccelRecorder,
    image: ImageUploader,
    soak: SoakCounters,
    fs: Box<dyn FileStore>,
    imu: Box<dyn Imu>,
    sensors: Box<dyn SensorBank>,
    deploy_io: Box<dyn DeployIo>,

    state_entry_ms: u64,
    operational_entered: bool,
    last_telemetry_ms: u64,
    last_recovery_ms: u64,
    reset_requested: bool,
}

impl Mission {
    /// Flight wiring: frames are verified against the configured HMAC key.
    pub fn new(board: Board, cfg: SatConfig) -> Self {
        let auth = HmacAuthenticator::new(cfg.hmac_key());
        Self::with_authenticator(board, cfg, Box::new(auth))
    }

    /// Same wiring with a caller-chosen authenticator (ground bring-up,
    /// test benches).
    pub fn with_authenticator(
        board: Board,
        cfg: SatConfig,
        auth: Box<dyn Authenticator>,
    ) -> Self {
        let now = board.clock.now_ms();
        let wdt = WatchdogGate::new(board.wdt, Arc::clone(&board.clock));
        let radio = RadioLink::new(board.phy, Arc::clone(&board.clock));
        let store = RadiationStore::new(board.nv);
        let codec = FrameCodec::new(cfg.sat_id.clone(), auth);
        Self {
            clock: board.clock,
            wdt,
            radio,
            store,
            codec,
            beacon: BeaconScheduler::new(),
            antenna: AntennaDeployer::new(),
            recorder: AccelRecorder::new(),
            image: ImageUploader::new(),
            soak: SoakCounters::new(now),
            fs: board.fs,
            imu: board.imu,
            sensors: board.sensors,
            deploy_io: board.deploy,
            state_entry_ms: now,
            operational_entered: false,
            last_telemetry_ms: now,
            last_recovery_ms: 0,
            reset_requested: false,
        }
    }

    /// One-time startup: restore the checkpoint, probe the peripherals,
    /// bring the radio into receive. Peripheral failures degrade to health
    /// flags; only a dead radio routes through the error state.
    pub fn init(&mut self) {
        let now = self.clock.now_ms();
        self.wdt.feed();

        self.store.init(now);

        self.store.set_imu_ok(self.imu.healthy());
        self.store.set_sd_ok(self.fs.available());

        let radio_ok = self.radio.init(&mut self.wdt);
        self.store.set_rf_ok(radio_ok);

        let boots = self.store.boot_count();
        info!(
            "startup: boot #{}, imu {}, sd {}, rf {}, antenna {}",
            boots,
            self.store.imu_ok(),
            self.store.sd_ok(),
            radio_ok,
            if self.store.antenna_deployed() {
                "deployed"
            } else {
                "pending"
            }
        );
        let boot_line = format!(
            "BOOT #{} - IMU:{} SD:{} RF:{} ANT:{}",
            boots,
            if self.store.imu_ok() { "OK" } else { "FAIL" },
            if self.store.sd_ok() { "OK" } else { "FAIL" },
            if radio_ok { "OK" } else { "FAIL" },
            if self.store.antenna_deployed() {
                "DEPLOYED"
            } else {
                "PENDING"
            }
        );
        let elapsed = self.mission_elapsed(now);
        files::log_line(self.fs.as_mut(), elapsed, &boot_line);

        if !radio_ok {
            warn!("radio dead at startup, entering error state");
            self.transition(MissionState::Error, now);
            self.last_recovery_ms = now;
        }

        self.state_entry_ms = now;
        self.last_telemetry_ms = now;
        self.store.save_checkpoint();
    }

    /// One cooperative loop iteration.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        self.soak.count_loop();
        self.wdt.tick();

        if now.wrapping_sub(self.store.last_scrub_ms()) >= SCRUB_INTERVAL_MS {
            self.store.scrub_all(now);
        }

        match self.store.mission_state() {
            MissionState::Boot => {
                debug!("boot complete, holding before deployment");
                self.transition(MissionState::WaitDeploy, now);
            }

            MissionState::WaitDeploy => {
                self.drain_radio(now);
                self.recorder_tick(now);
                if now.wrapping_sub(self.state_entry_ms) >= DEPLOY_WAIT_TIME_MS {
                    info!("deployment hold-off complete");
                    self.antenna.arm(now, &mut self.store, self.deploy_io.as_mut());
                    self.transition(MissionState::Deploying, now);
                } else {
                    self.beacon_tick(now);
                }
            }

            MissionState::Deploying => {
                self.drain_radio(now);
                self.recorder_tick(now);
                self.antenna_tick(now);
            }

            MissionState::Operational => {
                if !self.operational_entered {
                    info!("entering operational mode");
                    self.operational_entered = true;
                    self.state_entry_ms = now;
                    self.last_telemetry_ms = now;
                    self.emit_beacon(now);
                }

                self.drain_radio(now);
                self.recorder_tick(now);

                if let Some(msg) = self.image.timeout_check(now, self.fs.as_mut()) {
                    self.send_paced(&msg);
                }

                self.beacon_tick(now);

                if now.wrapping_sub(self.last_telemetry_ms) >= STATUS_INTERVAL_MS {
                    self.emit_telemetry(now);
                }

                if self.radio.needs_recovery() {
                    warn!("radio link sick, recovering");
                    self.soak.count_radio_reset();
                    if self.radio.recover(&mut self.wdt) {
                        self.store.set_rf_ok(true);
                    } else {
                        warn!("radio recovery failed, requesting reset");
                        self.store.set_rf_ok(false);
                        self.store.save_checkpoint();
                        self.reset_requested = true;
                    }
                }
            }

            MissionState::Error => {
                if now.wrapping_sub(self.last_recovery_ms) >= RECOVERY_INTERVAL_MS {
                    self.last_recovery_ms = now;
                    self.wdt.feed();
                    self.soak.count_radio_reset();
                    if self.radio.recover(&mut self.wdt) {
                        self.store.set_rf_ok(true);
                        let next = if self.store.antenna_deployed() {
                            MissionState::Operational
                        } else {
                            MissionState::WaitDeploy
                        };
                        self.transition(next, now);
                    }
                }
            }
        }

        let soak_lines = self.soak.tick(now);
        if !soak_lines.is_empty() {
            let elapsed = self.mission_elapsed(now);
            for line in soak_lines {
                info!("{}", line);
                files::log_line(self.fs.as_mut(), elapsed, &line);
            }
        }
    }

    // ==================== ACCESSORS ====================

    pub fn state(&mut self) -> MissionState {
        self.store.mission_state()
    }

    /// Set once a soft reset is required; the host performs the reset and
    /// reconstructs the mission, which restores from the checkpoint.
    pub fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    pub fn store(&self) -> &RadiationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RadiationStore {
        &mut self.store
    }

    pub fn soak(&self) -> &SoakCounters {
        &self.soak
    }

    // ==================== UPLINK ====================

    fn drain_radio(&mut self, now: u64) {
        match self.radio.poll_rx() {
            Ok(Some(raw)) => self.handle_uplink(&raw, now),
            Ok(None) => {}
            Err(_) => self.soak.count_rx_error(),
        }
    }

    fn handle_uplink(&mut self, raw: &str, now: u64) {
        self.wdt.feed();
        debug!("uplink: {}", raw);

        let frame = match self.codec.parse_and_verify(raw) {
            Ok(frame) => frame,
            Err(reject) => {
                self.soak.count_command_failed();
                if let Some(reply) = reject.downlink() {
                    self.send_paced(reply);
                }
                return;
            }
        };

        self.register_ground_contact(now);

        if self.dispatch(&frame, now) {
            self.soak.count_command_ok();
        } else {
            self.soak.count_command_failed();
        }
    }

    /// A valid, authenticated command counts as ground contact. The first
    /// one of the mission latches the flag, persists it, and arms the
    /// one-shot accelerometer recording.
    fn register_ground_contact(&mut self, now: u64) {
        let already = self.store.ground_contact();
        let first = self.beacon.register_ground_contact(now, already);
        if first {
            self.store.set_ground_contact(true);
            self.store.save_checkpoint();
        }
        self.check_first_contact_recording(now);
    }

    fn check_first_contact_recording(&mut self, now: u64) {
        if self.store.first_accel_done() || self.recorder.is_recording() {
            return;
        }
        info!("first-contact auto recording");
        let imu_ok = self.store.imu_ok();
        let sd_ok = self.store.sd_ok();
        match self
            .recorder
            .start(now, self.fs.as_mut(), imu_ok, sd_ok, &mut self.wdt)
        {
            Ok(reply) => {
                self.store.mark_first_accel_done();
                self.send_paced(&reply);
            }
            Err(tag) => {
                // Not marked done; the next valid command retries.
                info!("auto recording unavailable: {}", tag);
            }
        }
    }

    // ==================== DISPATCH ====================

    /// Execute one authenticated command. Returns false when the reply
    /// stream carried an error tag.
    fn dispatch(&mut self, frame: &Frame, now: u64) -> bool {
        let verb = match CommandVerb::parse(&frame.command) {
            Some(verb) => verb,
            None => {
                self.send_paced(&format!("ERR:UNKNOWN_CMD:{}", frame.command));
                return false;
            }
        };

        if verb.needs_filesystem() && !self.store.sd_ok() {
            self.send_paced("ERR:SD_NOT_AVAILABLE");
            return false;
        }

        match verb {
            CommandVerb::Ping => {
                let time = telemetry::format_mission_time(self.mission_elapsed(now));
                self.send_paced(&format!("PONG|{}", time))
            }

            CommandVerb::Status => {
                self.emit_telemetry(now);
                true
            }

            CommandVerb::ListDir => {
                let replies = files::list_dir(self.fs.as_mut(), &frame.path, &mut self.wdt);
                self.send_all(&replies)
            }

            CommandVerb::CreateDir => {
                let replies = files::create_dir(self.fs.as_mut(), &frame.path);
                self.send_all(&replies)
            }

            CommandVerb::RemoveDir => {
                let replies = files::remove_dir(self.fs.as_mut(), &frame.path);
                self.send_all(&replies)
            }

            CommandVerb::WriteFile => {
                let replies = files::write_file(
                    self.fs.as_mut(),
                    &frame.path,
                    &frame.data,
                    self.clock.as_ref(),
                    &mut self.wdt,
                );
                self.send_all(&replies)
            }

            CommandVerb::AppendFile => {
                let replies = files::append_file(
                    self.fs.as_mut(),
                    &frame.path,
                    &frame.data,
                    self.clock.as_ref(),
                    &mut self.wdt,
                );
                self.send_all(&replies)
            }

            CommandVerb::ReadFile => {
                let replies = files::read_file(self.fs.as_mut(), &frame.path, &mut self.wdt);
                self.send_all(&replies)
            }

            CommandVerb::RenameFile => {
                let replies = files::rename_file(self.fs.as_mut(), &frame.path, &frame.data);
                self.send_all(&replies)
            }

            CommandVerb::DeleteFile => {
                let replies = files::delete_file(self.fs.as_mut(), &frame.path);
                self.send_all(&replies)
            }

            CommandVerb::TestFileIo => {
                let replies = files::test_file_io(
                    self.fs.as_mut(),
                    &frame.path,
                    self.clock.as_ref(),
                    &mut self.wdt,
                );
                self.send_all(&replies)
            }

            CommandVerb::McuRestart => {
                info!("restart commanded");
                self.send_paced("OK:RESTARTING");
                self.clock.sleep_ms(RESET_SETTLE_MS);
                self.store.save_checkpoint();
                self.reset_requested = true;
                true
            }

            CommandVerb::GetState => {
                let state = self.store.mission_state() as u8;
                let boots = self.store.boot_count();
                let ant = if self.store.antenna_deployed() {
                    "DEPLOYED"
                } else {
                    "PENDING"
                };
                self.send_paced(&format!("STATE:{}|BOOTS:{}|ANT:{}", state, boots, ant))
            }

            CommandVerb::ForceOperational => {
                // Emergency escape hatch past a stuck deployment.
                warn!("forcing operational mode by command");
                self.store.set_antenna_deployed(true);
                self.store.set_antenna_state(AntennaState::Complete);
                self.transition(MissionState::Operational, now);
                self.send_paced("OK:FORCED_OPERATIONAL")
            }

            CommandVerb::GetRadStatus => {
                let since_scrub = now.wrapping_sub(self.store.last_scrub_ms()) / 1_000;
                self.send_paced(&format!(
                    "RAD:SEU_TOTAL:{}|LAST_SCRUB:{}s_ago",
                    self.store.seu_total(),
                    since_scrub
                ))
            }

            CommandVerb::ImageStart => self.image_start(frame, now),

            CommandVerb::ImageChunk => {
                if frame.data.is_empty() {
                    return self.send_error("ERR:IMG_EMPTY_CHUNK");
                }
                let chunk_num: u16 = match frame.path.parse() {
                    Ok(n) => n,
                    Err(_) => return self.send_error("ERR:IMG_INVALID_CHUNK"),
                };
                let result = self.image.chunk(
                    now,
                    chunk_num,
                    &frame.data,
                    self.fs.as_mut(),
                    &mut self.wdt,
                );
                match result {
                    Ok(reply) => self.send_paced(&reply),
                    Err(tag) => self.send_error(tag),
                }
            }

            CommandVerb::ImageEnd => {
                let result = self.image.end(self.fs.as_mut(), &mut self.wdt);
                match result {
                    Ok(reply) => self.send_paced(&reply),
                    Err(tag) => self.send_error(&tag),
                }
            }

            CommandVerb::ImageCancel => {
                if let Some(reply) = self.image.cancel(self.fs.as_mut()) {
                    self.send_paced(&reply);
                }
                true
            }

            CommandVerb::ImageStatus => {
                let status = self.image.status();
                self.send_paced(&status)
            }

            CommandVerb::AccelRecord => {
                let imu_ok = self.store.imu_ok();
                let sd_ok = self.store.sd_ok();
                let result =
                    self.recorder
                        .start(now, self.fs.as_mut(), imu_ok, sd_ok, &mut self.wdt);
                match result {
                    Ok(reply) => self.send_paced(&reply),
                    Err(tag) => self.send_error(tag),
                }
            }

            CommandVerb::AccelStatus => {
                let status = self.recorder.status();
                self.send_paced(&status)
            }

            CommandVerb::AccelCancel => {
                if let Some(reply) = self.recorder.cancel(self.fs.as_mut()) {
                    self.send_paced(&reply);
                }
                true
            }

            CommandVerb::AccelList => {
                let replies = self.recorder.list_recordings(self.fs.as_mut());
                self.send_all(&replies)
            }
        }
    }

    fn image_start(&mut self, frame: &Frame, now: u64) -> bool {
        if frame.path.is_empty() {
            return self.send_error("ERR:IMG_NO_FILENAME");
        }
        let Some((chunks_str, size_str)) = frame.data.split_once(':') else {
            return self.send_error("ERR:IMG_INVALID_PARAMS");
        };
        let (Ok(total_chunks), Ok(expected_size)) =
            (chunks_str.parse::<u16>(), size_str.parse::<u16>())
        else {
            return self.send_error("ERR:IMG_INVALID_PARAMS");
        };

        let result = self.image.start(
            now,
            &frame.path,
            total_chunks,
            expected_size,
            self.fs.as_mut(),
            &mut self.wdt,
        );
        match result {
            Ok(reply) => self.send_paced(&reply),
            Err(tag) => self.send_error(tag),
        }
    }

    // ==================== DOWNLINK ====================

    /// Transmit one paced message. Returns false on a radio error.
    fn send_paced(&mut self, message: &str) -> bool {
        match self.radio.send_paced(message, &mut self.wdt) {
            Ok(()) => true,
            Err(e) => {
                warn!("downlink failed: {}", e);
                self.soak.count_tx_error();
                false
            }
        }
    }

    /// Send an error tag; always reports the command as failed.
    fn send_error(&mut self, tag: &str) -> bool {
        self.send_paced(tag);
        false
    }

    /// Stream a reply list with pacing. Returns false when the stream
    /// carried an error tag.
    fn send_all(&mut self, replies: &[String]) -> bool {
        let mut ok = true;
        for reply in replies {
            if reply.starts_with("ERR:") {
                ok = false;
            }
            self.send_paced(reply);
        }
        ok
    }

    // ==================== PERIODIC EMISSIONS ====================

    fn beacon_tick(&mut self, now: u64) {
        if self.beacon.due(now, self.store.ground_contact()) {
            self.emit_beacon(now);
        }
    }

    fn emit_beacon(&mut self, now: u64) {
        let contact = self.store.ground_contact();
        let elapsed = self.mission_elapsed(now);
        let boots = self.store.boot_count();
        let battery = self.sensors.battery_voltage();
        match self.beacon.emit(now, contact, elapsed, boots, battery) {
            BeaconAction::Send(message) => {
                if self.send_paced(&message) {
                    self.soak.count_beacon_sent();
                }
            }
            BeaconAction::SkipLowBattery => self.soak.count_beacon_skipped(),
        }
    }

    fn emit_telemetry(&mut self, now: u64) {
        self.wdt.feed();
        self.store.set_rf_ok(self.radio.rf_ok());
        let snapshot = self.collect_snapshot();
        let line = telemetry::compose(&snapshot, self.mission_elapsed(now));
        self.send_paced(&line);
        let elapsed = self.mission_elapsed(now);
        files::log_line(self.fs.as_mut(), elapsed, &line);
        self.last_telemetry_ms = now;
    }

    fn collect_snapshot(&mut self) -> SensorSnapshot {
        let imu_ok = self.store.imu_ok() && self.imu.healthy();
        let (gyro, accel, mag) = if imu_ok {
            (
                self.imu.read_gyro(),
                self.imu.read_accel(),
                self.imu.read_mag(),
            )
        } else {
            ([0.0; 3], [0.0; 3], [0.0; 3])
        };
        SensorSnapshot {
            imu_ok,
            sd_ok: self.store.sd_ok(),
            rf_ok: self.store.rf_ok(),
            battery_v: self.sensors.battery_voltage(),
            temperature_c: self.sensors.temperature_c(),
            lux: self.sensors.luminosity_lux(),
            gyro,
            accel,
            mag,
            sd_free_percent: files::free_percent(self.fs.as_ref()),
            seu_total: self.store.seu_total(),
        }
    }

    // ==================== SUB-MACHINES ====================

    fn recorder_tick(&mut self, now: u64) {
        if let Some(message) =
            self.recorder
                .tick(now, self.fs.as_mut(), self.imu.as_mut(), &mut self.wdt)
        {
            self.send_paced(&message);
        }
    }

    fn antenna_tick(&mut self, now: u64) {
        let event = self.antenna.tick(
            now,
            &mut self.store,
            self.deploy_io.as_mut(),
            &mut self.wdt,
        );
        let Some(event) = event else { return };

        let time = telemetry::format_mission_time(self.mission_elapsed(now));
        match event {
            DeployEvent::Deployed => {
                self.send_paced(&format!("OK:ANTENNA_DEPLOYED|{}", time));
                self.transition(MissionState::Operational, now);
            }
            DeployEvent::Failed => {
                self.send_paced(&format!("ERR:ANT_DEPLOY_FAILED|{}", time));
                self.transition(MissionState::Operational, now);
            }
            DeployEvent::RetryScheduled => {
                self.send_paced(&format!("WARN:ANT_RETRY_WAIT|{}", time));
                self.store.save_checkpoint();
            }
        }
    }

    // ==================== STATE PLUMBING ====================

    fn transition(&mut self, to: MissionState, now: u64) {
        debug!("state -> {:?}", to);
        self.store.set_mission_state(to);
        self.state_entry_ms = now;
        if to == MissionState::Operational {
            self.operational_entered = false;
        }
        self.store.save_checkpoint();
    }

    fn mission_elapsed(&self, now: u64) -> u64 {
        now.wrapping_sub(u64::from(self.store.mission_start_ms()))
    }
}
