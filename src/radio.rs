//! LoRa link layer.
//!
//! The radio is half-duplex with distinct uplink/downlink frequencies and a
//! single shared sync word. It idles in continuous receive; a transmission
//! reconfigures to the TX frequency, sends, and unconditionally returns to
//! receive, so from the mission's point of view `send` is indivisible.
//! Consecutive-failure counters feed the self-recovery path: too many
//! failures and the mission re-runs `init`, and if even that fails it
//! persists state and soft-resets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{self, DOWNLINK_PACING_MS, LORA_MAX_PAYLOAD};
use crate::hal::{Clock, LoraPhy, PhyError};
use crate::watchdog::WatchdogGate;

const MAX_INIT_RETRIES: u32 = 5;
const MAX_TX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 1_000;
const PRE_TX_SETTLE_MS: u64 = 100;

/// Consecutive-failure threshold beyond which the link is declared sick.
const RECOVERY_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Could not configure the transceiver for TX.
    ConfigFailed,
    PacketTooLong,
    TxTimeout,
    TxFailed,
}

impl core::fmt::Display for RadioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RadioError::ConfigFailed => write!(f, "TX configuration failed"),
            RadioError::PacketTooLong => write!(f, "message too long"),
            RadioError::TxTimeout => write!(f, "transmit timeout"),
            RadioError::TxFailed => write!(f, "transmit failed"),
        }
    }
}

pub struct RadioLink {
    phy: Box<dyn LoraPhy>,
    clock: Arc<dyn Clock>,
    rx_flag: Arc<AtomicBool>,
    rf_ok: bool,
    /// Consecutive transmit failures.
    tx_error_streak: u32,
    /// Consecutive receive-configuration failures.
    rx_error_streak: u32,
}

impl RadioLink {
    pub fn new(mut phy: Box<dyn LoraPhy>, clock: Arc<dyn Clock>) -> Self {
        let rx_flag = Arc::new(AtomicBool::new(false));
        phy.install_rx_flag(Arc::clone(&rx_flag));
        Self {
            phy,
            clock,
            rx_flag,
            rf_ok: false,
            tx_error_streak: 0,
            rx_error_streak: 0,
        }
    }

    /// Configure for receive and enter continuous RX. Retries the
    /// configuration a few times with a settling delay; the watchdog is fed
    /// through the whole sequence because a cold radio can take seconds.
    pub fn init(&mut self, wdt: &mut WatchdogGate) -> bool {
        info!("initializing radio");
        let mut attempts = 0;
        loop {
            wdt.feed();
            match self.phy.configure(&config::rx_config()) {
                Ok(()) => break,
                Err(e) => {
                    attempts += 1;
                    warn!("radio init attempt {}/{} failed: {}", attempts, MAX_INIT_RETRIES, e);
                    if attempts >= MAX_INIT_RETRIES {
                        self.rf_ok = false;
                        self.rx_error_streak = MAX_INIT_RETRIES;
                        return false;
                    }
                    self.clock.sleep_ms(RETRY_DELAY_MS);
                }
            }
        }

        match self.phy.start_receive() {
            Ok(()) => {
                info!("radio in continuous receive");
                self.rf_ok = true;
                self.rx_error_streak = 0;
                true
            }
            Err(e) => {
                warn!("start_receive failed: {}", e);
                self.rf_ok = false;
                self.rx_error_streak += 1;
                false
            }
        }
    }

    /// Transmit one downlink message, then return to receive no matter what
    /// happened. TX configuration is retried up to three times with one
    /// second spacing.
    pub fn send(&mut self, message: &str, wdt: &mut WatchdogGate) -> Result<(), RadioError> {
        debug!("tx: {}", message);
        wdt.feed();

        if message.len() > LORA_MAX_PAYLOAD {
            warn!("refusing oversized downlink ({} bytes)", message.len());
            self.return_to_receive(wdt);
            return Err(RadioError::PacketTooLong);
        }

        let mut attempts = 0;
        loop {
            match self.phy.configure(&config::tx_config()) {
                Ok(()) => break,
                Err(_) => {
                    attempts += 1;
                    warn!("TX config failed, retry {}/{}", attempts, MAX_TX_RETRIES);
                    if attempts >= MAX_TX_RETRIES {
                        self.rf_ok = false;
                        self.tx_error_streak = MAX_TX_RETRIES;
                        self.return_to_receive(wdt);
                        return Err(RadioError::ConfigFailed);
                    }
                    self.clock.sleep_ms(RETRY_DELAY_MS);
                    wdt.feed();
                }
            }
        }

        self.clock.sleep_ms(PRE_TX_SETTLE_MS);

        let result = match self.phy.transmit(message) {
            Ok(()) => {
                self.tx_error_streak = 0;
                Ok(())
            }
            Err(PhyError::PacketTooLong) => Err(RadioError::PacketTooLong),
            Err(PhyError::TxTimeout) => {
                self.tx_error_streak += 1;
                Err(RadioError::TxTimeout)
            }
            Err(e) => {
                warn!("transmit failed: {}", e);
                self.tx_error_streak += 1;
                Err(RadioError::TxFailed)
            }
        };

        self.return_to_receive(wdt);
        result
    }

    /// Transmit and pace: every streamed reply is followed by a short delay
    /// so the ground receiver is never overrun.
    pub fn send_paced(&mut self, message: &str, wdt: &mut WatchdogGate) -> Result<(), RadioError> {
        let result = self.send(message, wdt);
        self.clock.sleep_ms(DOWNLINK_PACING_MS);
        result
    }

    /// Drain one received frame if the RX interrupt fired. `Ok(None)` means
    /// nothing pending.
    pub fn poll_rx(&mut self) -> Result<Option<String>, RadioError> {
        if !self.rx_flag.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        match self.phy.read_data() {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                warn!("rx readout failed: {}", e);
                Err(RadioError::TxFailed)
            }
        }
    }

    pub fn needs_recovery(&self) -> bool {
        self.tx_error_streak > RECOVERY_THRESHOLD
            || self.rx_error_streak > RECOVERY_THRESHOLD
            || !self.rf_ok
    }

    /// Reset the failure counters and re-run init. The caller escalates to
    /// a soft reset when this fails.
    pub fn recover(&mut self, wdt: &mut WatchdogGate) -> bool {
        info!("attempting radio recovery");
        self.tx_error_streak = 0;
        self.rx_error_streak = 0;
        let ok = self.init(wdt);
        if ok {
            info!("radio recovered");
        } else {
            warn!("radio recovery failed");
        }
        ok
    }

    pub fn rf_ok(&self) -> bool {
        self.rf_ok
    }

    fn return_to_receive(&mut self, wdt: &mut WatchdogGate) {
        wdt.feed();
        match self.phy.configure(&config::rx_config()) {
            Ok(()) => match self.phy.start_receive() {
                Ok(()) => {
                    self.rf_ok = true;
                    self.rx_error_streak = 0;
                }
                Err(e) => {
                    warn!("return to receive failed: {}", e);
                    self.rf_ok = false;
                    self.rx_error_streak += 1;
                }
            },
            Err(e) => {
                warn!("RX reconfiguration failed: {}", e);
                self.rf_ok = false;
                self.rx_error_streak += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::SimBus;
    use crate::watchdog::WatchdogGate;

    fn link_and_gate(bus: &SimBus) -> (RadioLink, WatchdogGate) {
        let board = bus.board();
        let gate = WatchdogGate::new(board.wdt, Arc::clone(&board.clock));
        let link = RadioLink::new(board.phy, board.clock);
        (link, gate)
    }

    #[test]
    fn test_send_returns_to_receive() {
        let bus = SimBus::new();
        let (mut link, mut gate) = link_and_gate(&bus);
        assert!(link.init(&mut gate));

        link.send("PONG", &mut gate).unwrap();
        assert_eq!(bus.transmitted(), vec!["PONG".to_string()]);
        // Back on the RX frequency with the shared sync word.
        let cfg = bus.phy_config().unwrap();
        assert!((cfg.freq_mhz - crate::config::LORA_FREQ_RX_MHZ).abs() < f32::EPSILON);
        assert!(bus.phy_receiving());
    }

    #[test]
    fn test_tx_failure_counts_and_recovers() {
        let bus = SimBus::new();
        let (mut link, mut gate) = link_and_gate(&bus);
        assert!(link.init(&mut gate));

        bus.fail_next_transmits(7, crate::hal::PhyError::TxTimeout);
        for _ in 0..7 {
            assert!(link.send("X", &mut gate).is_err());
        }
        assert!(link.needs_recovery());
        assert!(link.recover(&mut gate));
        assert!(!link.needs_recovery());
    }

    #[test]
    fn test_poll_rx_drains_flag_once() {
        let bus = SimBus::new();
        let (mut link, mut gate) = link_and_gate(&bus);
        assert!(link.init(&mut gate));

        bus.inject_uplink("frame-1");
        assert_eq!(link.poll_rx().unwrap(), Some("frame-1".to_string()));
        assert_eq!(link.poll_rx().unwrap(), None);
    }

    #[test]
    fn test_oversized_message_rejected_without_tx() {
        let bus = SimBus::new();
        let (mut link, mut gate) = link_and_gate(&bus);
        assert!(link.init(&mut gate));

        let big = "x".repeat(LORA_MAX_PAYLOAD + 1);
        assert_eq!(link.send(&big, &mut gate), Err(RadioError::PacketTooLong));
        assert!(bus.transmitted().is_empty());
        // Even a refused message ends with the radio back in receive.
        let cfg = bus.phy_config().unwrap();
        assert!((cfg.freq_mhz - crate::config::LORA_FREQ_RX_MHZ).abs() < f32::EPSILON);
        assert!(bus.phy_receiving());
    }
}
