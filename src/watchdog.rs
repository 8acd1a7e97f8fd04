//! Watchdog gate: the single place the hardware watchdog is kicked from.
//!
//! The hardware deadline is 60 s; the loop feeds every 10 s and every
//! long-running operation (radio init, file I/O, recording ticks) feeds at
//! entry. A hang anywhere in the loop therefore ends in a hardware reset,
//! after which the checkpoint restores state.

use std::sync::Arc;

use crate::config::WDT_FEED_INTERVAL_MS;
use crate::hal::{Clock, WatchdogTimer};

pub struct WatchdogGate {
    wdt: Box<dyn WatchdogTimer>,
    clock: Arc<dyn Clock>,
    last_feed_ms: u64,
}

impl WatchdogGate {
    pub fn new(wdt: Box<dyn WatchdogTimer>, clock: Arc<dyn Clock>) -> Self {
        let last_feed_ms = clock.now_ms();
        Self {
            wdt,
            clock,
            last_feed_ms,
        }
    }

    /// Kick the hardware watchdog now.
    pub fn feed(&mut self) {
        self.wdt.kick();
        self.last_feed_ms = self.clock.now_ms();
    }

    /// Kick only when the feed interval has elapsed; called once per loop
    /// iteration.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        if now.wrapping_sub(self.last_feed_ms) >= WDT_FEED_INTERVAL_MS {
            self.feed();
        }
    }

    pub fn last_feed_ms(&self) -> u64 {
        self.last_feed_ms
    }
}
