//! Soak counters: long-duration health bookkeeping.
//!
//! Everything is a wrapping u32 bumped from the main loop. Once an hour the
//! totals roll up into a multi-line report; once a day a summary line
//! renders a HEALTHY/CHECK verdict from the deltas over that day. Reports
//! go to the serial log and, when the card is up, to `/log.txt` — never to
//! the downlink.

const HOUR_MS: u64 = 3_600_000;
const DAY_MS: u64 = 86_400_000;

/// Daily error budget before the verdict flips to CHECK.
const DAILY_LINK_ERROR_BUDGET: u32 = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Totals {
    beacons_sent: u32,
    beacons_skipped: u32,
    commands_ok: u32,
    commands_failed: u32,
    tx_errors: u32,
    rx_errors: u32,
    radio_resets: u32,
    loop_iterations: u32,
}

pub struct SoakCounters {
    totals: Totals,
    last_hourly_ms: u64,
    last_daily_ms: u64,
    daily_baseline: Totals,
}

impl SoakCounters {
    pub fn new(now_ms: u64) -> Self {
        Self {
            totals: Totals::default(),
            last_hourly_ms: now_ms,
            last_daily_ms: now_ms,
            daily_baseline: Totals::default(),
        }
    }

    pub fn count_loop(&mut self) {
        self.totals.loop_iterations = self.totals.loop_iterations.wrapping_add(1);
    }

    pub fn count_beacon_sent(&mut self) {
        self.totals.beacons_sent = self.totals.beacons_sent.wrapping_add(1);
    }

    pub fn count_beacon_skipped(&mut self) {
        self.totals.beacons_skipped = self.totals.beacons_skipped.wrapping_add(1);
    }

    pub fn count_command_ok(&mut self) {
        self.totals.commands_ok = self.totals.commands_ok.wrapping_add(1);
    }

    pub fn count_command_failed(&mut self) {
        self.totals.commands_failed = self.totals.commands_failed.wrapping_add(1);
    }

    pub fn count_tx_error(&mut self) {
        self.totals.tx_errors = self.totals.tx_errors.wrapping_add(1);
    }

    pub fn count_rx_error(&mut self) {
        self.totals.rx_errors = self.totals.rx_errors.wrapping_add(1);
    }

    pub fn count_radio_reset(&mut self) {
        self.totals.radio_resets = self.totals.radio_resets.wrapping_add(1);
    }

    pub fn commands_ok(&self) -> u32 {
        self.totals.commands_ok
    }

    pub fn tx_errors(&self) -> u32 {
        self.totals.tx_errors
    }

    /// Periodic rollup. Returns report lines when an hourly or daily
    /// boundary has passed; empty otherwise.
    pub fn tick(&mut self, now_ms: u64) -> Vec<String> {
        let mut lines = Vec::new();

        if now_ms.wrapping_sub(self.last_hourly_ms) >= HOUR_MS {
            self.last_hourly_ms = now_ms;
            lines.extend(self.hourly_report());
        }

        if now_ms.wrapping_sub(self.last_daily_ms) >= DAY_MS {
            self.last_daily_ms = now_ms;
            lines.push(self.daily_summary());
            self.daily_baseline = self.totals;
        }

        lines
    }

    fn hourly_report(&self) -> Vec<String> {
        let t = &self.totals;
        vec![
            "SOAK:HOURLY".to_string(),
            format!(
                "  loops:{} cmds:{}/{} beacons:{}/{}",
                t.loop_iterations,
                t.commands_ok,
                t.commands_failed,
                t.beacons_sent,
                t.beacons_skipped,
            ),
            format!(
                "  tx_err:{} rx_err:{} radio_resets:{}",
                t.tx_errors, t.rx_errors, t.radio_resets
            ),
        ]
    }

    fn daily_summary(&self) -> String {
        let t = &self.totals;
        let b = &self.daily_baseline;
        let link_errors = t
            .tx_errors
            .wrapping_sub(b.tx_errors)
            .wrapping_add(t.rx_errors.wrapping_sub(b.rx_errors));
        let resets = t.radio_resets.wrapping_sub(b.radio_resets);
        let verdict = if link_errors < DAILY_LINK_ERROR_BUDGET && resets == 0 {
            "HEALTHY"
        } else {
            "CHECK"
        };
        format!(
            "SOAK:DAILY|CMDS:{}|TX_ERR:{}|RX_ERR:{}|RESETS:{}|VERDICT:{}",
            t.commands_ok, t.tx_errors, t.rx_errors, t.radio_resets, verdict
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_report_before_an_hour() {
        let mut soak = SoakCounters::new(0);
        soak.count_loop();
        assert!(soak.tick(HOUR_MS - 1).is_empty());
        assert!(!soak.tick(HOUR_MS).is_empty());
    }

    #[test]
    fn test_daily_verdict_healthy_then_check() {
        let mut soak = SoakCounters::new(0);
        let lines = soak.tick(DAY_MS);
        let daily = lines.last().unwrap();
        assert!(daily.contains("VERDICT:HEALTHY"));

        for _ in 0..DAILY_LINK_ERROR_BUDGET {
            soak.count_tx_error();
        }
        soak.count_radio_reset();
        let lines = soak.tick(2 * DAY_MS);
        let daily = lines.last().unwrap();
        assert!(daily.contains("VERDICT:CHECK"));
    }

    #[test]
    fn test_counters_wrap_instead_of_saturating() {
        let mut soak = SoakCounters::new(0);
        soak.totals.tx_errors = u32::MAX;
        soak.count_tx_error();
        assert_eq!(soak.tx_errors(), 0);
    }
}
