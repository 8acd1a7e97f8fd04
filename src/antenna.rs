//! Antenna deployment sub-state machine.
//!
//! A burn wire melts the restraint line while a continuity switch reports
//! the antenna's state: switch released (LOW) means deployed. The sequence
//! is heat, cool, retry, with a hard cap on attempts. Safety invariant: the
//! burn wire is energized only while in `Heating`; every other transition
//! drives it LOW before anything else happens.

use tracing::{info, warn};

use crate::config::{
    DEPLOY_COOL_TIME_MS, DEPLOY_HEAT_TIME_MS, DEPLOY_MAX_RETRIES, DEPLOY_RETRY_WAIT_MS,
};
use crate::hal::DeployIo;
use crate::radiation::RadiationStore;
use crate::watchdog::WatchdogGate;

/// Deployment phases. Replicated in the radiation store; this module is the
/// only writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AntennaState {
    Idle = 0,
    Heating = 1,
    Cooling = 2,
    RetryWait = 3,
    Complete = 4,
}

impl AntennaState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AntennaState::Idle),
            1 => Some(AntennaState::Heating),
            2 => Some(AntennaState::Cooling),
            3 => Some(AntennaState::RetryWait),
            4 => Some(AntennaState::Complete),
            _ => None,
        }
    }
}

/// Events the mission must act on (downlink + persist).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployEvent {
    /// Switch released; antenna is out.
    Deployed,
    /// All retries exhausted; continuing to operations regardless.
    Failed,
    /// One attempt failed; waiting before the next.
    RetryScheduled,
}

pub struct AntennaDeployer {
    entry_ms: u64,
    retry_count: u8,
}

impl AntennaDeployer {
    pub fn new() -> Self {
        Self {
            entry_ms: 0,
            retry_count: 0,
        }
    }

    /// Restart the sequence from `Idle` (entered with the Deploying mission
    /// state).
    pub fn arm(&mut self, now_ms: u64, store: &mut RadiationStore, io: &mut dyn DeployIo) {
        io.set_burn_wire(false);
        self.entry_ms = now_ms;
        self.retry_count = 0;
        store.set_antenna_state(AntennaState::Idle);
    }

    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    /// Advance the sub-state machine one tick.
    pub fn tick(
        &mut self,
        now_ms: u64,
        store: &mut RadiationStore,
        io: &mut dyn DeployIo,
        wdt: &mut WatchdogGate,
    ) -> Option<DeployEvent> {
        let elapsed = now_ms.wrapping_sub(self.entry_ms);
        let released = io.switch_released();

        match store.antenna_state() {
            AntennaState::Idle => {
                if released {
                    // Restraint already open, nothing to burn.
                    io.set_burn_wire(false);
                    self.complete(now_ms, store);
                    return Some(DeployEvent::Deployed);
                }
                info!("burn wire on, heating");
                io.set_burn_wire(true);
                self.enter(AntennaState::Heating, now_ms, store);
                None
            }

            AntennaState::Heating => {
                wdt.feed();
                if released {
                    info!("switch released during heating");
                    io.set_burn_wire(false);
                    self.complete(now_ms, store);
                    return Some(DeployEvent::Deployed);
                }
                if elapsed >= DEPLOY_HEAT_TIME_MS {
                    info!("heating window over, cooling");
                    io.set_burn_wire(false);
                    self.enter(AntennaState::Cooling, now_ms, store);
                }
                None
            }

            AntennaState::Cooling => {
                wdt.feed();
                io.set_burn_wire(false);
                if elapsed >= DEPLOY_COOL_TIME_MS {
                    if released {
                        info!("deployment confirmed after cooling");
                        self.complete(now_ms, store);
                        return Some(DeployEvent::Deployed);
                    }
                    self.retry_count += 1;
                    warn!("deployment attempt {} failed", self.retry_count);
                    if self.retry_count >= DEPLOY_MAX_RETRIES {
                        warn!("deployment retries exhausted");
                        store.set_antenna_state(AntennaState::Complete);
                        return Some(DeployEvent::Failed);
                    }
                    self.enter(AntennaState::RetryWait, now_ms, store);
                    return Some(DeployEvent::RetryScheduled);
                }
                None
            }

            AntennaState::RetryWait => {
                wdt.feed();
                io.set_burn_wire(false);
                if released {
                    info!("switch released during retry wait");
                    self.complete(now_ms, store);
                    return Some(DeployEvent::Deployed);
                }
                if elapsed >= DEPLOY_RETRY_WAIT_MS {
                    info!("retry wait over, attempting again");
                    self.enter(AntennaState::Idle, now_ms, store);
                }
                None
            }

            AntennaState::Complete => {
                io.set_burn_wire(false);
                None
            }
        }
    }

    fn enter(&mut self, state: AntennaState, now_ms: u64, store: &mut RadiationStore) {
        self.entry_ms = now_ms;
        store.set_antenna_state(state);
    }

    fn complete(&mut self, now_ms: u64, store: &mut RadiationStore) {
        self.entry_ms = now_ms;
        store.set_antenna_state(AntennaState::Complete);
        store.set_antenna_deployed(true);
    }
}

impl Default for AntennaDeployer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::SimBus;
    use crate::watchdog::WatchdogGate;
    use std::sync::Arc;

    struct Rig {
        bus: SimBus,
        store: RadiationStore,
        io: Box<dyn DeployIo>,
        wdt: WatchdogGate,
        deployer: AntennaDeployer,
    }

    fn rig() -> Rig {
        let bus = SimBus::new();
        let board = bus.board();
        let store = RadiationStore::new(board.nv);
        let wdt = WatchdogGate::new(board.wdt, Arc::clone(&board.clock));
        Rig {
            bus,
            store,
            io: board.deploy,
            wdt,
            deployer: AntennaDeployer::new(),
        }
    }

    fn tick(rig: &mut Rig, now: u64) -> Option<DeployEvent> {
        rig.deployer
            .tick(now, &mut rig.store, rig.io.as_mut(), &mut rig.wdt)
    }

    #[test]
    fn test_released_switch_completes_immediately() {
        let mut rig = rig();
        rig.bus.set_switch_released(true);
        rig.deployer.arm(0, &mut rig.store, rig.io.as_mut());
        assert_eq!(tick(&mut rig, 0), Some(DeployEvent::Deployed));
        assert!(rig.store.antenna_deployed());
        assert!(!rig.bus.burn_wire_on());
    }

    #[test]
    fn test_full_retry_cycle_then_failure() {
        let mut rig = rig();
        rig.bus.set_switch_released(false);
        rig.deployer.arm(0, &mut rig.store, rig.io.as_mut());

        let mut now = 0u64;
        let mut events = Vec::new();
        // Long enough for three heat/cool/retry attempts.
        let horizon = (DEPLOY_HEAT_TIME_MS + DEPLOY_COOL_TIME_MS + DEPLOY_RETRY_WAIT_MS + 10_000)
            * u64::from(DEPLOY_MAX_RETRIES);
        while now < horizon {
            if let Some(ev) = tick(&mut rig, now) {
                events.push(ev);
                if ev == DeployEvent::Failed {
                    break;
                }
            }
            // Safety invariant: wire hot only while heating.
            let heating = rig.store.antenna_state() == AntennaState::Heating;
            if !heating {
                assert!(!rig.bus.burn_wire_on(), "burn wire hot outside Heating");
            }
            now += 500;
        }

        assert_eq!(
            events,
            vec![
                DeployEvent::RetryScheduled,
                DeployEvent::RetryScheduled,
                DeployEvent::Failed
            ]
        );
        assert_eq!(rig.store.antenna_state(), AntennaState::Complete);
        assert!(!rig.store.antenna_deployed());
        assert!(!rig.bus.burn_wire_on());
    }

    #[test]
    fn test_release_during_heating_stops_the_burn() {
        let mut rig = rig();
        rig.bus.set_switch_released(false);
        rig.deployer.arm(0, &mut rig.store, rig.io.as_mut());

        assert_eq!(tick(&mut rig, 0), None);
        assert_eq!(rig.store.antenna_state(), AntennaState::Heating);
        assert!(rig.bus.burn_wire_on());

        rig.bus.set_switch_released(true);
        assert_eq!(tick(&mut rig, 5_000), Some(DeployEvent::Deployed));
        assert!(!rig.bus.burn_wire_on());
        assert!(rig.store.antenna_deployed());
    }
}
