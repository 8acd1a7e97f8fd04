//! # lorasat
//!
//! Flight firmware control plane for a small LEO cubesat with a half-duplex
//! LoRa link to a single ground station. The library is the mission control
//! plane only: state machines, link layer, command handling, and the
//! radiation-tolerant state store. Hardware (PHY, SD card, EEPROM, IMU,
//! watchdog, burn-wire GPIO) sits behind the traits in [`hal`], so the same
//! code runs on the flight target, in the TCP simulator, and under test.
//!
//! ## Features
//!
//! - **Non-blocking mission state machine**: boot, pre-deployment wait,
//!   antenna burn-wire deployment, operational, error recovery
//! - **Authenticated command link**: HMAC-SHA256-signed ASCII frames,
//!   TX/RX frequency switching with retry and self-recovery
//! - **Radiation tolerance**: triple modular redundancy with periodic
//!   scrubbing, CRC32-protected nonvolatile checkpointing
//! - **Adaptive beaconing**: cadence follows ground-contact status
//! - **Payload pipelines**: 30 Hz accelerometer capture to a fixed binary
//!   format, chunked resumable image upload
//!
//! ## Quick start
//!
//! ```no_run
//! use lorasat::config::SatConfig;
//! use lorasat::hal::sim::SimBus;
//! use lorasat::mission::Mission;
//!
//! let bus = SimBus::new();
//! let mut mission = Mission::new(bus.board(), SatConfig::default());
//! mission.init();
//! loop {
//!     mission.tick();
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`mission`] - top-level state machine and command dispatch
//! - [`radio`] - LoRa link layer with transmit recovery
//! - [`codec`] - inbound frame parsing and authentication
//! - [`radiation`] - TMR cells, scrubbing, checkpointing
//! - [`beacon`] - adaptive beacon scheduling
//! - [`antenna`] - burn-wire deployment sub-state machine
//! - [`recorder`] / [`image`] - payload data pipelines
//! - [`hal`] - hardware contracts and simulated implementations

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod antenna;
pub mod beacon;
pub mod codec;
pub mod commands;
pub mod config;
pub mod files;
pub mod hal;
pub mod image;
pub mod mission;
pub mod radiation;
pub mod radio;
pub mod recorder;
pub mod soak;
pub mod telemetry;
pub mod watchdog;

// Re-export the main public types for convenience
pub use codec::{Frame, FrameCodec};
pub use config::SatConfig;
pub use mission::{Mission, MissionState};
pub use radiation::RadiationStore;
