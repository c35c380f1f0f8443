//! Slotted random-access medium simulation core.
//!
//! This module models one shared-medium cell as a discrete-event simulation:
//! - Stations generating, buffering and (re)transmitting packets
//! - A channel arbitrating collisions per sub-channel once per slot
//! - Sinks consuming delivered packets
//!
//! ## Module Organization
//!
//! - `types`: Packets, attempts, feedback signals and the simulation context
//! - `random`: Per-station reproducible random streams
//! - `scheduler`: Time-ordered event queue
//! - `station`: Arrival process, buffer and back-off state machine
//! - `channel`: Per-slot collision arbitration
//! - `sink`: Terminal receivers
//! - `metrics`: Observation side channel and statistics collector
//! - `scenario`: Scenario file loading and validation
//! - `network`: Event loop tying the components together
//!
//! ## Public API
//!
//! Load a [`Scenario`], validate it, and hand it to [`Simulation::new`];
//! [`Simulation::run`] returns a [`RunReport`].

pub mod channel;
pub mod metrics;
pub mod network;
pub mod random;
pub mod scenario;
pub mod scheduler;
pub mod sink;
pub mod station;
pub mod types;

pub use network::{RunReport, Simulation};
pub use scenario::Scenario;
