//! Scan orchestration for tunable-laser experiments.
//!
//! The crate coordinates a swept laser, one or more DAQ cards, a shutter on a
//! DAQ digital line and auxiliary actuators. It runs 1D/2D scans (an outer axis
//! stepped around triggered wavelength sweeps) and an open-ended continuous
//! monitor mode.
//!
//! - [`instrument`]: capability traits, device descriptions, the registry, mocks
//! - [`daq`]: per-DAQ channel lists and acquisition tasks
//! - [`scan`]: geometry, the sequencer and the monitor controller
//! - [`session`]: the shared, exclusively leased experiment session
//! - [`config`]: figment-based configuration

pub mod config;
pub mod daq;
pub mod error;
pub mod instrument;
pub mod polling;
pub mod quantity;
pub mod scan;
pub mod session;
