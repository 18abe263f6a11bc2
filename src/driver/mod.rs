//! Sweep drivers: the `hackrf_sweep` tool and a software stand-in.

pub mod hackrf_sweep;
pub mod simulated;

pub use hackrf_sweep::HackrfSweepDriver;
pub use simulated::{SimulatedDriver, Tone};
