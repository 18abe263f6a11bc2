//! Live spectrum monitoring for a HackRF sweeping one or more frequency
//! ranges.
//!
//! [`DeviceController`] owns the radio and forwards every FFT transfer to a
//! registered callback; [`SweepMonitor`] turns those transfers into complete
//! spectra and a rolling [`HistoryBuffer`] for waterfall display.

pub mod aggregator;
mod cli;
pub mod controller;
pub mod device;
pub mod driver;
pub mod error;
pub mod gain;
pub mod history;
pub mod monitor;
pub mod range;
pub mod sweep;

pub use aggregator::SpectrumAggregator;
pub use cli::SweepParams;
pub use controller::{DeviceController, FftCallback, FftSweepData, FrequencyBand, SweepContext};
pub use device::{SweepConfig, SweepDevice, SweepDriver, SweepSession, Transfer};
pub use error::{ControllerError, DeviceError, DeviceResult, ValidationError};
pub use gain::GainState;
pub use history::{HistoryBuffer, RowFill};
pub use monitor::{SpectrumFrame, SweepMonitor};
pub use range::{ScanRange, ScanRangeSet};

use driver::{HackrfSweepDriver, SimulatedDriver};

/// Builds an unconnected controller for the command line settings.
pub fn build_controller(params: &SweepParams) -> Result<DeviceController, ValidationError> {
    let gain = params.gain_state()?;
    let ranges = params.scan_ranges()?;

    let driver: Box<dyn SweepDriver> = if params.simulate {
        Box::new(SimulatedDriver::new())
    } else {
        let mut driver = HackrfSweepDriver::new();
        if let Some(serial) = &params.serial {
            driver = driver.with_serial(serial.clone());
        }
        Box::new(driver)
    };

    Ok(DeviceController::with_config(
        driver,
        params.sweep_config(),
        gain,
        ranges,
    ))
}
