//! The hardware session controller.
//!
//! [`DeviceController`] owns one sweep device and serializes every control
//! operation behind a single lock. The hardware's worker thread never touches
//! controller state directly: it calls the [`SweepContext`] registered with
//! the session, which looks up the consumer callback under the lock and runs
//! it after the lock is released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, error, info, warn};

use crate::device::{SweepConfig, SweepDevice, SweepDriver, SweepSession, Transfer};
use crate::error::{ControllerError, DeviceError, ValidationError};
use crate::gain::GainState;
use crate::range::{ScanRange, ScanRangeSet};

/// One contiguous slice of spectrum taken from a transfer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrequencyBand {
    pub start_hz: u64,
    pub end_hz: u64,
    pub power_db: Vec<f32>,
}

/// What the registered callback receives for every hardware transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct FftSweepData {
    pub bin_width_hz: f64,
    pub fft_size: usize,
    /// The configured ranges as flat MHz endpoints; the first and last bound
    /// one sweep cycle.
    pub freq_ranges_mhz: Vec<u16>,
    pub lower: FrequencyBand,
    pub upper: FrequencyBand,
}

impl FftSweepData {
    /// Picks the two alias-free quarter bands out of a raw transfer.
    ///
    /// Index 0 is the DC bin. The lower band `[F, F + R/4)` sits at
    /// `1 + 5S/8` and the upper band `[F + R/2, F + 3R/4)` at `1 + S/8`, each
    /// `S/4` samples long. Returns `None` when the power array is too short.
    pub fn from_transfer(transfer: &Transfer<'_>) -> Option<Self> {
        let size = transfer.fft_size;
        let quarter = size / 4;
        if quarter == 0 {
            return None;
        }
        let lower_offset = 1 + (size * 5) / 8;
        let upper_offset = 1 + size / 8;

        let lower_power = transfer.power_db.get(lower_offset..lower_offset + quarter)?;
        let upper_power = transfer.power_db.get(upper_offset..upper_offset + quarter)?;

        let freq = transfer.frequency_hz;
        let rate = transfer.sample_rate_hz;

        Some(Self {
            bin_width_hz: transfer.bin_width_hz,
            fft_size: size,
            freq_ranges_mhz: transfer.ranges_mhz.to_vec(),
            lower: FrequencyBand {
                start_hz: freq,
                end_hz: freq + rate / 4,
                power_db: lower_power.to_vec(),
            },
            upper: FrequencyBand {
                start_hz: freq + rate / 2,
                end_hz: freq + (rate * 3) / 4,
                power_db: upper_power.to_vec(),
            },
        })
    }
}

pub type FftCallback = Arc<dyn Fn(&FftSweepData) + Send + Sync>;

struct Session {
    driver: Box<dyn SweepDriver>,
    device: Option<Box<dyn SweepDevice>>,
    sweep: Option<Box<dyn SweepSession>>,
    gain: GainState,
    ranges: ScanRangeSet,
    config: SweepConfig,
    sweeping: bool,
    callback: Option<FftCallback>,
    // bumped on every connect and teardown, stale contexts deliver nothing
    generation: u64,
}

impl Session {
    fn push_gain(&mut self) {
        let Some(device) = self.device.as_mut() else {
            debug!("gain stored, no device connected");
            return;
        };
        let gain = self.gain;
        if let Err(e) = device.set_amp_enable(gain.amp_enable()) {
            warn!("Failed to set amp enable: {e}");
        }
        if let Err(e) = device.set_vga_gain(gain.vga_gain().unsigned_abs()) {
            warn!("Failed to set VGA gain: {e}");
        }
        if let Err(e) = device.set_lna_gain(gain.lna_gain().unsigned_abs()) {
            warn!("Failed to set LNA gain: {e}");
        }
    }

    fn stop(&mut self) {
        let Some(sweep) = self.sweep.as_mut() else {
            return;
        };
        if let Err(e) = sweep.stop() {
            warn!("Failed to stop sweep: {e}");
        }
        self.sweeping = false;
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.device.is_none() {
            return Ok(());
        }
        let Some(sweep) = self.sweep.as_mut() else {
            return Ok(());
        };
        if let Err(e) = sweep.start() {
            error!("Failed to start sweep: {e}");
            return Err(e);
        }
        self.sweeping = true;
        info!("Sweeping {}", self.ranges);
        Ok(())
    }

    /// Stops the sweep and releases the device, then the session.
    fn teardown(&mut self) {
        self.stop();
        self.generation += 1;
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.close() {
                warn!("Failed to close device: {e}");
            }
            info!("Device closed");
        }
        self.sweep = None;
    }
}

/// Thread-safe owner of one sweep device session.
pub struct DeviceController {
    shared: Arc<Mutex<Session>>,
}

impl DeviceController {
    pub fn new(driver: Box<dyn SweepDriver>) -> Self {
        Self::with_config(driver, SweepConfig::default(), GainState::default(), ScanRangeSet::default())
    }

    pub fn with_config(
        driver: Box<dyn SweepDriver>,
        config: SweepConfig,
        gain: GainState,
        ranges: ScanRangeSet,
    ) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Session {
                driver,
                device: None,
                sweep: None,
                gain,
                ranges,
                config,
                sweeping: false,
                callback: None,
                generation: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the device and builds a fresh sweep session.
    ///
    /// Any previous session is torn down first. Only the open step is fatal;
    /// later configuration failures are logged and the session is kept.
    pub fn connect(&self) -> Result<(), DeviceError> {
        let mut session = self.lock();
        session.teardown();

        let mut device = match session.driver.open() {
            Ok(device) => device,
            Err(e) => {
                error!("Sweep device not connected: {e}");
                return Err(e);
            }
        };
        info!("Device opened");

        let config = session.config;
        if let Err(e) = device.set_sample_rate(config.sample_rate_hz) {
            warn!("Failed to set sample rate: {e}");
        }
        if let Err(e) = device.set_baseband_filter_bandwidth(config.baseband_filter_hz) {
            warn!("Failed to set baseband filter bandwidth: {e}");
        }

        session.device = Some(device);
        session.push_gain();

        let sweep = match session.device.as_mut().map(|device| device.init_sweep()) {
            Some(Ok(sweep)) => Some(sweep),
            Some(Err(e)) => {
                error!("Failed to initialize sweep: {e}");
                None
            }
            None => None,
        };

        if let Some(mut sweep) = sweep {
            let context = SweepContext {
                shared: Arc::downgrade(&self.shared),
                generation: session.generation,
            };
            if let Err(e) = sweep.set_transfer_handler(context) {
                warn!("Failed to set sweep transfer handler: {e}");
            }
            if let Err(e) = sweep.set_ranges(&session.ranges) {
                warn!("Failed to set sweep ranges: {e}");
            }
            if let Err(e) = sweep.setup_fft(config.bin_width_hz) {
                warn!("Failed to setup FFT: {e}");
            }
            session.sweep = Some(sweep);
        }

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.lock().device.is_some()
    }

    pub fn is_sweeping(&self) -> bool {
        self.lock().sweeping
    }

    /// Starts an infinite sweep. Does nothing without a device or session.
    pub fn start_sweep(&self) -> Result<(), DeviceError> {
        self.lock().start()
    }

    pub fn stop_sweep(&self) {
        self.lock().stop();
    }

    /// Stop, reapply the current ranges, start.
    pub fn restart_sweep(&self) -> Result<(), DeviceError> {
        let mut session = self.lock();
        session.stop();
        let ranges = session.ranges.clone();
        if let Some(sweep) = session.sweep.as_mut() {
            if let Err(e) = sweep.set_ranges(&ranges) {
                warn!("Failed to set sweep ranges: {e}");
            }
        }
        session.start()
    }

    pub fn gain_state(&self) -> GainState {
        self.lock().gain
    }

    pub fn set_gain_state(&self, gain: GainState) -> Result<(), ValidationError> {
        let gain = GainState::new(gain.amp_enable(), gain.lna_gain(), gain.vga_gain())?;
        let mut session = self.lock();
        session.gain = gain;
        session.push_gain();
        Ok(())
    }

    pub fn set_amp_enable(&self, enable: bool) {
        let mut session = self.lock();
        session.gain = session.gain.with_amp_enable(enable);
        session.push_gain();
    }

    pub fn set_vga_gain(&self, gain: i32) -> Result<(), ValidationError> {
        let mut session = self.lock();
        session.gain = session.gain.with_vga_gain(gain).inspect_err(|e| warn!("{e}"))?;
        session.push_gain();
        Ok(())
    }

    pub fn set_lna_gain(&self, gain: i32) -> Result<(), ValidationError> {
        let mut session = self.lock();
        session.gain = session.gain.with_lna_gain(gain).inspect_err(|e| warn!("{e}"))?;
        session.push_gain();
        Ok(())
    }

    pub fn scan_ranges(&self) -> ScanRangeSet {
        self.lock().ranges.clone()
    }

    /// Validates and stores a new range list, pushing it to the active
    /// session if there is one. On any failure the previous ranges stay.
    pub fn set_scan_ranges(&self, ranges: Vec<ScanRange>) -> Result<(), ControllerError> {
        let ranges = ScanRangeSet::new(ranges).inspect_err(|e| warn!("Rejected scan ranges: {e}"))?;
        let mut session = self.lock();
        if session.device.is_some() {
            if let Some(sweep) = session.sweep.as_mut() {
                if let Err(e) = sweep.set_ranges(&ranges) {
                    error!("Failed to set sweep ranges: {e}");
                    return Err(e.into());
                }
            }
        }
        info!("Scan ranges set to {ranges}");
        session.ranges = ranges;
        Ok(())
    }

    pub fn sweep_config(&self) -> SweepConfig {
        self.lock().config
    }

    /// Registers the consumer callback. Last writer wins.
    pub fn set_fft_callback<F>(&self, callback: F)
    where
        F: Fn(&FftSweepData) + Send + Sync + 'static,
    {
        self.lock().callback = Some(Arc::new(callback));
    }

    pub fn fft_callback(&self) -> Option<FftCallback> {
        self.lock().callback.clone()
    }

    pub fn clear_fft_callback(&self) {
        self.lock().callback = None;
    }
}

impl Drop for DeviceController {
    fn drop(&mut self) {
        let mut session = self.lock();
        session.teardown();
        session.callback = None;
    }
}

impl std::fmt::Debug for DeviceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.lock();
        f.debug_struct("DeviceController")
            .field("connected", &session.device.is_some())
            .field("sweeping", &session.sweeping)
            .field("gain", &session.gain)
            .field("ranges", &session.ranges)
            .field("config", &session.config)
            .finish()
    }
}

/// Handler a sweep session calls for every transfer.
///
/// Holds a weak reference to the controller state rather than a global, plus
/// the generation of the session it was issued for.
#[derive(Clone)]
pub struct SweepContext {
    shared: Weak<Mutex<Session>>,
    generation: u64,
}

impl SweepContext {
    /// Forwards one transfer to the registered callback.
    ///
    /// The lock is held only while the callback is looked up, so the
    /// callback itself may call back into the controller.
    pub fn deliver(&self, transfer: &Transfer<'_>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let callback = {
            let session = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if session.generation != self.generation {
                return;
            }
            session.callback.clone()
        };
        drop(shared);

        let Some(callback) = callback else {
            return;
        };
        match FftSweepData::from_transfer(transfer) {
            Some(data) => callback(&data),
            None => warn!(
                "Dropping transfer at {} Hz: {} power bins for FFT size {}",
                transfer.frequency_hz,
                transfer.power_db.len(),
                transfer.fft_size
            ),
        }
    }
}

impl std::fmt::Debug for SweepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepContext")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(power: &[f32]) -> Transfer<'_> {
        Transfer {
            frequency_hz: 2_400_000_000,
            sample_rate_hz: 20_000_000,
            fft_size: power.len(),
            bin_width_hz: 20_000_000.0 / power.len() as f64,
            power_db: power,
            ranges_mhz: &[2400, 2500],
        }
    }

    #[test]
    fn extracts_quarter_bands_after_dc_bin() {
        let power: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let data = FftSweepData::from_transfer(&transfer(&power)).unwrap();

        assert_eq!(data.fft_size, 16);
        assert_eq!(data.freq_ranges_mhz, vec![2400, 2500]);
        assert_eq!(data.lower.start_hz, 2_400_000_000);
        assert_eq!(data.lower.end_hz, 2_405_000_000);
        assert_eq!(data.lower.power_db, vec![11.0, 12.0, 13.0, 14.0]);
        assert_eq!(data.upper.start_hz, 2_410_000_000);
        assert_eq!(data.upper.end_hz, 2_415_000_000);
        assert_eq!(data.upper.power_db, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn sweeper_sized_fft_fits() {
        let power = vec![-90.0; 404];
        let data = FftSweepData::from_transfer(&transfer(&power)).unwrap();
        assert_eq!(data.lower.power_db.len(), 101);
        assert_eq!(data.upper.power_db.len(), 101);
    }

    #[test]
    fn short_transfer_is_rejected() {
        let power = vec![0.0; 16];
        let mut t = transfer(&power);
        t.fft_size = 32;
        assert!(FftSweepData::from_transfer(&t).is_none());

        t.fft_size = 2;
        assert!(FftSweepData::from_transfer(&t).is_none());
    }
}
