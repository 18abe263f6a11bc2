//! Hardware session boundary.
//!
//! A [`SweepDriver`] opens a [`SweepDevice`], which in turn hands out a
//! [`SweepSession`]. Once started, a session's worker thread calls the
//! registered [`SweepContext`] with one [`Transfer`] per tuning. Every call
//! returns a [`DeviceResult`]; the controller decides which failures matter.

use crate::controller::SweepContext;
use crate::error::DeviceResult;
use crate::range::ScanRangeSet;

pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 20_000_000;
pub const DEFAULT_BASEBAND_FILTER_BANDWIDTH_HZ: u32 = 15_000_000;
pub const DEFAULT_FFT_BIN_WIDTH_HZ: u32 = 50_000;

/// Distance between consecutive tunings of one range.
pub const TUNE_STEP_MHZ: u16 = 20;
/// Size of the sweeper's range table.
pub const MAX_SWEEP_RANGES: usize = 10;

/// Fixed radio settings applied on every connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    pub sample_rate_hz: u32,
    pub baseband_filter_hz: u32,
    pub bin_width_hz: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            baseband_filter_hz: DEFAULT_BASEBAND_FILTER_BANDWIDTH_HZ,
            bin_width_hz: DEFAULT_FFT_BIN_WIDTH_HZ,
        }
    }
}

/// FFT size the sweeper picks for a requested bin width.
///
/// The size is rounded up until `size + 4` is a multiple of 8, so the actual
/// bin width is `sample_rate / size`, usually a little under the request.
pub fn fft_size_for_bin_width(sample_rate_hz: u32, bin_width_hz: u32) -> usize {
    let mut size = (sample_rate_hz / bin_width_hz.max(1)).max(4) as usize;
    while (size + 4) % 8 != 0 {
        size += 1;
    }
    size
}

/// One raw FFT frame, produced by the hardware for a single tuning.
#[derive(Debug, Clone, Copy)]
pub struct Transfer<'a> {
    /// Lower edge of the tuning, in Hz.
    pub frequency_hz: u64,
    pub sample_rate_hz: u64,
    pub fft_size: usize,
    pub bin_width_hz: f64,
    /// Unshifted FFT output in dB, `fft_size` entries, DC bin first.
    pub power_db: &'a [f32],
    /// The sweeper's range table as flat MHz endpoints.
    pub ranges_mhz: &'a [u16],
}

pub trait SweepDriver: Send {
    fn open(&mut self) -> DeviceResult<Box<dyn SweepDevice>>;
}

pub trait SweepDevice: Send {
    fn set_sample_rate(&mut self, hz: u32) -> DeviceResult<()>;
    fn set_baseband_filter_bandwidth(&mut self, hz: u32) -> DeviceResult<()>;
    fn set_amp_enable(&mut self, enable: bool) -> DeviceResult<()>;
    fn set_lna_gain(&mut self, db: u32) -> DeviceResult<()>;
    fn set_vga_gain(&mut self, db: u32) -> DeviceResult<()>;
    fn init_sweep(&mut self) -> DeviceResult<Box<dyn SweepSession>>;
    fn close(&mut self) -> DeviceResult<()>;
}

pub trait SweepSession: Send {
    /// Registers the handler invoked from the worker thread. Replaces any
    /// previous one.
    fn set_transfer_handler(&mut self, handler: SweepContext) -> DeviceResult<()>;
    fn set_ranges(&mut self, ranges: &ScanRangeSet) -> DeviceResult<()>;
    fn setup_fft(&mut self, bin_width_hz: u32) -> DeviceResult<()>;
    /// Starts an infinite sweep.
    fn start(&mut self) -> DeviceResult<()>;
    /// Must not block on the worker thread: the caller may hold the
    /// controller lock the worker is waiting for.
    fn stop(&mut self) -> DeviceResult<()>;
}
