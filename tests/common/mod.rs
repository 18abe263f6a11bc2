//! A driver that records every hardware call and lets tests fire transfers
//! through the registered handler by hand.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use hackrf_sweep_monitor::{
    DeviceError, DeviceResult, ScanRangeSet, SweepContext, SweepDevice, SweepDriver,
    SweepSession, Transfer,
};

#[derive(Debug, Default)]
pub struct Recorder {
    pub calls: Vec<String>,
    pub handlers: Vec<SweepContext>,
    pub opens: usize,
    pub fail_open: bool,
    pub fail_start: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Recording(pub Arc<Mutex<Recorder>>);

impl Recording {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver(&self) -> Box<dyn SweepDriver> {
        Box::new(RecordingDriver(self.clone()))
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Recorder) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }

    fn record(&self, call: String) {
        self.with(|r| r.calls.push(call));
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|r| r.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with(|r| r.calls.clear());
    }

    /// The handler registered by the most recent session.
    pub fn handler(&self) -> SweepContext {
        self.with(|r| r.handlers.last().cloned().expect("no handler registered"))
    }
}

struct RecordingDriver(Recording);

impl SweepDriver for RecordingDriver {
    fn open(&mut self) -> DeviceResult<Box<dyn SweepDevice>> {
        let fail = self.0.with(|r| {
            r.opens += 1;
            r.fail_open
        });
        if fail {
            return Err(DeviceError::NotFound("unplugged".into()));
        }
        self.0.record("open".into());
        Ok(Box::new(RecordingDevice(self.0.clone())))
    }
}

struct RecordingDevice(Recording);

impl SweepDevice for RecordingDevice {
    fn set_sample_rate(&mut self, hz: u32) -> DeviceResult<()> {
        self.0.record(format!("sample_rate {hz}"));
        Ok(())
    }

    fn set_baseband_filter_bandwidth(&mut self, hz: u32) -> DeviceResult<()> {
        self.0.record(format!("filter {hz}"));
        Ok(())
    }

    fn set_amp_enable(&mut self, enable: bool) -> DeviceResult<()> {
        self.0.record(format!("amp {enable}"));
        Ok(())
    }

    fn set_lna_gain(&mut self, db: u32) -> DeviceResult<()> {
        self.0.record(format!("lna {db}"));
        Ok(())
    }

    fn set_vga_gain(&mut self, db: u32) -> DeviceResult<()> {
        self.0.record(format!("vga {db}"));
        Ok(())
    }

    fn init_sweep(&mut self) -> DeviceResult<Box<dyn SweepSession>> {
        self.0.record("init_sweep".into());
        Ok(Box::new(RecordingSession(self.0.clone())))
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.0.record("close".into());
        Ok(())
    }
}

struct RecordingSession(Recording);

impl SweepSession for RecordingSession {
    fn set_transfer_handler(&mut self, handler: SweepContext) -> DeviceResult<()> {
        self.0.with(|r| r.handlers.push(handler));
        Ok(())
    }

    fn set_ranges(&mut self, ranges: &ScanRangeSet) -> DeviceResult<()> {
        self.0.record(format!("ranges {:?}", ranges.endpoints()));
        Ok(())
    }

    fn setup_fft(&mut self, bin_width_hz: u32) -> DeviceResult<()> {
        self.0.record(format!("fft {bin_width_hz}"));
        Ok(())
    }

    fn start(&mut self) -> DeviceResult<()> {
        if self.0.with(|r| r.fail_start) {
            return Err(DeviceError::hardware("sweep start", "busy"));
        }
        self.0.record("start".into());
        Ok(())
    }

    fn stop(&mut self) -> DeviceResult<()> {
        self.0.record("stop".into());
        Ok(())
    }
}

/// A raw frame of `size` bins with the lower quarter band set to `lower`
/// and the upper one to `upper`.
pub fn raw_frame(size: usize, lower: f32, upper: f32) -> Vec<f32> {
    let mut power = vec![-120.0; size];
    let quarter = size / 4;
    let lower_start = 1 + size * 5 / 8;
    let upper_start = 1 + size / 8;
    power[lower_start..lower_start + quarter].fill(lower);
    power[upper_start..upper_start + quarter].fill(upper);
    power
}

/// Fires one 20 MHz-wide transfer tuned at `frequency_hz`.
pub fn fire(handler: &SweepContext, frequency_hz: u64, power: &[f32], ranges_mhz: &[u16]) {
    let size = power.len();
    handler.deliver(&Transfer {
        frequency_hz,
        sample_rate_hz: 20_000_000,
        fft_size: size,
        bin_width_hz: 20_000_000.0 / size as f64,
        power_db: power,
        ranges_mhz,
    });
}
