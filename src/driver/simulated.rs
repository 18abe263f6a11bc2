//! A software sweeper with the same tuning pattern and FFT layout as the
//! HackRF, for running without hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::controller::SweepContext;
use crate::device::{
    fft_size_for_bin_width, SweepDevice, SweepDriver, SweepSession, Transfer,
    DEFAULT_BASEBAND_FILTER_BANDWIDTH_HZ, DEFAULT_FFT_BIN_WIDTH_HZ, DEFAULT_SAMPLE_RATE_HZ,
    TUNE_STEP_MHZ,
};
use crate::error::{DeviceError, DeviceResult};
use crate::range::ScanRangeSet;

/// Total gain at which tones read at their nominal level.
const REFERENCE_GAIN_DB: f32 = 40.0;

/// A carrier present in the simulated spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: u64,
    pub power_db: f32,
}

impl Tone {
    pub fn new(frequency_hz: u64, power_db: f32) -> Self {
        Self {
            frequency_hz,
            power_db,
        }
    }
}

#[derive(Debug, Clone)]
struct Scene {
    tones: Vec<Tone>,
    noise_floor_db: f32,
    jitter_db: f32,
}

impl Scene {
    /// Fills `power` with one unshifted FFT frame for the tuning at `freq_hz`.
    fn render(&self, freq_hz: u64, radio: &RadioSnapshot, rng: &mut SmallRng, power: &mut Vec<f32>) {
        let size = radio.fft_size;
        let bin_width = radio.bin_width_hz;
        let centre = freq_hz as f64 + 3.0 * f64::from(radio.sample_rate_hz) / 8.0;
        let gain = radio.total_gain_db - REFERENCE_GAIN_DB;

        power.clear();
        power.extend((0..size).map(|i| {
            let offset = if i < size / 2 {
                i as f64
            } else {
                -((size - i) as f64)
            };
            let bin_freq = centre + offset * bin_width;

            let jitter = if self.jitter_db > 0.0 {
                rng.gen_range(-self.jitter_db..self.jitter_db)
            } else {
                0.0
            };
            let mut level = self.noise_floor_db + jitter;
            for tone in &self.tones {
                let distance = (bin_freq - tone.frequency_hz as f64) / bin_width;
                let rolloff = 20.0 * (1.0 + distance * distance).log10() as f32;
                level = level.max(tone.power_db - rolloff);
            }
            level + gain
        }));
    }
}

#[derive(Debug)]
struct Radio {
    open: bool,
    sample_rate_hz: u32,
    baseband_filter_hz: u32,
    amp_enable: bool,
    lna_gain_db: u32,
    vga_gain_db: u32,
    ranges: Option<ScanRangeSet>,
    fft_size: usize,
    handler: Option<SweepContext>,
}

struct RadioSnapshot {
    sample_rate_hz: u32,
    fft_size: usize,
    bin_width_hz: f64,
    total_gain_db: f32,
}

impl Radio {
    fn snapshot(&self) -> RadioSnapshot {
        let amp = if self.amp_enable { crate::gain::AMP_GAIN_DB as u32 } else { 0 };
        RadioSnapshot {
            sample_rate_hz: self.sample_rate_hz,
            fft_size: self.fft_size,
            bin_width_hz: f64::from(self.sample_rate_hz) / self.fft_size as f64,
            total_gain_db: (self.lna_gain_db + self.vga_gain_db + amp) as f32,
        }
    }
}

fn lock(radio: &Mutex<Radio>) -> MutexGuard<'_, Radio> {
    radio.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opens simulated radios that sweep a synthetic scene.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    scene: Scene,
    transfer_interval: Duration,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self {
            scene: Scene {
                // wifi channels 1, 6 and 11
                tones: vec![
                    Tone::new(2_412_000_000, -35.0),
                    Tone::new(2_437_000_000, -45.0),
                    Tone::new(2_462_000_000, -40.0),
                ],
                noise_floor_db: -90.0,
                jitter_db: 3.0,
            },
            transfer_interval: Duration::from_millis(1),
        }
    }
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tones(mut self, tones: Vec<Tone>) -> Self {
        self.scene.tones = tones;
        self
    }

    pub fn with_noise(mut self, floor_db: f32, jitter_db: f32) -> Self {
        self.scene.noise_floor_db = floor_db;
        self.scene.jitter_db = jitter_db.abs();
        self
    }

    /// Pause between transfers; zero sweeps as fast as the consumer allows.
    pub fn with_transfer_interval(mut self, interval: Duration) -> Self {
        self.transfer_interval = interval;
        self
    }
}

impl SweepDriver for SimulatedDriver {
    fn open(&mut self) -> DeviceResult<Box<dyn SweepDevice>> {
        info!("Opening simulated sweeper with {} tones", self.scene.tones.len());
        let radio = Radio {
            open: true,
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            baseband_filter_hz: DEFAULT_BASEBAND_FILTER_BANDWIDTH_HZ,
            amp_enable: false,
            lna_gain_db: 0,
            vga_gain_db: 0,
            ranges: None,
            fft_size: fft_size_for_bin_width(DEFAULT_SAMPLE_RATE_HZ, DEFAULT_FFT_BIN_WIDTH_HZ),
            handler: None,
        };
        Ok(Box::new(SimulatedDevice {
            radio: Arc::new(Mutex::new(radio)),
            scene: Arc::new(self.scene.clone()),
            transfer_interval: self.transfer_interval,
        }))
    }
}

struct SimulatedDevice {
    radio: Arc<Mutex<Radio>>,
    scene: Arc<Scene>,
    transfer_interval: Duration,
}

impl SweepDevice for SimulatedDevice {
    fn set_sample_rate(&mut self, hz: u32) -> DeviceResult<()> {
        if hz == 0 {
            return Err(DeviceError::hardware("set sample rate", "zero sample rate"));
        }
        lock(&self.radio).sample_rate_hz = hz;
        Ok(())
    }

    fn set_baseband_filter_bandwidth(&mut self, hz: u32) -> DeviceResult<()> {
        lock(&self.radio).baseband_filter_hz = hz;
        Ok(())
    }

    fn set_amp_enable(&mut self, enable: bool) -> DeviceResult<()> {
        lock(&self.radio).amp_enable = enable;
        Ok(())
    }

    fn set_lna_gain(&mut self, db: u32) -> DeviceResult<()> {
        lock(&self.radio).lna_gain_db = db;
        Ok(())
    }

    fn set_vga_gain(&mut self, db: u32) -> DeviceResult<()> {
        lock(&self.radio).vga_gain_db = db;
        Ok(())
    }

    fn init_sweep(&mut self) -> DeviceResult<Box<dyn SweepSession>> {
        Ok(Box::new(SimulatedSession {
            radio: Arc::clone(&self.radio),
            scene: Arc::clone(&self.scene),
            transfer_interval: self.transfer_interval,
            running: None,
        }))
    }

    fn close(&mut self) -> DeviceResult<()> {
        let mut radio = lock(&self.radio);
        radio.open = false;
        radio.handler = None;
        Ok(())
    }
}

struct SimulatedSession {
    radio: Arc<Mutex<Radio>>,
    scene: Arc<Scene>,
    transfer_interval: Duration,
    running: Option<Arc<AtomicBool>>,
}

impl SweepSession for SimulatedSession {
    fn set_transfer_handler(&mut self, handler: SweepContext) -> DeviceResult<()> {
        lock(&self.radio).handler = Some(handler);
        Ok(())
    }

    fn set_ranges(&mut self, ranges: &ScanRangeSet) -> DeviceResult<()> {
        lock(&self.radio).ranges = Some(ranges.clone());
        Ok(())
    }

    fn setup_fft(&mut self, bin_width_hz: u32) -> DeviceResult<()> {
        let mut radio = lock(&self.radio);
        radio.fft_size = fft_size_for_bin_width(radio.sample_rate_hz, bin_width_hz);
        debug!(
            "Simulated FFT size {} for {} Hz bins",
            radio.fft_size, bin_width_hz
        );
        Ok(())
    }

    fn start(&mut self) -> DeviceResult<()> {
        if self.running.is_some() {
            return Ok(());
        }
        {
            let radio = lock(&self.radio);
            if !radio.open {
                return Err(DeviceError::hardware("sweep start", "device closed"));
            }
            let Some(ranges) = &radio.ranges else {
                return Err(DeviceError::hardware("sweep start", "no scan ranges set"));
            };
            debug!(
                "Simulated sweep of {ranges} at {} Hz, {} Hz filter, FFT size {}",
                radio.sample_rate_hz, radio.baseband_filter_hz, radio.fft_size
            );
        }

        let running = Arc::new(AtomicBool::new(true));
        let worker = Worker {
            radio: Arc::clone(&self.radio),
            scene: Arc::clone(&self.scene),
            interval: self.transfer_interval,
            running: Arc::clone(&running),
        };
        thread::Builder::new()
            .name("simulated-sweep".into())
            .spawn(move || worker.run())?;
        self.running = Some(running);
        Ok(())
    }

    fn stop(&mut self) -> DeviceResult<()> {
        // the worker notices on its next transfer; never joined here
        if let Some(running) = self.running.take() {
            running.store(false, Ordering::Release);
        }
        Ok(())
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.store(false, Ordering::Release);
        }
    }
}

struct Worker {
    radio: Arc<Mutex<Radio>>,
    scene: Arc<Scene>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        let mut rng = SmallRng::from_entropy();
        let mut power = Vec::new();
        let step_hz = u64::from(TUNE_STEP_MHZ) * 1_000_000;
        let mut cycles = 0u64;

        'sweep: while self.running.load(Ordering::Acquire) {
            // settings are picked up once per cycle, like the hardware's range table
            let (ranges, handler, radio) = {
                let radio = lock(&self.radio);
                if !radio.open {
                    break;
                }
                let (Some(ranges), Some(handler)) = (radio.ranges.clone(), radio.handler.clone())
                else {
                    break;
                };
                (ranges, handler, radio.snapshot())
            };
            let endpoints = ranges.endpoints();
            let rate = u64::from(radio.sample_rate_hz);

            for range in ranges.iter() {
                let span_hz = range.end_hz() - range.start_hz();
                let steps = span_hz.div_ceil(step_hz);
                for step in 0..steps {
                    for offset in [0, rate / 4] {
                        if !self.running.load(Ordering::Acquire) {
                            break 'sweep;
                        }
                        let freq = range.start_hz() + step * step_hz + offset;
                        self.scene.render(freq, &radio, &mut rng, &mut power);
                        handler.deliver(&Transfer {
                            frequency_hz: freq,
                            sample_rate_hz: rate,
                            fft_size: radio.fft_size,
                            bin_width_hz: radio.bin_width_hz,
                            power_db: &power,
                            ranges_mhz: &endpoints,
                        });
                        if !self.interval.is_zero() {
                            thread::sleep(self.interval);
                        }
                    }
                }
            }
            cycles += 1;
        }
        debug!("Simulated sweep stopped after {cycles} cycles");
    }
}
