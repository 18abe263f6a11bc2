//! Drives a HackRF through the `hackrf_sweep` command line tool.
//!
//! `hackrf_sweep` prints every transfer as two text lines, one per
//! extracted quarter band. The reader thread pairs them back up and rebuilds
//! a raw FFT frame with both bands at their usual offsets, so downstream
//! extraction works the same as for an in-process sweeper.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, info, warn};

use crate::controller::SweepContext;
use crate::device::{
    SweepDevice, SweepDriver, SweepSession, Transfer, DEFAULT_BASEBAND_FILTER_BANDWIDTH_HZ,
    DEFAULT_FFT_BIN_WIDTH_HZ, DEFAULT_SAMPLE_RATE_HZ,
};
use crate::error::{DeviceError, DeviceResult};
use crate::range::ScanRangeSet;
use crate::sweep::SweepLine;

/// Bin widths `hackrf_sweep -w` accepts.
const BIN_WIDTH_RANGE_HZ: std::ops::RangeInclusive<u32> = 2_445..=5_000_000;

#[derive(Debug, Clone)]
pub struct HackrfSweepDriver {
    program: String,
    info_program: String,
    serial: Option<String>,
}

impl Default for HackrfSweepDriver {
    fn default() -> Self {
        Self {
            program: "hackrf_sweep".into(),
            info_program: "hackrf_info".into(),
            serial: None,
        }
    }
}

impl HackrfSweepDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path or name of the `hackrf_sweep` executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_info_program(mut self, program: impl Into<String>) -> Self {
        self.info_program = program.into();
        self
    }

    /// Selects a board by serial number when several are attached.
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }
}

impl SweepDriver for HackrfSweepDriver {
    fn open(&mut self) -> DeviceResult<Box<dyn SweepDevice>> {
        let output = Command::new(&self.info_program)
            .output()
            .map_err(|e| DeviceError::NotFound(format!("{}: {e}", self.info_program)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.trim();
            return Err(DeviceError::NotFound(if reason.is_empty() {
                "no HackRF boards found".into()
            } else {
                reason.to_string()
            }));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(serial) = stdout
            .lines()
            .find_map(|line| line.trim().strip_prefix("Serial number:"))
        {
            info!("Found HackRF {}", serial.trim());
        }

        let process = Process {
            program: self.program.clone(),
            serial: self.serial.clone(),
            amp_enable: false,
            lna_gain_db: 0,
            vga_gain_db: 0,
            bin_width_hz: DEFAULT_FFT_BIN_WIDTH_HZ,
            ranges: None,
            handler: None,
            child: None,
            live: Arc::new(AtomicBool::new(false)),
        };
        Ok(Box::new(HackrfSweepDevice {
            process: Arc::new(Mutex::new(process)),
        }))
    }
}

/// Settings for the next `hackrf_sweep` run, plus the run itself.
#[derive(Debug)]
struct Process {
    program: String,
    serial: Option<String>,
    amp_enable: bool,
    lna_gain_db: u32,
    vga_gain_db: u32,
    bin_width_hz: u32,
    ranges: Option<ScanRangeSet>,
    handler: Option<SweepContext>,
    child: Option<Child>,
    // cleared when the child is killed, silencing its reader
    live: Arc<AtomicBool>,
}

impl Process {
    fn command(&self, ranges: &ScanRangeSet) -> Command {
        let mut command = Command::new(&self.program);
        for range in ranges.iter() {
            command
                .arg("-f")
                .arg(format!("{}:{}", range.start_mhz, range.end_mhz));
        }
        command
            .arg("-a")
            .arg(if self.amp_enable { "1" } else { "0" })
            .arg("-l")
            .arg(self.lna_gain_db.to_string())
            .arg("-g")
            .arg(self.vga_gain_db.to_string())
            .arg("-w")
            .arg(self.bin_width_hz.to_string());
        if let Some(serial) = &self.serial {
            command.arg("-d").arg(serial);
        }
        command.stdout(Stdio::piped()).stderr(Stdio::null());
        command
    }

    fn spawn(&mut self) -> DeviceResult<()> {
        let ranges = self
            .ranges
            .clone()
            .ok_or_else(|| DeviceError::hardware("hackrf_sweep start", "no scan ranges set"))?;
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| DeviceError::hardware("hackrf_sweep start", "no transfer handler"))?;

        let mut command = self.command(&ranges);
        info!("Running {command:?}");
        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DeviceError::hardware("hackrf_sweep start", "stdout not captured"))?;

        let endpoints = ranges.endpoints();
        let live = Arc::new(AtomicBool::new(true));
        let reader_live = Arc::clone(&live);
        if let Err(e) = thread::Builder::new()
            .name("hackrf_sweep-reader".into())
            .spawn(move || {
                read_transfers(stdout, &endpoints, &reader_live, |t| handler.deliver(t))
            })
        {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e.into());
        }
        self.live = live;
        self.child = Some(child);
        Ok(())
    }

    fn kill(&mut self) {
        self.live.store(false, Ordering::Release);
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("hackrf_sweep already gone: {e}");
            }
            match child.wait() {
                Ok(status) => debug!("hackrf_sweep exited with {status}"),
                Err(e) => warn!("Could not reap hackrf_sweep: {e}"),
            }
        }
    }

    /// Applies a setting change to a running sweep by starting it over.
    fn respawn_if_running(&mut self) -> DeviceResult<()> {
        if self.child.is_some() {
            self.kill();
            self.spawn()?;
        }
        Ok(())
    }
}

fn lock(process: &Mutex<Process>) -> MutexGuard<'_, Process> {
    process.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pairs lines into transfers until the output closes or `live` is cleared.
fn read_transfers(
    output: impl Read,
    endpoints: &[u16],
    live: &AtomicBool,
    mut deliver: impl FnMut(&Transfer<'_>),
) {
    let mut pending: Option<SweepLine> = None;
    let mut frame = Vec::new();

    for line in BufReader::new(output).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Reading hackrf_sweep output failed: {e}");
                break;
            }
        };
        let parsed = match SweepLine::from_line(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Skipping hackrf_sweep line: {e}");
                continue;
            }
        };
        match pending.take() {
            Some(lower) if lower.pairs_with(&parsed) => {
                // output still buffered from a killed run belongs to old settings
                if !live.load(Ordering::Acquire) {
                    break;
                }
                rebuild_frame(&lower, &parsed, &mut frame);
                deliver(&Transfer {
                    frequency_hz: lower.hz_low,
                    sample_rate_hz: lower.span_hz() * 4,
                    fft_size: frame.len(),
                    bin_width_hz: lower.hz_bin_width,
                    power_db: &frame,
                    ranges_mhz: endpoints,
                });
            }
            _ => pending = Some(parsed),
        }
    }
    debug!("hackrf_sweep output closed");
}

/// Lays a pair of quarter bands out as an unshifted FFT frame of four times
/// their length. Bins `hackrf_sweep` does not print are NaN.
fn rebuild_frame(lower: &SweepLine, upper: &SweepLine, frame: &mut Vec<f32>) {
    let quarter = lower.db.len();
    let size = quarter * 4;
    frame.clear();
    frame.resize(size, f32::NAN);

    let lower_start = 1 + size * 5 / 8;
    let upper_start = 1 + size / 8;
    if let Some(bins) = frame.get_mut(lower_start..lower_start + quarter) {
        bins.copy_from_slice(&lower.db);
    }
    if let Some(bins) = frame.get_mut(upper_start..upper_start + quarter) {
        bins.copy_from_slice(&upper.db);
    }
}

struct HackrfSweepDevice {
    process: Arc<Mutex<Process>>,
}

impl SweepDevice for HackrfSweepDevice {
    fn set_sample_rate(&mut self, hz: u32) -> DeviceResult<()> {
        if hz != DEFAULT_SAMPLE_RATE_HZ {
            return Err(DeviceError::hardware(
                "set sample rate",
                format!("hackrf_sweep only runs at {DEFAULT_SAMPLE_RATE_HZ} Hz"),
            ));
        }
        Ok(())
    }

    fn set_baseband_filter_bandwidth(&mut self, hz: u32) -> DeviceResult<()> {
        if hz != DEFAULT_BASEBAND_FILTER_BANDWIDTH_HZ {
            warn!("hackrf_sweep picks its own baseband filter, ignoring {hz} Hz");
        }
        Ok(())
    }

    fn set_amp_enable(&mut self, enable: bool) -> DeviceResult<()> {
        let mut process = lock(&self.process);
        process.amp_enable = enable;
        process.respawn_if_running()
    }

    fn set_lna_gain(&mut self, db: u32) -> DeviceResult<()> {
        let mut process = lock(&self.process);
        process.lna_gain_db = db;
        process.respawn_if_running()
    }

    fn set_vga_gain(&mut self, db: u32) -> DeviceResult<()> {
        let mut process = lock(&self.process);
        process.vga_gain_db = db;
        process.respawn_if_running()
    }

    fn init_sweep(&mut self) -> DeviceResult<Box<dyn SweepSession>> {
        Ok(Box::new(HackrfSweepSession {
            process: Arc::clone(&self.process),
        }))
    }

    fn close(&mut self) -> DeviceResult<()> {
        let mut process = lock(&self.process);
        process.kill();
        process.handler = None;
        Ok(())
    }
}

struct HackrfSweepSession {
    process: Arc<Mutex<Process>>,
}

impl SweepSession for HackrfSweepSession {
    fn set_transfer_handler(&mut self, handler: SweepContext) -> DeviceResult<()> {
        lock(&self.process).handler = Some(handler);
        Ok(())
    }

    fn set_ranges(&mut self, ranges: &ScanRangeSet) -> DeviceResult<()> {
        let mut process = lock(&self.process);
        process.ranges = Some(ranges.clone());
        process.respawn_if_running()
    }

    fn setup_fft(&mut self, bin_width_hz: u32) -> DeviceResult<()> {
        if !BIN_WIDTH_RANGE_HZ.contains(&bin_width_hz) {
            return Err(DeviceError::hardware(
                "setup fft",
                format!("bin width {bin_width_hz} Hz outside {BIN_WIDTH_RANGE_HZ:?}"),
            ));
        }
        lock(&self.process).bin_width_hz = bin_width_hz;
        Ok(())
    }

    fn start(&mut self) -> DeviceResult<()> {
        let mut process = lock(&self.process);
        if process.child.is_some() {
            return Ok(());
        }
        process.spawn()
    }

    fn stop(&mut self) -> DeviceResult<()> {
        lock(&self.process).kill();
        Ok(())
    }
}

impl Drop for HackrfSweepSession {
    fn drop(&mut self) {
        lock(&self.process).kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::FftSweepData;

    const LOWER: &str =
        "2024-05-31, 16:05:22.927896, 2400000000, 2405000000, 1250000.00, 4, -14.27, -26.26, -44.80, -53.68";
    const UPPER: &str =
        "2024-05-31, 16:05:22.927896, 2410000000, 2415000000, 1250000.00, 4, -60.02, -62.46, -67.40, -58.20";

    #[test]
    fn rebuilt_frame_extracts_to_the_printed_bands() {
        let lower = SweepLine::from_line(LOWER).unwrap();
        let upper = SweepLine::from_line(UPPER).unwrap();
        let mut frame = Vec::new();
        rebuild_frame(&lower, &upper, &mut frame);
        assert_eq!(frame.len(), 16);

        let data = FftSweepData::from_transfer(&Transfer {
            frequency_hz: lower.hz_low,
            sample_rate_hz: lower.span_hz() * 4,
            fft_size: frame.len(),
            bin_width_hz: lower.hz_bin_width,
            power_db: &frame,
            ranges_mhz: &[2400, 2420],
        })
        .unwrap();

        assert_eq!(data.lower.start_hz, 2_400_000_000);
        assert_eq!(data.lower.end_hz, 2_405_000_000);
        assert_eq!(data.lower.power_db, lower.db);
        assert_eq!(data.upper.start_hz, 2_410_000_000);
        assert_eq!(data.upper.end_hz, 2_415_000_000);
        assert_eq!(data.upper.power_db, upper.db);
    }

    #[test]
    fn command_line_reflects_settings() {
        let process = Process {
            program: "hackrf_sweep".into(),
            serial: Some("0000000000000000088869dc3826a51b".into()),
            amp_enable: true,
            lna_gain_db: 24,
            vga_gain_db: 20,
            bin_width_hz: 100_000,
            ranges: None,
            handler: None,
            child: None,
            live: Arc::new(AtomicBool::new(false)),
        };
        let ranges = ScanRangeSet::from_endpoints(&[100, 200, 2400, 2500]).unwrap();
        let command = process.command(&ranges);
        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-f", "100:200", "-f", "2400:2500", "-a", "1", "-l", "24", "-g", "20", "-w",
                "100000", "-d", "0000000000000000088869dc3826a51b"
            ]
        );
    }

    #[test]
    fn missing_tool_is_not_found() {
        let mut driver = HackrfSweepDriver::new().with_info_program("/nonexistent/hackrf_info");
        assert!(matches!(driver.open(), Err(DeviceError::NotFound(_))));
    }

    #[test]
    fn bin_width_outside_tool_limits_is_rejected() {
        let process = Arc::new(Mutex::new(Process {
            program: "hackrf_sweep".into(),
            serial: None,
            amp_enable: false,
            lna_gain_db: 0,
            vga_gain_db: 0,
            bin_width_hz: DEFAULT_FFT_BIN_WIDTH_HZ,
            ranges: None,
            handler: None,
            child: None,
            live: Arc::new(AtomicBool::new(false)),
        }));
        let mut session = HackrfSweepSession { process };
        assert!(session.setup_fft(1_000).is_err());
        assert!(session.setup_fft(10_000_000).is_err());
        assert!(session.setup_fft(250_000).is_ok());
    }

    #[test]
    fn output_stops_reaching_the_handler_once_killed() {
        let output = format!("{LOWER}\n{UPPER}\n{LOWER}\n{UPPER}\n");
        let mut starts = Vec::new();
        let live = AtomicBool::new(true);
        read_transfers(output.as_bytes(), &[2400, 2420], &live, |t| {
            starts.push(t.frequency_hz)
        });
        assert_eq!(starts, [2_400_000_000, 2_400_000_000]);

        starts.clear();
        live.store(false, Ordering::Release);
        read_transfers(output.as_bytes(), &[2400, 2420], &live, |t| {
            starts.push(t.frequency_hz)
        });
        assert!(starts.is_empty());
    }

    #[test]
    fn killing_a_process_clears_its_reader_flag() {
        let mut process = Process {
            program: "hackrf_sweep".into(),
            serial: None,
            amp_enable: false,
            lna_gain_db: 0,
            vga_gain_db: 0,
            bin_width_hz: DEFAULT_FFT_BIN_WIDTH_HZ,
            ranges: None,
            handler: None,
            child: None,
            live: Arc::new(AtomicBool::new(true)),
        };
        let reader_live = Arc::clone(&process.live);
        process.kill();
        assert!(!reader_live.load(Ordering::Acquire));
    }
}
