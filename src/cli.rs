use clap::Parser;
use log::info;

use crate::device::SweepConfig;
use crate::error::ValidationError;
use crate::gain::GainState;
use crate::range::{ScanRange, ScanRangeSet};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct SweepParams {
    /// RX VGA (baseband) gain, 0-62dB, 2dB steps
    #[arg(short = 'g', long, default_value_t = 14)]
    pub vga_gain: i32,

    /// RX LNA (IF) gain, 0-40dB, 8dB steps
    #[arg(short = 'l', long, default_value_t = 32)]
    pub lna_gain: i32,

    /// Enable the RX RF amplifier (+14dB)
    #[arg(short = 'a', long)]
    pub amp_enable: bool,

    /// FFT bin width (frequency resolution) in Hz
    #[arg(short = 'w', long, default_value_t = 50_000)]
    pub bin_width: u32,

    /// Frequency range in MHz as start:end, repeat for up to 10 ranges
    #[arg(short = 'f', long = "freq", default_value = "2400:2500")]
    pub ranges: Vec<ScanRange>,

    /// Number of sweeps kept in the waterfall
    #[arg(long, default_value_t = 100)]
    pub depth: usize,

    /// Maximum dB value for visualization
    #[arg(long, default_value_t = -10.0, allow_hyphen_values = true)]
    pub max_db: f32,

    /// Minimum dB value for visualization
    #[arg(long, default_value_t = -90.0, allow_hyphen_values = true)]
    pub min_db: f32,

    /// Sweep a synthetic spectrum instead of a HackRF
    #[arg(long)]
    pub simulate: bool,

    /// Serial number of the HackRF to use
    #[arg(short = 'd', long)]
    pub serial: Option<String>,
}

impl SweepParams {
    pub fn gain_state(&self) -> Result<GainState, ValidationError> {
        GainState::new(self.amp_enable, self.lna_gain, self.vga_gain)
    }

    pub fn scan_ranges(&self) -> Result<ScanRangeSet, ValidationError> {
        ScanRangeSet::new(self.ranges.clone())
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            bin_width_hz: self.bin_width,
            ..SweepConfig::default()
        }
    }

    pub fn log_summary(&self) {
        info!("Sweep Parameters:");
        info!(
            "RX gain: IF {} dB, BB {} dB, RF AMP {}",
            self.lna_gain,
            self.vga_gain,
            if self.amp_enable { "ON (14dB)" } else { "OFF" }
        );
        info!("FFT bin width: {}", self.bin_width);
        for range in &self.ranges {
            info!("Frequency range: {range}");
        }
        let span: u32 = self.ranges.iter().map(|r| u32::from(r.span_mhz())).sum();
        info!(
            "Expected spectrum width: ~{}",
            (span as f32 * 1_000_000.0) / (self.bin_width.max(1) as f32)
        );
        info!("Waterfall depth: {}", self.depth);
        info!("Visualization dB range: {} to {}", self.min_db, self.max_db);
        if self.simulate {
            info!("Using the simulated sweeper");
        }
    }
}
