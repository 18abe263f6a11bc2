//! Consumer side of the FFT callback: aggregation, history and cycle
//! boundaries.

use log::{debug, info, warn};

use crate::aggregator::SpectrumAggregator;
use crate::controller::FftSweepData;
use crate::history::{HistoryBuffer, RowFill};
use crate::range::ScanRangeSet;

/// A completed sweep cycle, copied out for renderers.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub cycle: u64,
    pub bin_width_hz: f64,
    pub frequencies_mhz: Vec<f64>,
    pub powers_db: Vec<f32>,
}

impl SpectrumFrame {
    pub fn summary(&self) -> String {
        let first = self.frequencies_mhz.first().copied().unwrap_or_default();
        let last = self.frequencies_mhz.last().copied().unwrap_or_default();
        format!(
            "Sweep {}: {:.3} MHz - {:.3} MHz, {:.1} Hz bin width, {} samples, max {:.1} dB, min {:.1} dB",
            self.cycle,
            first,
            last,
            self.bin_width_hz,
            self.powers_db.len(),
            self.powers_db.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            self.powers_db.iter().copied().fold(f32::INFINITY, f32::min),
        )
    }
}

/// Feeds [`FftSweepData`] into a [`SpectrumAggregator`] and pushes one row
/// into the [`HistoryBuffer`] per sweep cycle.
///
/// A cycle ends when a lower band starts exactly at the first configured
/// range's start frequency. The aggregator is not cleared at the boundary,
/// it keeps being refined in place.
#[derive(Debug)]
pub struct SweepMonitor {
    aggregator: SpectrumAggregator,
    history: Option<HistoryBuffer>,
    depth: usize,
    init_value: f32,
    fill: RowFill,
    cycles: u64,
}

impl SweepMonitor {
    pub fn new(depth: usize, init_value: f32) -> Self {
        Self::with_fill(depth, init_value, RowFill::default())
    }

    pub fn with_fill(depth: usize, init_value: f32, fill: RowFill) -> Self {
        Self {
            aggregator: SpectrumAggregator::new(),
            history: None,
            depth,
            init_value,
            fill,
            cycles: 0,
        }
    }

    pub fn handle(&mut self, data: &FftSweepData) -> Option<SpectrumFrame> {
        let ranges = match ScanRangeSet::from_endpoints(&data.freq_ranges_mhz) {
            Ok(ranges) => ranges,
            Err(e) => {
                warn!("Ignoring sweep data with unusable ranges: {e}");
                return None;
            }
        };

        let layout_changed = self.aggregator.ranges() != Some(&ranges)
            || self.aggregator.bin_width_hz() != Some(data.bin_width_hz);
        if layout_changed {
            self.initialize(data.bin_width_hz, ranges.clone());
        }

        for band in [&data.lower, &data.upper] {
            self.aggregator
                .add_segment(band.start_hz, band.end_hz, &band.power_db);
        }

        if data.lower.start_hz != ranges.first().start_hz() {
            return None;
        }

        let history = self.history.as_mut()?;
        history.add_row(self.aggregator.spectrum());
        self.cycles += 1;
        debug!("Sweep cycle {} complete, {} bins", self.cycles, self.aggregator.len());

        Some(SpectrumFrame {
            cycle: self.cycles,
            bin_width_hz: data.bin_width_hz,
            frequencies_mhz: self.aggregator.frequency_array(),
            powers_db: self.aggregator.power_array(),
        })
    }

    fn initialize(&mut self, bin_width_hz: f64, ranges: ScanRangeSet) {
        let history = HistoryBuffer::for_ranges(
            self.depth,
            &ranges,
            bin_width_hz,
            self.init_value,
            self.fill,
        );
        info!(
            "Spectrum layout: {ranges}, {bin_width_hz:.1} Hz bins, {} columns, {} rows of history",
            history.cols(),
            self.depth
        );
        self.aggregator = SpectrumAggregator::with_layout(bin_width_hz, ranges);
        self.history = Some(history);
    }

    /// Empties the spectrum, keeping layout and history.
    pub fn reset(&mut self) {
        self.aggregator.clear();
    }

    pub fn aggregator(&self) -> &SpectrumAggregator {
        &self.aggregator
    }

    pub fn history(&self) -> Option<&HistoryBuffer> {
        self.history.as_ref()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}
