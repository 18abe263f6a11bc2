//! Reassembly of band segments into one ordered spectrum.

use std::collections::BTreeMap;

use log::trace;

use crate::range::ScanRangeSet;

#[derive(Debug, Clone, PartialEq)]
struct Layout {
    bin_width_hz: f64,
    ranges: ScanRangeSet,
}

/// Frequency-keyed spectrum built up from FFT segments.
///
/// Keys are whole Hz; the map's ascending order is the spectrum order.
/// Segments are expected in hardware order, they are not reordered.
#[derive(Debug, Clone, Default)]
pub struct SpectrumAggregator {
    layout: Option<Layout>,
    spectrum: BTreeMap<u64, f32>,
}

impl SpectrumAggregator {
    /// An uninitialized aggregator. It ignores segments until it is replaced by
    /// one built with [`SpectrumAggregator::with_layout`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layout(bin_width_hz: f64, ranges: ScanRangeSet) -> Self {
        Self {
            layout: Some(Layout {
                bin_width_hz,
                ranges,
            }),
            spectrum: BTreeMap::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.layout.is_some()
    }

    pub fn bin_width_hz(&self) -> Option<f64> {
        self.layout.as_ref().map(|l| l.bin_width_hz)
    }

    pub fn ranges(&self) -> Option<&ScanRangeSet> {
        self.layout.as_ref().map(|l| &l.ranges)
    }

    /// Spreads `power` evenly over `[start_hz, end_hz)` and upserts each bin.
    pub fn add_segment(&mut self, start_hz: u64, end_hz: u64, power: &[f32]) {
        if self.layout.is_none() {
            trace!("segment at {start_hz} Hz ignored, aggregator not initialized");
            return;
        }
        if start_hz >= end_hz || power.is_empty() {
            trace!(
                "malformed segment {start_hz}..{end_hz} Hz with {} bins ignored",
                power.len()
            );
            return;
        }

        let step = (end_hz - start_hz) as f64 / power.len() as f64;
        for (i, &db) in power.iter().enumerate() {
            let freq = (start_hz as f64 + i as f64 * step) as u64;
            self.spectrum.insert(freq, db);
        }
    }

    /// Number of columns a full pass over the configured ranges produces.
    pub fn num_datapoints(&self) -> usize {
        let Some(layout) = &self.layout else {
            return 0;
        };
        layout
            .ranges
            .iter()
            .map(|r| r.bins(layout.bin_width_hz))
            .sum()
    }

    /// Bin frequencies in MHz, ascending.
    pub fn frequency_array(&self) -> Vec<f64> {
        self.spectrum.keys().map(|&hz| hz as f64 / 1e6).collect()
    }

    /// Power values, index-aligned with [`SpectrumAggregator::frequency_array`].
    pub fn power_array(&self) -> Vec<f32> {
        self.spectrum.values().copied().collect()
    }

    pub fn spectrum(&self) -> &BTreeMap<u64, f32> {
        &self.spectrum
    }

    pub fn len(&self) -> usize {
        self.spectrum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectrum.is_empty()
    }

    /// Drops all bins; the layout is kept.
    pub fn clear(&mut self) {
        self.spectrum.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::ScanRange;

    fn aggregator() -> SpectrumAggregator {
        SpectrumAggregator::with_layout(50_000.0, ScanRangeSet::single(2400, 2500).unwrap())
    }

    #[test]
    fn places_samples_without_right_edge() {
        let mut agg = aggregator();
        agg.add_segment(2_400_000_000, 2_400_200_000, &[-80.0, -70.0, -60.0, -50.0]);

        assert_eq!(agg.frequency_array(), vec![2400.0, 2400.05, 2400.1, 2400.15]);
        assert_eq!(agg.power_array(), vec![-80.0, -70.0, -60.0, -50.0]);
    }

    #[test]
    fn repeated_segment_is_idempotent() {
        let mut agg = aggregator();
        agg.add_segment(2_400_000_000, 2_400_200_000, &[-80.0, -70.0, -60.0, -50.0]);
        let before = agg.spectrum().clone();
        agg.add_segment(2_400_000_000, 2_400_200_000, &[-80.0, -70.0, -60.0, -50.0]);
        assert_eq!(agg.spectrum(), &before);
    }

    #[test]
    fn later_segments_overwrite_and_interleave() {
        let mut agg = aggregator();
        agg.add_segment(2_400_200_000, 2_400_400_000, &[-1.0, -2.0]);
        agg.add_segment(2_400_000_000, 2_400_200_000, &[-3.0, -4.0]);
        agg.add_segment(2_400_200_000, 2_400_400_000, &[-5.0, -6.0]);

        assert_eq!(agg.frequency_array(), vec![2400.0, 2400.1, 2400.2, 2400.3]);
        assert_eq!(agg.power_array(), vec![-3.0, -4.0, -5.0, -6.0]);
    }

    #[test]
    fn uninitialized_accepts_nothing() {
        let mut agg = SpectrumAggregator::new();
        agg.add_segment(2_400_000_000, 2_400_200_000, &[-80.0]);
        assert!(!agg.is_initialized());
        assert!(agg.is_empty());
        assert_eq!(agg.num_datapoints(), 0);
    }

    #[test]
    fn malformed_segments_are_ignored() {
        let mut agg = aggregator();
        agg.add_segment(2_400_200_000, 2_400_000_000, &[-80.0]);
        agg.add_segment(2_400_000_000, 2_400_200_000, &[]);
        assert!(agg.is_empty());
        assert_eq!(agg.frequency_array().len(), agg.power_array().len());
    }

    #[test]
    fn datapoints_sum_over_ranges() {
        assert_eq!(aggregator().num_datapoints(), 2000);

        let ranges = ScanRangeSet::new(vec![ScanRange::new(100, 200), ScanRange::new(300, 350)]).unwrap();
        let agg = SpectrumAggregator::with_layout(1_000_000.0, ranges);
        assert_eq!(agg.num_datapoints(), 150);
    }

    #[test]
    fn clear_keeps_layout() {
        let mut agg = aggregator();
        agg.add_segment(2_400_000_000, 2_400_200_000, &[-80.0, -70.0]);
        agg.clear();
        assert!(agg.is_empty());
        assert!(agg.is_initialized());
        assert_eq!(agg.bin_width_hz(), Some(50_000.0));
        assert_eq!(agg.num_datapoints(), 2000);
    }
}
