//! Fixed-depth rolling history of completed spectra (the waterfall).

use std::collections::BTreeMap;

use crate::range::ScanRangeSet;

/// What happens to the columns a new row does not cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowFill {
    /// Keep whatever the overwritten row held.
    #[default]
    CarryForward,
    /// Reset to the buffer's init value before writing.
    ResetToInit,
}

/// Columns owned by one scan range.
#[derive(Debug, Clone, PartialEq)]
struct Segment {
    start_hz: u64,
    end_hz: u64,
    first_col: usize,
    cols: usize,
}

/// Circular `depth × cols` raster. Storage is allocated once and rows are
/// overwritten in place, oldest first.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    data: Vec<f32>,
    depth: usize,
    cols: usize,
    bin_width_hz: f64,
    init_value: f32,
    fill: RowFill,
    // empty: columns are measured from the row's lowest frequency
    segments: Vec<Segment>,
    // index of the row the next add_row writes
    cursor: usize,
    rows_written: u64,
}

impl HistoryBuffer {
    pub fn new(depth: usize, cols: usize, bin_width_hz: f64, init_value: f32) -> Self {
        Self::with_fill(depth, cols, bin_width_hz, init_value, RowFill::default())
    }

    pub fn with_fill(
        depth: usize,
        cols: usize,
        bin_width_hz: f64,
        init_value: f32,
        fill: RowFill,
    ) -> Self {
        Self {
            data: vec![init_value; depth * cols],
            depth,
            cols,
            bin_width_hz,
            init_value,
            fill,
            segments: Vec::new(),
            cursor: 0,
            rows_written: 0,
        }
    }

    /// A buffer with one block of columns per scan range, laid side by side
    /// in range order, so gaps between ranges take no columns.
    pub fn for_ranges(
        depth: usize,
        ranges: &ScanRangeSet,
        bin_width_hz: f64,
        init_value: f32,
        fill: RowFill,
    ) -> Self {
        let mut first_col = 0;
        let segments: Vec<Segment> = ranges
            .iter()
            .map(|range| {
                let cols = range.bins(bin_width_hz);
                let segment = Segment {
                    start_hz: range.start_hz(),
                    end_hz: range.end_hz(),
                    first_col,
                    cols,
                };
                first_col += cols;
                segment
            })
            .collect();
        Self {
            segments,
            ..Self::with_fill(depth, first_col, bin_width_hz, init_value, fill)
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn bin_width_hz(&self) -> f64 {
        self.bin_width_hz
    }

    pub fn fill(&self) -> RowFill {
        self.fill
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Writes one spectrum over the oldest row.
    ///
    /// Each entry lands in column `floor((f - origin) / bin_width)`, counted
    /// from the start of its range's block. Without ranges the origin is the
    /// lowest frequency of the row. Entries that fall outside every block, or
    /// past its last column, are dropped rather than clipped to the edge so a
    /// stray bin never overwrites a neighbour.
    pub fn add_row(&mut self, spectrum: &BTreeMap<u64, f32>) {
        if self.depth == 0 {
            return;
        }
        let start = self.cursor * self.cols;
        let row = &mut self.data[start..start + self.cols];
        if self.fill == RowFill::ResetToInit {
            row.fill(self.init_value);
        }

        if self.bin_width_hz > 0.0 {
            if self.segments.is_empty() {
                if let Some(&first) = spectrum.keys().next() {
                    let whole = Segment {
                        start_hz: first,
                        end_hz: u64::MAX,
                        first_col: 0,
                        cols: self.cols,
                    };
                    write_segment(row, &whole, spectrum, self.bin_width_hz);
                }
            } else {
                for segment in &self.segments {
                    write_segment(row, segment, spectrum, self.bin_width_hz);
                }
            }
        }

        self.cursor = (self.cursor + 1) % self.depth;
        self.rows_written += 1;
    }

    fn row_index(&self, age: usize) -> usize {
        (self.cursor + self.depth - 1 - age) % self.depth
    }

    /// Cell `col` of the row written `age` rows ago (0 is the newest).
    ///
    /// Anything out of range reads as 0.0.
    pub fn value_at(&self, col: i64, age: i64) -> f32 {
        let (Ok(col), Ok(age)) = (usize::try_from(col), usize::try_from(age)) else {
            return 0.0;
        };
        if col >= self.cols || age >= self.depth {
            return 0.0;
        }
        self.data[self.row_index(age) * self.cols + col]
    }

    pub fn row(&self, age: usize) -> Option<&[f32]> {
        if age >= self.depth {
            return None;
        }
        let start = self.row_index(age) * self.cols;
        Some(&self.data[start..start + self.cols])
    }
}

fn write_segment(
    row: &mut [f32],
    segment: &Segment,
    spectrum: &BTreeMap<u64, f32>,
    bin_width_hz: f64,
) {
    for (&freq, &db) in spectrum.range(segment.start_hz..segment.end_hz) {
        // keys were truncated to whole Hz, so allow up to one hertz short of the edge
        let col = (((freq - segment.start_hz) as f64 + 1.0) / bin_width_hz).floor() as usize;
        if col < segment.cols {
            if let Some(cell) = row.get_mut(segment.first_col + col) {
                *cell = db;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[(u64, f32)]) -> BTreeMap<u64, f32> {
        values.iter().copied().collect()
    }

    #[test]
    fn newest_row_is_age_zero_and_wraps() {
        let mut history = HistoryBuffer::new(3, 2, 100.0, -90.0);
        for r in 0..4 {
            let base = r as f32 * 10.0;
            history.add_row(&row(&[(1000, base), (1100, base + 1.0)]));
        }

        for col in 0..2 {
            assert_eq!(history.value_at(col, 0), 30.0 + col as f32);
            assert_eq!(history.value_at(col, 1), 20.0 + col as f32);
            assert_eq!(history.value_at(col, 2), 10.0 + col as f32);
        }
        assert_eq!(history.rows_written(), 4);
        assert_eq!(history.row(0), Some(&[30.0, 31.0][..]));
    }

    #[test]
    fn out_of_range_reads_sentinel() {
        let mut history = HistoryBuffer::new(3, 2, 100.0, -90.0);
        history.add_row(&row(&[(1000, -50.0), (1100, -40.0)]));

        assert_eq!(history.value_at(-1, 0), 0.0);
        assert_eq!(history.value_at(2, 0), 0.0);
        assert_eq!(history.value_at(0, -1), 0.0);
        assert_eq!(history.value_at(0, 3), 0.0);
        assert_eq!(history.row(3), None);
    }

    #[test]
    fn starts_filled_with_init_value() {
        let history = HistoryBuffer::new(4, 3, 100.0, -90.0);
        for age in 0..4 {
            for col in 0..3 {
                assert_eq!(history.value_at(col, age), -90.0);
            }
        }
    }

    #[test]
    fn sparse_row_carries_forward() {
        let mut history = HistoryBuffer::new(1, 3, 100.0, -90.0);
        history.add_row(&row(&[(1000, -10.0), (1100, -20.0), (1200, -30.0)]));
        history.add_row(&row(&[(1000, -40.0)]));

        assert_eq!(history.row(0), Some(&[-40.0, -20.0, -30.0][..]));
    }

    #[test]
    fn sparse_row_resets_when_asked() {
        let mut history = HistoryBuffer::with_fill(1, 3, 100.0, -90.0, RowFill::ResetToInit);
        history.add_row(&row(&[(1000, -10.0), (1100, -20.0), (1200, -30.0)]));
        history.add_row(&row(&[(1000, -40.0)]));

        assert_eq!(history.row(0), Some(&[-40.0, -90.0, -90.0][..]));
    }

    #[test]
    fn columns_follow_frequency_and_clip() {
        let mut history = HistoryBuffer::new(2, 3, 100.0, -90.0);
        history.add_row(&row(&[(1000, -1.0), (1250, -2.0), (1500, -3.0)]));

        assert_eq!(history.row(0), Some(&[-1.0, -90.0, -2.0][..]));
    }

    #[test]
    fn truncated_keys_land_in_their_bin() {
        // bins of 33.33 Hz, keys truncated from 1033.33 and 1066.67
        let mut history = HistoryBuffer::new(1, 3, 100.0 / 3.0, -90.0);
        history.add_row(&row(&[(1000, -1.0), (1033, -2.0), (1066, -3.0)]));

        assert_eq!(history.row(0), Some(&[-1.0, -2.0, -3.0][..]));
    }

    #[test]
    fn empty_row_still_advances() {
        let mut history = HistoryBuffer::new(2, 1, 100.0, -90.0);
        history.add_row(&row(&[(1000, -1.0)]));
        history.add_row(&BTreeMap::new());
        assert_eq!(history.value_at(0, 1), -1.0);
        assert_eq!(history.value_at(0, 0), -90.0);
    }

    #[test]
    fn ranges_get_adjacent_column_blocks() {
        let ranges = ScanRangeSet::from_endpoints(&[100, 101, 2400, 2402]).unwrap();
        let mut history =
            HistoryBuffer::for_ranges(2, &ranges, 500_000.0, -90.0, RowFill::default());
        assert_eq!(history.cols(), 6);

        let spectrum = row(&[
            (100_000_000, -1.0),
            (100_500_000, -2.0),
            (2_400_000_000, -3.0),
            (2_400_500_000, -4.0),
            (2_401_000_000, -5.0),
            (2_401_500_000, -6.0),
            // outside every range
            (2_402_000_000, -7.0),
        ]);
        history.add_row(&spectrum);
        assert_eq!(history.row(0), Some(&[-1.0, -2.0, -3.0, -4.0, -5.0, -6.0][..]));
    }
}
