use std::fmt;
use std::str::FromStr;

use crate::device::MAX_SWEEP_RANGES;
use crate::error::ValidationError;

pub const FREQ_MIN_MHZ: u16 = 1;
pub const FREQ_MAX_MHZ: u16 = 6000;

const HZ_PER_MHZ: u64 = 1_000_000;

/// One sweep sub-range in MHz, `start_mhz..end_mhz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanRange {
    pub start_mhz: u16,
    pub end_mhz: u16,
}

impl ScanRange {
    pub const fn new(start_mhz: u16, end_mhz: u16) -> Self {
        Self { start_mhz, end_mhz }
    }

    pub fn start_hz(&self) -> u64 {
        u64::from(self.start_mhz) * HZ_PER_MHZ
    }

    pub fn end_hz(&self) -> u64 {
        u64::from(self.end_mhz) * HZ_PER_MHZ
    }

    pub fn span_mhz(&self) -> u16 {
        self.end_mhz.saturating_sub(self.start_mhz)
    }

    /// Number of whole `bin_width_hz` bins that fit in the range.
    pub fn bins(&self, bin_width_hz: f64) -> usize {
        if bin_width_hz <= 0.0 {
            return 0;
        }
        // nudge exact multiples that the division lands just under
        (f64::from(self.span_mhz()) * 1e6 / bin_width_hz + 1e-6) as usize
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.start_mhz >= self.end_mhz {
            return Err(ValidationError::InvertedRange {
                start: self.start_mhz,
                end: self.end_mhz,
            });
        }
        if self.start_mhz < FREQ_MIN_MHZ || self.end_mhz > FREQ_MAX_MHZ {
            return Err(ValidationError::RangeOutOfBounds {
                start: self.start_mhz,
                end: self.end_mhz,
                min: FREQ_MIN_MHZ,
                max: FREQ_MAX_MHZ,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} MHz", self.start_mhz, self.end_mhz)
    }
}

// same syntax as hackrf_sweep's -f option
impl FromStr for ScanRange {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let syntax = || ValidationError::RangeSyntax(s.to_string());
        let (start, end) = s.split_once(':').ok_or_else(syntax)?;
        let start_mhz = start.trim().parse().map_err(|_| syntax())?;
        let end_mhz = end.trim().parse().map_err(|_| syntax())?;
        Ok(Self { start_mhz, end_mhz })
    }
}

/// Ordered, non-empty, in-bounds list of sweep sub-ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRangeSet {
    ranges: Vec<ScanRange>,
}

impl ScanRangeSet {
    pub fn new(ranges: Vec<ScanRange>) -> Result<Self, ValidationError> {
        Self::validate(&ranges)?;
        Ok(Self { ranges })
    }

    pub fn single(start_mhz: u16, end_mhz: u16) -> Result<Self, ValidationError> {
        Self::new(vec![ScanRange::new(start_mhz, end_mhz)])
    }

    /// Rebuilds a set from the flat `[start0, end0, start1, end1, ..]` list the
    /// sweeper echoes back with every transfer.
    pub fn from_endpoints(endpoints: &[u16]) -> Result<Self, ValidationError> {
        if endpoints.len() % 2 != 0 {
            return Err(ValidationError::OddEndpointCount(endpoints.len()));
        }
        let ranges = endpoints
            .chunks_exact(2)
            .map(|pair| ScanRange::new(pair[0], pair[1]))
            .collect();
        Self::new(ranges)
    }

    pub fn validate(ranges: &[ScanRange]) -> Result<(), ValidationError> {
        if ranges.is_empty() {
            return Err(ValidationError::EmptyRanges);
        }
        if ranges.len() > MAX_SWEEP_RANGES {
            return Err(ValidationError::TooManyRanges(ranges.len(), MAX_SWEEP_RANGES));
        }
        ranges.iter().try_for_each(ScanRange::validate)
    }

    pub fn first(&self) -> ScanRange {
        // non-empty by construction
        self.ranges[0]
    }

    pub fn last(&self) -> ScanRange {
        self.ranges[self.ranges.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScanRange> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn as_slice(&self) -> &[ScanRange] {
        &self.ranges
    }

    pub fn endpoints(&self) -> Vec<u16> {
        self.ranges
            .iter()
            .flat_map(|r| [r.start_mhz, r.end_mhz])
            .collect()
    }

    pub fn total_span_mhz(&self) -> u32 {
        self.ranges.iter().map(|r| u32::from(r.span_mhz())).sum()
    }
}

impl Default for ScanRangeSet {
    fn default() -> Self {
        Self {
            ranges: vec![ScanRange::new(2400, 2500)],
        }
    }
}

impl fmt::Display for ScanRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

/// Parses `start:end` ranges separated by whitespace or commas, the form
/// the TUI's range editor accepts.
impl FromStr for ScanRangeSet {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ranges = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<ScanRange>, _>>()?;
        Self::new(ranges)
    }
}
