/*
2024-05-31, 16:05:22.927896, 2400000000, 2405000000, 49504.95, 101, -14.27, -26.26, ...
2024-05-31, 16:05:22.927896, 2410000000, 2415000000, 49504.95, 101, -60.02, -62.46, ...
2024-05-31, 16:05:22.927896, 2405000000, 2410000000, 49504.95, 101, -76.03, -66.01, ...
 */

// Date, Time, Hz Low, Hz High, Hz bin width, Num Samples, dB, dB, dB, dB, dB, [...], dB

use std::str::FromStr;

use crate::error::DeviceError;

/// A single line of `hackrf_sweep` text output.
///
/// `hackrf_sweep` prints two lines per transfer: the lower quarter band
/// first, then the upper one starting half a sample rate higher.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepLine {
    pub date: String,
    pub time: String,
    pub hz_low: u64,
    pub hz_high: u64,
    pub hz_bin_width: f64,
    pub db: Vec<f32>,
}

impl SweepLine {
    pub fn from_line(line: &str) -> Result<Self, DeviceError> {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 7 {
            return Err(DeviceError::Parse(format!(
                "expected at least 7 fields, got {}",
                parts.len()
            )));
        }

        let date = field(&parts, 0, "date")?.to_string();
        let time = field(&parts, 1, "time")?.to_string();
        let hz_low: u64 = parse_field(&parts, 2, "hz_low")?;
        let hz_high: u64 = parse_field(&parts, 3, "hz_high")?;
        let hz_bin_width: f64 = parse_field(&parts, 4, "hz_bin_width")?;
        let num_samples: usize = parse_field(&parts, 5, "num_samples")?;

        let db = parts[6..]
            .iter()
            .map(|x| {
                x.parse::<f32>()
                    .map_err(|_| DeviceError::Parse(format!("bad dB value '{x}'")))
            })
            .collect::<Result<Vec<f32>, _>>()?;

        if db.len() != num_samples {
            return Err(DeviceError::Parse(format!(
                "{num_samples} samples announced, {} present",
                db.len()
            )));
        }
        if hz_low >= hz_high {
            return Err(DeviceError::Parse(format!("inverted band {hz_low}-{hz_high}")));
        }

        Ok(Self {
            date,
            time,
            hz_low,
            hz_high,
            hz_bin_width,
            db,
        })
    }

    pub fn span_hz(&self) -> u64 {
        self.hz_high - self.hz_low
    }

    /// True when `upper` is the second half of the transfer this line opened.
    pub fn pairs_with(&self, upper: &SweepLine) -> bool {
        upper.hz_low == self.hz_low + 2 * self.span_hz() && upper.db.len() == self.db.len()
    }
}

fn field<'a>(parts: &[&'a str], index: usize, name: &str) -> Result<&'a str, DeviceError> {
    match parts.get(index) {
        Some(&value) if !value.is_empty() => Ok(value),
        _ => Err(DeviceError::Parse(format!("missing {name}"))),
    }
}

fn parse_field<T: FromStr>(parts: &[&str], index: usize, name: &str) -> Result<T, DeviceError> {
    let value = field(parts, index, name)?;
    value
        .parse()
        .map_err(|_| DeviceError::Parse(format!("bad {name} '{value}'")))
}
