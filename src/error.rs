use thiserror::Error;

/// Rejected configuration values. Raised before anything reaches the hardware.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid VGA gain {0} dB (0-62 dB, 2 dB steps)")]
    VgaGain(i32),

    #[error("invalid LNA gain {0} dB (0-40 dB, 8 dB steps)")]
    LnaGain(i32),

    #[error("at least one scan range is required")]
    EmptyRanges,

    #[error("scan range {start}-{end} MHz is inverted or empty")]
    InvertedRange { start: u16, end: u16 },

    #[error("scan range {start}-{end} MHz is outside {min}-{max} MHz")]
    RangeOutOfBounds {
        start: u16,
        end: u16,
        min: u16,
        max: u16,
    },

    #[error("{0} scan ranges requested, the sweeper supports at most {1}")]
    TooManyRanges(usize, usize),

    #[error("range endpoint list has odd length {0}")]
    OddEndpointCount(usize),

    #[error("cannot parse scan range '{0}', expected start:end in MHz")]
    RangeSyntax(String),
}

/// Failures reported by a sweep driver.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("sweep device not found: {0}")]
    NotFound(String),

    #[error("{op} failed: {reason}")]
    Hardware { op: &'static str, reason: String },

    #[error("malformed sweep output: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    pub fn hardware(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Hardware {
            op,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub type DeviceResult<T> = Result<T, DeviceError>;
