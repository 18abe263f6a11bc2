use std::fmt;

use crate::error::ValidationError;

pub const VGA_MIN: i32 = 0;
pub const VGA_MAX: i32 = 62;
pub const VGA_STEP: i32 = 2;
pub const LNA_MIN: i32 = 0;
pub const LNA_MAX: i32 = 40;
pub const LNA_STEP: i32 = 8;
/// Fixed gain of the RF front-end amplifier when enabled.
pub const AMP_GAIN_DB: i32 = 14;

/// Receiver front-end gain: RF amp, LNA (IF) and VGA (baseband).
///
/// Values are only ever built through the validating constructors, so a
/// `GainState` in hand always satisfies the hardware's step and range rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GainState {
    amp_enable: bool,
    lna_gain: i32,
    vga_gain: i32,
}

impl GainState {
    pub fn new(amp_enable: bool, lna_gain: i32, vga_gain: i32) -> Result<Self, ValidationError> {
        validate_lna(lna_gain)?;
        validate_vga(vga_gain)?;
        Ok(Self {
            amp_enable,
            lna_gain,
            vga_gain,
        })
    }

    pub fn amp_enable(&self) -> bool {
        self.amp_enable
    }

    pub fn lna_gain(&self) -> i32 {
        self.lna_gain
    }

    pub fn vga_gain(&self) -> i32 {
        self.vga_gain
    }

    pub fn total_gain(&self) -> i32 {
        self.lna_gain + self.vga_gain + if self.amp_enable { AMP_GAIN_DB } else { 0 }
    }

    pub fn is_valid(&self) -> bool {
        validate_lna(self.lna_gain).is_ok() && validate_vga(self.vga_gain).is_ok()
    }

    pub fn with_amp_enable(self, amp_enable: bool) -> Self {
        Self { amp_enable, ..self }
    }

    pub fn with_vga_gain(self, vga_gain: i32) -> Result<Self, ValidationError> {
        validate_vga(vga_gain)?;
        Ok(Self { vga_gain, ..self })
    }

    pub fn with_lna_gain(self, lna_gain: i32) -> Result<Self, ValidationError> {
        validate_lna(lna_gain)?;
        Ok(Self { lna_gain, ..self })
    }
}

impl Default for GainState {
    fn default() -> Self {
        Self {
            amp_enable: false,
            lna_gain: 32,
            vga_gain: 14,
        }
    }
}

impl fmt::Display for GainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IF {} dB, BB {} dB, RF AMP {} (total {} dB)",
            self.lna_gain,
            self.vga_gain,
            if self.amp_enable { "ON" } else { "OFF" },
            self.total_gain()
        )
    }
}

fn validate_vga(gain: i32) -> Result<(), ValidationError> {
    if (VGA_MIN..=VGA_MAX).contains(&gain) && gain % VGA_STEP == 0 {
        Ok(())
    } else {
        Err(ValidationError::VgaGain(gain))
    }
}

fn validate_lna(gain: i32) -> Result<(), ValidationError> {
    if (LNA_MIN..=LNA_MAX).contains(&gain) && gain % LNA_STEP == 0 {
        Ok(())
    } else {
        Err(ValidationError::LnaGain(gain))
    }
}
