//! Fixed-Point Sample Types
//!
//! Defines the complex fixed-point representations used by the receive path.
//! A Qn value stores a real number in [-1, 1) with n fractional bits.

use num_complex::{Complex, Complex32};
use num_derive::FromPrimitive;
use num_traits::{FromPrimitive as _, PrimInt, Signed};
use serde::{Deserialize, Serialize};

/// Complex sample with Q31 components (wide variant)
pub type Cq31 = Complex<i32>;

/// Complex sample with Q15 components (narrow variant)
pub type Cq15 = Complex<i16>;

/// Signed integer types usable as a fixed-point component
pub trait FixedPoint: PrimInt + Signed + Default + Send + Sync + std::fmt::Debug + 'static {
    /// Number of fractional bits
    const FRAC_BITS: u32;
    /// Value representing +1.0 (minus one LSB)
    const FULL_SCALE: f64;
    /// Short format name used in logs
    const NAME: &'static str;

    /// Scale a real value by full scale and round to nearest, saturating
    fn quantize(value: f64) -> Self;

    /// Real value represented by this component
    fn to_f64(self) -> f64;
}

impl FixedPoint for i32 {
    const FRAC_BITS: u32 = 31;
    const FULL_SCALE: f64 = 2147483647.0;
    const NAME: &'static str = "Q31";

    fn quantize(value: f64) -> Self {
        // `as` saturates on overflow and maps NaN to zero
        (value * Self::FULL_SCALE).round() as i32
    }

    fn to_f64(self) -> f64 {
        self as f64 / Self::FULL_SCALE
    }
}

impl FixedPoint for i16 {
    const FRAC_BITS: u32 = 15;
    const FULL_SCALE: f64 = 32767.0;
    const NAME: &'static str = "Q15";

    fn quantize(value: f64) -> Self {
        (value * Self::FULL_SCALE).round() as i16
    }

    fn to_f64(self) -> f64 {
        self as f64 / Self::FULL_SCALE
    }
}

/// Convert a floating-point sample to Q31
pub fn cq31_from_cf(x: Complex32) -> Cq31 {
    Cq31::new(i32::quantize(x.re as f64), i32::quantize(x.im as f64))
}

/// Convert a Q31 sample to floating point
pub fn cq31_to_cf(x: Cq31) -> Complex32 {
    Complex32::new(x.re.to_f64() as f32, x.im.to_f64() as f32)
}

/// Convert a floating-point sample to Q15
pub fn cq15_from_cf(x: Complex32) -> Cq15 {
    Cq15::new(i16::quantize(x.re as f64), i16::quantize(x.im as f64))
}

/// Convert a Q15 sample to floating point
pub fn cq15_to_cf(x: Cq15) -> Complex32 {
    Complex32::new(x.re.to_f64() as f32, x.im.to_f64() as f32)
}

/// Promote a Q15 sample to Q31 by moving it into the high-order bits.
///
/// Both values represent the same real number; the low 16 bits are zero.
pub fn widen_cq15(x: Cq15) -> Cq31 {
    Cq31::new((x.re as i32) << 16, (x.im as i32) << 16)
}

/// Taps per polyphase branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
pub enum TapsPerPhase {
    /// Reduced-latency build
    Reduced = 8,
    /// Default build
    Full = 16,
}

impl TapsPerPhase {
    /// Look up a tap count
    pub fn from_count(count: usize) -> Option<Self> {
        Self::from_usize(count)
    }

    /// Number of taps
    pub fn count(&self) -> usize {
        *self as usize
    }
}

/// Taps per branch selected for this build
pub const fn taps_per_phase() -> TapsPerPhase {
    if cfg!(feature = "fast-math") {
        TapsPerPhase::Reduced
    } else {
        TapsPerPhase::Full
    }
}
