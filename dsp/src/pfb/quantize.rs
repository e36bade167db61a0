//! Coefficient Quantization
//!
//! Converts a real-valued, phase-interleaved prototype into a fixed-point,
//! phase-major coefficient table laid out for contiguous convolution.

use crate::{DspError, Result};
use common::types::{taps_per_phase, FixedPoint, TapsPerPhase};
use tracing::debug;

/// Quantized polyphase coefficients.
///
/// Phase `i` occupies `2 * sub_len` consecutive entries. Taps are stored
/// time-reversed, and each tap is written twice (once for the real lane,
/// once for the imaginary lane) so that a forward scan over the sample window
/// multiplies directly against this memory.
#[derive(Debug, Clone)]
pub struct CoefficientTable<T> {
    num_phases: usize,
    sub_len: usize,
    taps: Vec<T>,
}

impl<T: FixedPoint> CoefficientTable<T> {
    /// Quantize `prototype` (length `num_phases * sub_len`) into `num_phases` branches
    pub fn quantize(num_phases: usize, prototype: &[f32]) -> Result<Self> {
        if num_phases == 0 {
            return Err(DspError::InvalidParameter("phase count must be at least 1".to_string()));
        }

        let total = prototype.len();
        let sub_len = total / num_phases;
        if sub_len == 0 || sub_len * num_phases != total {
            return Err(DspError::TapCountMismatch { total, num_phases });
        }

        let expected = taps_per_phase();
        if TapsPerPhase::from_count(sub_len) != Some(expected) {
            return Err(DspError::TapsPerPhaseMismatch { actual: sub_len, expected: expected.count() });
        }

        let mut taps = Vec::with_capacity(2 * total);
        for i in 0..num_phases {
            for j in 0..sub_len {
                let tap = T::quantize(prototype[(sub_len - 1 - j) * num_phases + i] as f64);
                taps.push(tap);
                taps.push(tap);
            }
        }

        debug!(
            "Quantized {} taps into {} x {} {} coefficient table",
            total, num_phases, sub_len, T::NAME
        );

        Ok(Self { num_phases, sub_len, taps })
    }

    /// Duplicated, time-reversed coefficients of one branch
    pub fn phase(&self, index: usize) -> &[T] {
        let stride = 2 * self.sub_len;
        &self.taps[index * stride..(index + 1) * stride]
    }

    /// Number of branches
    pub fn num_phases(&self) -> usize {
        self.num_phases
    }

    /// Taps per branch
    pub fn sub_len(&self) -> usize {
        self.sub_len
    }
}
