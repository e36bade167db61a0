//! Fixed-Point Arithmetic
//!
//! Scalar forms of the saturating rounding multiply and saturating
//! accumulate used by the convolution kernels. These define the
//! numerical contract the vectorized kernels approximate.

use crate::types::{Cq15, Cq31};

/// Saturating rounding doubling multiply returning the high half (Q31 x Q31 -> Q31).
///
/// Matches `vqrdmulhq_s32`: `sat((2ab + 2^31) >> 32)`.
#[inline]
pub fn qrdmulh_i32(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }
    let product = 2 * (a as i64) * (b as i64) + (1i64 << 31);
    (product >> 32) as i32
}

/// Saturating rounding doubling multiply returning the high half (Q15 x Q15 -> Q15).
#[inline]
pub fn qrdmulh_i16(a: i16, b: i16) -> i16 {
    if a == i16::MIN && b == i16::MIN {
        return i16::MAX;
    }
    let product = 2 * (a as i32) * (b as i32) + (1i32 << 15);
    (product >> 16) as i16
}

/// Component-wise saturating add of Q31 samples
#[inline]
pub fn cq31_sat_add(a: Cq31, b: Cq31) -> Cq31 {
    Cq31::new(a.re.saturating_add(b.re), a.im.saturating_add(b.im))
}

/// Component-wise saturating add of Q15 samples
#[inline]
pub fn cq15_sat_add(a: Cq15, b: Cq15) -> Cq15 {
    Cq15::new(a.re.saturating_add(b.re), a.im.saturating_add(b.im))
}

/// Largest per-component distance between two Q31 samples, in LSBs
pub fn cq31_lsb_distance(a: Cq31, b: Cq31) -> u64 {
    let dr = (a.re as i64 - b.re as i64).unsigned_abs();
    let di = (a.im as i64 - b.im as i64).unsigned_abs();
    dr.max(di)
}

/// Largest per-component distance between two Q15 samples, in LSBs
pub fn cq15_lsb_distance(a: Cq15, b: Cq15) -> u64 {
    let dr = (a.re as i32 - b.re as i32).unsigned_abs() as u64;
    let di = (a.im as i32 - b.im as i32).unsigned_abs() as u64;
    dr.max(di)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qrdmulh_i32() {
        let half = 1 << 30;
        // 0.5 * 0.5 = 0.25
        assert_eq!(qrdmulh_i32(half, half), 1 << 29);
        // -0.5 * 0.5 = -0.25
        assert_eq!(qrdmulh_i32(-half, half), -(1 << 29));
        assert_eq!(qrdmulh_i32(i32::MIN, i32::MIN), i32::MAX);
        assert_eq!(qrdmulh_i32(i32::MAX, 0), 0);
        // Multiplying by full scale is the identity to within one LSB
        let x = 123_456_789;
        assert!((qrdmulh_i32(x, i32::MAX) - x).abs() <= 1);
    }

    #[test]
    fn test_qrdmulh_i16() {
        assert_eq!(qrdmulh_i16(16384, 16384), 8192);
        assert_eq!(qrdmulh_i16(-16384, 16384), -8192);
        assert_eq!(qrdmulh_i16(i16::MIN, i16::MIN), i16::MAX);
        assert!((qrdmulh_i16(1000, i16::MAX) - 1000).abs() <= 1);
    }

    #[test]
    fn test_saturating_accumulate() {
        let a = Cq31::new(i32::MAX - 5, i32::MIN + 5);
        let b = Cq31::new(100, -100);
        assert_eq!(cq31_sat_add(a, b), Cq31::new(i32::MAX, i32::MIN));

        let c = Cq15::new(32000, -32000);
        let d = Cq15::new(1000, -1000);
        assert_eq!(cq15_sat_add(c, d), Cq15::new(i16::MAX, i16::MIN));
    }

    #[test]
    fn test_lsb_distance() {
        assert_eq!(cq31_lsb_distance(Cq31::new(i32::MAX, 0), Cq31::new(i32::MIN, 0)), u32::MAX as u64);
        assert_eq!(cq15_lsb_distance(Cq15::new(3, -4), Cq15::new(1, 0)), 4);
    }
}
