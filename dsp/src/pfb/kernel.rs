//! Fixed-Point Convolution Kernels
//!
//! One numerical contract, three implementations:
//! - NEON: saturating rounding doubling multiply (`vqrdmulh`) with saturating adds
//! - SSE2: floating-point lanes with pre/post scaling, clamped before conversion
//! - Scalar: portable reference
//!
//! Each kernel multiplies `n` window samples against the duplicated
//! coefficients of one branch and accumulates per component. Results agree
//! with the integer rounding model to within a few LSB, not bit for bit; the
//! two floating-point kernels agree with each other to within one LSB.
//! The kernel is picked once per filterbank from the capabilities detected
//! on the host.

use bitflags::bitflags;
use common::types::{Cq15, Cq31, FixedPoint};
use common::utils::{cq15_sat_add, cq31_sat_add, qrdmulh_i16};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::debug;

bitflags! {
    /// SIMD instruction sets usable on this host
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SimdCaps: u32 {
        const NEON = 1 << 0;
        const SSE2 = 1 << 1;
        const SSSE3 = 1 << 2;
    }
}

impl SimdCaps {
    /// Detect CPU features. SIMD paths are only reported when the `simd` feature is on.
    pub fn detect() -> Self {
        #[allow(unused_mut)]
        let mut caps = SimdCaps::empty();

        #[cfg(all(feature = "simd", target_arch = "aarch64"))]
        {
            if std::arch::is_aarch64_feature_detected!("neon") {
                caps |= SimdCaps::NEON;
            }
        }

        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        {
            if is_x86_feature_detected!("sse2") {
                caps |= SimdCaps::SSE2;
            }
            if is_x86_feature_detected!("ssse3") {
                caps |= SimdCaps::SSSE3;
            }
        }

        caps
    }

    /// Capabilities of this host, detected once
    pub fn host() -> Self {
        static HOST_CAPS: OnceLock<SimdCaps> = OnceLock::new();
        *HOST_CAPS.get_or_init(|| {
            let caps = SimdCaps::detect();
            debug!("Detected SIMD capabilities: {:?}", caps);
            caps
        })
    }
}

/// Convolution kernel implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    /// Integer saturating rounding multiply (aarch64)
    Neon,
    /// SIMD on x86_64: scaled float lanes for Q31, `pmulhrsw` for Q15
    Sse2,
    /// Portable fallback
    Scalar,
}

impl Kernel {
    /// All kernels in order of preference
    pub const ALL: [Kernel; 3] = [Kernel::Neon, Kernel::Sse2, Kernel::Scalar];

    /// Fastest kernel usable for precision `T` on this host
    pub fn best_for<T: DotProduct>() -> Kernel {
        let caps = SimdCaps::host();
        Self::ALL
            .into_iter()
            .find(|k| T::supports(*k, caps))
            .unwrap_or(Kernel::Scalar)
    }

    /// Every kernel usable for precision `T` on this host
    pub fn available_for<T: DotProduct>() -> Vec<Kernel> {
        let caps = SimdCaps::host();
        Self::ALL.into_iter().filter(|k| T::supports(*k, caps)).collect()
    }

    /// Kernel name
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Neon => "neon",
            Kernel::Sse2 => "sse2",
            Kernel::Scalar => "scalar",
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kernel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "neon" => Ok(Kernel::Neon),
            "sse2" | "sse" => Ok(Kernel::Sse2),
            "scalar" => Ok(Kernel::Scalar),
            other => Err(format!("unknown kernel '{}'", other)),
        }
    }
}

/// Fixed-point formats with a convolution kernel family
pub trait DotProduct: FixedPoint {
    /// Whether `kernel` can run for this format given `caps`
    fn supports(kernel: Kernel, caps: SimdCaps) -> bool;

    /// Dot product of `x` (n samples) against `h` (2n duplicated coefficients).
    ///
    /// # Safety
    /// `kernel` must satisfy `supports(kernel, SimdCaps::host())`.
    unsafe fn dotprod(kernel: Kernel, x: &[Complex<Self>], h: &[Self]) -> Complex<Self>;
}

impl DotProduct for i32 {
    fn supports(kernel: Kernel, caps: SimdCaps) -> bool {
        match kernel {
            Kernel::Neon => caps.contains(SimdCaps::NEON),
            Kernel::Sse2 => caps.contains(SimdCaps::SSE2),
            Kernel::Scalar => true,
        }
    }

    #[inline]
    unsafe fn dotprod(kernel: Kernel, x: &[Cq31], h: &[i32]) -> Cq31 {
        debug_assert_eq!(h.len(), 2 * x.len());
        match kernel {
            #[cfg(all(feature = "simd", target_arch = "aarch64"))]
            Kernel::Neon => unsafe { neon::dotprod_q31(x, h) },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            Kernel::Sse2 => unsafe { sse::dotprod_q31(x, h) },
            _ => dotprod_q31_scalar(x, h),
        }
    }
}

impl DotProduct for i16 {
    fn supports(kernel: Kernel, caps: SimdCaps) -> bool {
        match kernel {
            Kernel::Neon => caps.contains(SimdCaps::NEON),
            Kernel::Sse2 => caps.contains(SimdCaps::SSE2 | SimdCaps::SSSE3),
            Kernel::Scalar => true,
        }
    }

    #[inline]
    unsafe fn dotprod(kernel: Kernel, x: &[Cq15], h: &[i16]) -> Cq15 {
        debug_assert_eq!(h.len(), 2 * x.len());
        match kernel {
            #[cfg(all(feature = "simd", target_arch = "aarch64"))]
            Kernel::Neon => unsafe { neon::dotprod_q15(x, h) },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            Kernel::Sse2 => unsafe { sse::dotprod_q15(x, h) },
            _ => dotprod_q15_scalar(x, h),
        }
    }
}

/// Portable Q31 kernel: accumulate raw products in double precision, scale by 2^-31 once
pub fn dotprod_q31_scalar(x: &[Cq31], h: &[i32]) -> Cq31 {
    const Q31_ONE: f64 = 2147483648.0;

    let mut re = 0.0f64;
    let mut im = 0.0f64;
    for (s, c) in x.iter().zip(h.chunks_exact(2)) {
        re += s.re as f64 * c[0] as f64;
        im += s.im as f64 * c[1] as f64;
    }
    // `as` saturates out-of-range sums
    Cq31::new((re / Q31_ONE).round() as i32, (im / Q31_ONE).round() as i32)
}

/// Portable Q15 kernel: rounding multiply per tap, saturating accumulate
pub fn dotprod_q15_scalar(x: &[Cq15], h: &[i16]) -> Cq15 {
    x.iter()
        .zip(h.chunks_exact(2))
        .fold(Cq15::new(0, 0), |acc, (s, c)| {
            cq15_sat_add(acc, Cq15::new(qrdmulh_i16(s.re, c[0]), qrdmulh_i16(s.im, c[1])))
        })
}

/// Sum of the two complex values packed in four Q31 lanes
#[allow(dead_code)]
fn fold_q31_lanes(lanes: [i32; 4]) -> Cq31 {
    cq31_sat_add(Cq31::new(lanes[0], lanes[1]), Cq31::new(lanes[2], lanes[3]))
}

/// Sum of the four complex values packed in eight Q15 lanes
#[allow(dead_code)]
fn fold_q15_lanes(lanes: [i16; 8]) -> Cq15 {
    lanes
        .chunks_exact(2)
        .fold(Cq15::new(0, 0), |acc, pair| cq15_sat_add(acc, Cq15::new(pair[0], pair[1])))
}

#[cfg(all(feature = "simd", target_arch = "aarch64"))]
mod neon {
    use super::{dotprod_q15_scalar, fold_q15_lanes, fold_q31_lanes};
    use common::types::{Cq15, Cq31};
    use common::utils::{cq15_sat_add, cq31_sat_add, qrdmulh_i32};
    use std::arch::aarch64::*;

    #[target_feature(enable = "neon")]
    pub(super) unsafe fn dotprod_q31(x: &[Cq31], h: &[i32]) -> Cq31 {
        let xs = x.chunks_exact(2);
        let hs = h.chunks_exact(4);
        let (x_tail, h_tail) = (xs.remainder(), hs.remainder());

        let mut sum = vdupq_n_s32(0);
        for (xc, hc) in xs.zip(hs) {
            let s = vld1q_s32(xc.as_ptr() as *const i32);
            let c = vld1q_s32(hc.as_ptr());
            sum = vqaddq_s32(sum, vqrdmulhq_s32(s, c));
        }

        let mut lanes = [0i32; 4];
        vst1q_s32(lanes.as_mut_ptr(), sum);

        let mut acc = fold_q31_lanes(lanes);
        for (s, c) in x_tail.iter().zip(h_tail.chunks_exact(2)) {
            acc = cq31_sat_add(acc, Cq31::new(qrdmulh_i32(s.re, c[0]), qrdmulh_i32(s.im, c[1])));
        }
        acc
    }

    #[target_feature(enable = "neon")]
    pub(super) unsafe fn dotprod_q15(x: &[Cq15], h: &[i16]) -> Cq15 {
        let xs = x.chunks_exact(4);
        let hs = h.chunks_exact(8);
        let (x_tail, h_tail) = (xs.remainder(), hs.remainder());

        let mut sum = vdupq_n_s16(0);
        for (xc, hc) in xs.zip(hs) {
            let s = vld1q_s16(xc.as_ptr() as *const i16);
            let c = vld1q_s16(hc.as_ptr());
            sum = vqaddq_s16(sum, vqrdmulhq_s16(s, c));
        }

        let mut lanes = [0i16; 8];
        vst1q_s16(lanes.as_mut_ptr(), sum);

        cq15_sat_add(fold_q15_lanes(lanes), dotprod_q15_scalar(x_tail, h_tail))
    }
}

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
mod sse {
    use super::{dotprod_q15_scalar, fold_q15_lanes};
    use common::types::{Cq15, Cq31};
    use common::utils::cq15_sat_add;
    use std::arch::x86_64::*;

    /// 2^31, the pre/post scale between Q31 integers and [-1, 1) floats
    const Q31_SCALE: f64 = 2147483648.0;

    /// Largest double that converts to a Q31 integer without overflow
    const Q31_MAX: f64 = 2147483647.0;

    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn dotprod_q31(x: &[Cq31], h: &[i32]) -> Cq31 {
        let inv = _mm_set1_pd(1.0 / Q31_SCALE);

        // Two accumulators hide the add latency; one complex sample per lane pair
        let mut acc0 = _mm_setzero_pd();
        let mut acc1 = _mm_setzero_pd();

        let xs = x.chunks_exact(2);
        let hs = h.chunks_exact(4);
        let (x_tail, h_tail) = (xs.remainder(), hs.remainder());

        for (xc, hc) in xs.zip(hs) {
            let raw_s = _mm_loadu_si128(xc.as_ptr() as *const __m128i);
            let raw_c = _mm_loadu_si128(hc.as_ptr() as *const __m128i);

            let s0 = _mm_mul_pd(_mm_cvtepi32_pd(raw_s), inv);
            let c0 = _mm_mul_pd(_mm_cvtepi32_pd(raw_c), inv);
            let s1 = _mm_mul_pd(_mm_cvtepi32_pd(_mm_unpackhi_epi64(raw_s, raw_s)), inv);
            let c1 = _mm_mul_pd(_mm_cvtepi32_pd(_mm_unpackhi_epi64(raw_c, raw_c)), inv);

            acc0 = _mm_add_pd(acc0, _mm_mul_pd(s0, c0));
            acc1 = _mm_add_pd(acc1, _mm_mul_pd(s1, c1));
        }

        for (s, c) in x_tail.iter().zip(h_tail.chunks_exact(2)) {
            let sv = _mm_mul_pd(_mm_set_pd(s.im as f64, s.re as f64), inv);
            let cv = _mm_mul_pd(_mm_set_pd(c[1] as f64, c[0] as f64), inv);
            acc0 = _mm_add_pd(acc0, _mm_mul_pd(sv, cv));
        }

        let mut sum = _mm_mul_pd(_mm_add_pd(acc0, acc1), _mm_set1_pd(Q31_SCALE));

        // cvtpd2dq returns 0x80000000 for out-of-range input; clamp to saturate instead
        sum = _mm_max_pd(sum, _mm_set1_pd(-Q31_SCALE));
        sum = _mm_min_pd(sum, _mm_set1_pd(Q31_MAX));

        let mut lanes = [0i32; 4];
        _mm_storeu_si128(lanes.as_mut_ptr() as *mut __m128i, _mm_cvtpd_epi32(sum));
        Cq31::new(lanes[0], lanes[1])
    }

    #[target_feature(enable = "sse2,ssse3")]
    pub(super) unsafe fn dotprod_q15(x: &[Cq15], h: &[i16]) -> Cq15 {
        let xs = x.chunks_exact(4);
        let hs = h.chunks_exact(8);
        let (x_tail, h_tail) = (xs.remainder(), hs.remainder());

        let mut sum = _mm_setzero_si128();
        for (xc, hc) in xs.zip(hs) {
            let s = _mm_loadu_si128(xc.as_ptr() as *const __m128i);
            let c = _mm_loadu_si128(hc.as_ptr() as *const __m128i);
            sum = _mm_adds_epi16(sum, _mm_mulhrs_epi16(s, c));
        }

        let mut lanes = [0i16; 8];
        _mm_storeu_si128(lanes.as_mut_ptr() as *mut __m128i, sum);

        cq15_sat_add(fold_q15_lanes(lanes), dotprod_q15_scalar(x_tail, h_tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::{cq15_lsb_distance, cq31_lsb_distance, qrdmulh_i32};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Worst-case distance from the integer model over the randomized inputs below
    const MODEL_TOLERANCE_LSB: u64 = 6;

    /// Integer model of the contract: rounding multiply per tap, saturating sum
    fn reference_q31(x: &[Cq31], h: &[i32]) -> Cq31 {
        x.iter().zip(h.chunks_exact(2)).fold(Cq31::new(0, 0), |acc, (s, c)| {
            cq31_sat_add(acc, Cq31::new(qrdmulh_i32(s.re, c[0]), qrdmulh_i32(s.im, c[1])))
        })
    }

    // Tap magnitudes keep the sums clear of saturation, where accumulation order matters
    fn random_q31(rng: &mut StdRng, n: usize, amplitude: f64) -> (Vec<Cq31>, Vec<i32>) {
        let x = (0..n)
            .map(|_| {
                Cq31::new(
                    i32::quantize(rng.gen_range(-amplitude..amplitude)),
                    i32::quantize(rng.gen_range(-amplitude..amplitude)),
                )
            })
            .collect();
        let h = (0..n)
            .flat_map(|_| {
                let tap = i32::quantize(rng.gen_range(-0.05..0.05));
                [tap, tap]
            })
            .collect();
        (x, h)
    }

    fn random_q15(rng: &mut StdRng, n: usize) -> (Vec<Cq15>, Vec<i16>) {
        let x = (0..n)
            .map(|_| Cq15::new(rng.gen_range(-16000..16000), rng.gen_range(-16000..16000)))
            .collect();
        let h = (0..n)
            .flat_map(|_| {
                let tap: i16 = rng.gen_range(-2000..2000);
                [tap, tap]
            })
            .collect();
        (x, h)
    }

    #[test]
    fn test_scalar_always_available() {
        assert!(Kernel::available_for::<i32>().contains(&Kernel::Scalar));
        assert!(Kernel::available_for::<i16>().contains(&Kernel::Scalar));
        let best = Kernel::best_for::<i32>();
        assert!(Kernel::available_for::<i32>().contains(&best));
    }

    #[test]
    fn test_unsupported_kernels_not_listed() {
        assert!(!i32::supports(Kernel::Neon, SimdCaps::empty()));
        assert!(!i16::supports(Kernel::Sse2, SimdCaps::SSE2));
        assert!(i16::supports(Kernel::Sse2, SimdCaps::SSE2 | SimdCaps::SSSE3));
        assert!(i32::supports(Kernel::Scalar, SimdCaps::empty()));
    }

    #[test]
    fn test_kernel_parse() {
        assert_eq!("NEON".parse::<Kernel>().unwrap(), Kernel::Neon);
        assert_eq!("sse2".parse::<Kernel>().unwrap(), Kernel::Sse2);
        assert_eq!(Kernel::Scalar.to_string(), "scalar");
        assert!("avx512".parse::<Kernel>().is_err());
    }

    #[test]
    fn test_q31_kernels_agree() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for &n in &[8usize, 16] {
            for _ in 0..200 {
                let (x, h) = random_q31(&mut rng, n, 0.9);
                let reference = reference_q31(&x, &h);
                for kernel in Kernel::available_for::<i32>() {
                    let y = unsafe { i32::dotprod(kernel, &x, &h) };
                    let d = cq31_lsb_distance(y, reference);
                    assert!(d <= MODEL_TOLERANCE_LSB, "{} kernel off by {} LSB (n={})", kernel, d, n);
                }
            }
        }
    }

    #[test]
    fn test_q31_float_kernels_agree_closely() {
        // SSE2 and scalar both accumulate in f64 and differ only in summation order
        let mut rng = StdRng::seed_from_u64(0xf1);
        for _ in 0..500 {
            let (x, h) = random_q31(&mut rng, 16, 0.9);
            let scalar = unsafe { i32::dotprod(Kernel::Scalar, &x, &h) };
            for kernel in Kernel::available_for::<i32>() {
                if kernel == Kernel::Neon {
                    continue;
                }
                let y = unsafe { i32::dotprod(kernel, &x, &h) };
                assert!(cq31_lsb_distance(y, scalar) <= 1, "{} kernel gave {:?}, scalar {:?}", kernel, y, scalar);
            }
        }
    }

    #[test]
    fn test_q31_kernels_saturate() {
        let n = 16;
        let x = vec![Cq31::new(i32::MAX, i32::MIN); n];
        let h = vec![i32::MAX; 2 * n];
        for kernel in Kernel::available_for::<i32>() {
            let y = unsafe { i32::dotprod(kernel, &x, &h) };
            assert_eq!(y, Cq31::new(i32::MAX, i32::MIN), "{} kernel wrapped", kernel);
        }
    }

    #[test]
    fn test_q31_odd_length_tail() {
        let mut rng = StdRng::seed_from_u64(7);
        let (x, h) = random_q31(&mut rng, 5, 0.5);
        let reference = reference_q31(&x, &h);
        for kernel in Kernel::available_for::<i32>() {
            let y = unsafe { i32::dotprod(kernel, &x, &h) };
            assert!(cq31_lsb_distance(y, reference) <= 5);
        }
    }

    #[test]
    fn test_q15_kernels_agree() {
        let mut rng = StdRng::seed_from_u64(42);
        for &n in &[8usize, 16] {
            for _ in 0..200 {
                let (x, h) = random_q15(&mut rng, n);
                let reference = dotprod_q15_scalar(&x, &h);
                for kernel in Kernel::available_for::<i16>() {
                    let y = unsafe { i16::dotprod(kernel, &x, &h) };
                    // pmulhrsw and qrdmulh round identically below saturation
                    let d = cq15_lsb_distance(y, reference);
                    assert!(d <= 1, "{} kernel off by {} LSB (n={})", kernel, d, n);
                }
            }
        }
    }

    #[test]
    fn test_q15_kernels_saturate() {
        let n = 16;
        let x = vec![Cq15::new(i16::MAX, i16::MIN + 1); n];
        let h = vec![i16::MAX; 2 * n];
        for kernel in Kernel::available_for::<i16>() {
            let y = unsafe { i16::dotprod(kernel, &x, &h) };
            assert_eq!(y, Cq15::new(i16::MAX, i16::MIN), "{} kernel wrapped", kernel);
        }
    }

    #[test]
    fn test_unit_impulse_selects_tap() {
        // A single full-scale-ish sample against a ramp picks out one coefficient
        let n = 16;
        let mut x = vec![Cq31::new(0, 0); n];
        x[3] = Cq31::new(1 << 30, -(1 << 30));
        let h: Vec<i32> = (0..n)
            .flat_map(|j| {
                let tap = (j as i32 + 1) << 24;
                [tap, tap]
            })
            .collect();
        // 0.5 * 2^-5
        let expected = Cq31::new(1 << 25, -(1 << 25));
        for kernel in Kernel::available_for::<i32>() {
            let y = unsafe { i32::dotprod(kernel, &x, &h) };
            assert!(cq31_lsb_distance(y, expected) <= 1, "{} kernel gave {:?}", kernel, y);
        }
    }
}
