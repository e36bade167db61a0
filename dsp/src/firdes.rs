//! Prototype Filter Design
//!
//! Kaiser-windowed sinc lowpass design used to produce the real-valued
//! prototype that the polyphase filterbank decomposes and quantizes.

use crate::{DspError, Result};
use std::f64::consts::PI;
use tracing::trace;

/// Source of real-valued prototype taps
pub trait FilterDesign {
    /// Design `num_taps` taps with normalized cutoff `cutoff` (cycles/sample),
    /// stopband attenuation `stopband_db` and fractional sample offset `mu`
    fn design(&self, num_taps: usize, cutoff: f32, stopband_db: f32, mu: f32) -> Result<Vec<f32>>;
}

/// Kaiser-window lowpass design
#[derive(Debug, Clone, Copy, Default)]
pub struct KaiserDesign;

impl FilterDesign for KaiserDesign {
    fn design(&self, num_taps: usize, cutoff: f32, stopband_db: f32, mu: f32) -> Result<Vec<f32>> {
        design_kaiser(num_taps, cutoff, stopband_db, mu)
    }
}

/// Design a Kaiser-windowed sinc lowpass filter
pub fn design_kaiser(num_taps: usize, cutoff: f32, stopband_db: f32, mu: f32) -> Result<Vec<f32>> {
    if num_taps == 0 {
        return Err(DspError::InvalidParameter("filter length must be at least 1".to_string()));
    }
    if !(cutoff > 0.0 && cutoff < 0.5) {
        return Err(DspError::InvalidParameter(format!("cutoff {} outside (0, 0.5)", cutoff)));
    }
    if !(stopband_db > 0.0) {
        return Err(DspError::InvalidParameter(format!("stopband attenuation {} dB must be positive", stopband_db)));
    }
    if !(-0.5..=0.5).contains(&mu) {
        return Err(DspError::InvalidParameter(format!("fractional offset {} outside [-0.5, 0.5]", mu)));
    }

    let beta = kaiser_beta(stopband_db as f64);
    let fc = cutoff as f64;
    let center = (num_taps - 1) as f64 / 2.0;
    let i0_beta = bessel_i0(beta);

    let taps: Vec<f32> = (0..num_taps)
        .map(|i| {
            let t = i as f64 - center + mu as f64;
            let r = 2.0 * t / num_taps as f64;
            let window = bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / i0_beta;
            (sinc(2.0 * fc * t) * window) as f32
        })
        .collect();

    trace!("Kaiser design: n={}, fc={}, As={} dB, beta={:.4}", num_taps, cutoff, stopband_db, beta);
    Ok(taps)
}

/// Kaiser window shape parameter for a stopband attenuation in dB
pub fn kaiser_beta(stopband_db: f64) -> f64 {
    let a = stopband_db.abs();
    if a > 50.0 {
        0.1102 * (a - 8.7)
    } else if a > 21.0 {
        0.5842 * (a - 21.0).powf(0.4) + 0.07886 * (a - 21.0)
    } else {
        0.0
    }
}

/// Normalized sinc, sin(pi x) / (pi x)
fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-10 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Modified Bessel function of the first kind, order 0.
/// Computed via the power series: I0(x) = sum_{k=0}^{inf} ((x/2)^k / k!)^2
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let x_half = x / 2.0;
    for k in 1..64 {
        term *= x_half / k as f64;
        let t2 = term * term;
        sum += t2;
        if t2 < 1e-16 * sum {
            break;
        }
    }
    sum
}
