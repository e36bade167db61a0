//! Arbitrary-Rate Resampler
//!
//! Fractional resampling of a complex Q15 stream by a dynamically adjustable
//! ratio (output rate / input rate). A wide (Q31) polyphase filterbank
//! provides the filter response at `num_phases` uniformly spaced sub-sample
//! offsets; outputs between two adjacent branches are linearly interpolated.
//!
//! The timing phase `tau` advances by `1 / rate` per output sample. When the
//! interpolation partner of the last branch is needed, it is branch 0 of the
//! *next* input sample, so the resampler parks in boundary mode until that
//! sample arrives.

use crate::firdes::{FilterDesign, KaiserDesign};
use crate::pfb::{FilterbankQ31, Kernel};
use crate::{DspError, Result};
use common::types::{cq31_to_cf, taps_per_phase, widen_cq15, Cq15, Cq31};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Highest accepted resampling rate (output samples per input sample)
pub const MAX_RATE: f64 = 65536.0;

/// Lowest accepted resampling rate
pub const MIN_RATE: f64 = 1.0 / MAX_RATE;

/// Resampler construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplerConfig {
    /// Filter semi-length in input samples (m); the prototype has `2 m num_phases + 1` taps
    pub taps_multiplier: usize,
    /// Normalized cutoff relative to the input rate, in (0, 0.5)
    pub cutoff: f32,
    /// Stopband attenuation in dB
    pub stopband_db: f32,
    /// Number of polyphase branches
    pub num_phases: usize,
    /// Force a convolution kernel instead of the best one detected
    pub kernel: Option<Kernel>,
}

impl Default for ResamplerConfig {
    fn default() -> Self {
        Self {
            taps_multiplier: taps_per_phase().count() / 2,
            cutoff: 0.45,
            stopband_db: 60.0,
            num_phases: 32,
            kernel: None,
        }
    }
}

impl ResamplerConfig {
    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.taps_multiplier == 0 {
            return Err(DspError::InvalidParameter("taps multiplier must be at least 1".to_string()));
        }
        if !(self.cutoff > 0.0 && self.cutoff < 0.5) {
            return Err(DspError::InvalidParameter(format!("cutoff {} outside (0, 0.5)", self.cutoff)));
        }
        if !(self.stopband_db > 0.0) {
            return Err(DspError::InvalidParameter(format!(
                "stopband attenuation {} dB must be positive",
                self.stopband_db
            )));
        }
        if self.num_phases < 2 {
            return Err(DspError::InvalidParameter(format!(
                "phase count {} must be at least 2",
                self.num_phases
            )));
        }
        Ok(())
    }
}

/// Interpolation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplerMode {
    /// Interpolating between two branches of the current input sample
    Interp,
    /// Waiting for branch 0 of the next input sample
    Boundary,
}

/// Read-only view of the timing state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSnapshot {
    /// Accumulated timing phase in input-sample periods
    pub tau: f64,
    /// Base branch index
    pub b: i64,
    /// Interpolation weight between branch `b` and `b + 1`
    pub mu: f64,
    /// Current mode
    pub mode: ResamplerMode,
}

/// Polyphase arbitrary resampler
#[derive(Debug, Clone)]
pub struct Resampler {
    config: ResamplerConfig,
    pfb: FilterbankQ31,

    /// Output rate / input rate
    rate: f64,
    /// Timing phase step per output sample (1 / rate)
    del: f64,

    /// Accumulated timing phase
    tau: f64,
    /// Soft branch index, tau * num_phases = b + mu
    bf: f64,
    /// Base branch index
    b: i64,
    /// Fractional interpolation weight, 0 <= mu < 1
    mu: f64,
    /// Branch output at b
    y0: Cq31,
    /// Branch output at b + 1
    y1: Cq31,

    mode: ResamplerMode,
}

impl Resampler {
    /// Create a resampler with the Kaiser prototype design
    pub fn new(config: ResamplerConfig) -> Result<Self> {
        Self::with_design(config, &KaiserDesign)
    }

    /// Create a resampler from an arbitrary prototype design
    pub fn with_design<D: FilterDesign + ?Sized>(config: ResamplerConfig, design: &D) -> Result<Self> {
        config.validate()?;

        let num_phases = config.num_phases;
        let n = 2 * config.taps_multiplier * num_phases + 1;
        let mut taps = design.design(n, config.cutoff / num_phases as f32, config.stopband_db, 0.0)?;
        if taps.len() != n {
            return Err(DspError::InvalidParameter(format!(
                "filter design returned {} taps, expected {}",
                taps.len(),
                n
            )));
        }

        // Each branch sees 1/num_phases of the prototype; normalize for unity gain per branch
        let dc: f64 = taps.iter().map(|&t| t as f64).sum();
        if !dc.is_finite() || dc.abs() < f64::EPSILON {
            return Err(DspError::InvalidParameter(format!("prototype DC gain {} cannot be normalized", dc)));
        }
        let gain = num_phases as f64 / dc;
        for tap in taps.iter_mut() {
            *tap = (*tap as f64 * gain) as f32;
        }

        // The final tap of the odd-length prototype is dropped
        let prototype = &taps[..n - 1];
        let pfb = match config.kernel {
            Some(kernel) => FilterbankQ31::with_kernel(num_phases, prototype, kernel)?,
            None => FilterbankQ31::new(num_phases, prototype)?,
        };

        info!(
            "Resampler created: m={}, fc={}, As={} dB, {} phases, {} taps, kernel={}",
            config.taps_multiplier,
            config.cutoff,
            config.stopband_db,
            num_phases,
            n,
            pfb.kernel()
        );

        Ok(Self {
            config,
            pfb,
            rate: 1.0,
            del: 1.0,
            tau: 0.0,
            bf: 0.0,
            b: 0,
            mu: 0.0,
            y0: Cq31::new(0, 0),
            y1: Cq31::new(0, 0),
            mode: ResamplerMode::Interp,
        })
    }

    /// Set the resampling rate (output / input). Takes effect on the next sample.
    ///
    /// Accepts rates in `[MIN_RATE, MAX_RATE]`; anything else leaves the state untouched.
    pub fn set_rate(&mut self, rate: f64) -> Result<()> {
        if !(MIN_RATE..=MAX_RATE).contains(&rate) {
            return Err(DspError::InvalidRate(rate));
        }
        self.rate = rate;
        self.del = 1.0 / rate;
        debug!("Resampler rate set to {:.9} (step {:.9})", rate, self.del);
        Ok(())
    }

    /// Current resampling rate
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Output capacity one `execute` call may need at the current rate
    pub fn max_output_len(&self) -> usize {
        (self.rate.ceil() as usize).saturating_add(1)
    }

    /// Filter delay in input samples
    pub fn group_delay(&self) -> usize {
        self.config.taps_multiplier
    }

    /// Configuration the resampler was built with
    pub fn config(&self) -> &ResamplerConfig {
        &self.config
    }

    /// Kernel used by the filterbank
    pub fn kernel(&self) -> Kernel {
        self.pfb.kernel()
    }

    /// Timing state for diagnostics
    pub fn state(&self) -> TimingSnapshot {
        TimingSnapshot {
            tau: self.tau,
            b: self.b,
            mu: self.mu,
            mode: self.mode,
        }
    }

    /// Clear sample history and timing, keeping the rate
    pub fn reset(&mut self) {
        self.pfb.reset();
        self.tau = 0.0;
        self.bf = 0.0;
        self.b = 0;
        self.mu = 0.0;
        self.y0 = Cq31::new(0, 0);
        self.y1 = Cq31::new(0, 0);
        self.mode = ResamplerMode::Interp;
    }

    /// Consume one input sample, writing zero or more outputs to `out`.
    ///
    /// `out` must hold at least `max_output_len()` samples. Returns the number written.
    pub fn execute(&mut self, x: Cq15, out: &mut [Complex32]) -> Result<usize> {
        let required = self.max_output_len();
        if out.len() < required {
            return Err(DspError::OutputBufferTooSmall { capacity: out.len(), required });
        }
        Ok(self.run(x, out))
    }

    /// Resample a block, appending outputs to `out`. Returns the number appended.
    pub fn process(&mut self, input: &[Cq15], out: &mut Vec<Complex32>) -> usize {
        let start = out.len();
        out.reserve((input.len() as f64 * self.rate).ceil() as usize + 1);

        let per_call = self.max_output_len();
        for &x in input {
            let len = out.len();
            out.resize(len + per_call, Complex32::new(0.0, 0.0));
            let n = self.run(x, &mut out[len..]);
            out.truncate(len + n);
        }
        out.len() - start
    }

    fn run(&mut self, x: Cq15, out: &mut [Complex32]) -> usize {
        let num_phases = self.config.num_phases as i64;
        self.pfb.push(widen_cq15(x));

        let mut n = 0;
        while self.b < num_phases {
            match self.mode {
                ResamplerMode::Interp => {
                    self.y0 = self.pfb.evaluate(self.b as usize);

                    if self.b == num_phases - 1 {
                        // Partner is branch 0 of the next input sample
                        self.mode = ResamplerMode::Boundary;
                        self.b = num_phases;
                    } else {
                        self.y1 = self.pfb.evaluate(self.b as usize + 1);
                        out[n] = self.interpolate();
                        n += 1;
                        self.update_timing();
                    }
                }
                ResamplerMode::Boundary => {
                    self.y1 = self.pfb.evaluate(0);
                    out[n] = self.interpolate();
                    n += 1;
                    self.update_timing();

                    // At rates above num_phases the next output can still fall
                    // before branch 0; stay on the same branch pair until it doesn't
                    if self.b >= 0 {
                        self.mode = ResamplerMode::Interp;
                    }
                }
            }
        }

        // Move the timing reference to the next input sample
        self.tau -= 1.0;
        self.bf -= num_phases as f64;
        self.b -= num_phases;

        n
    }

    #[inline]
    fn interpolate(&self) -> Complex32 {
        let mu = self.mu as f32;
        cq31_to_cf(self.y0) * (1.0 - mu) + cq31_to_cf(self.y1) * mu
    }

    #[inline]
    fn update_timing(&mut self) {
        self.tau += self.del;
        self.bf = self.tau * self.config.num_phases as f64;
        let base = self.bf.floor();
        self.b = base as i64;
        self.mu = self.bf - base;
    }
}
