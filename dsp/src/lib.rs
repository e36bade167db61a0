//! Receive-Path Resampling Library
//!
//! This crate implements the fractional sample-rate converter at the front of
//! the receive chain: a quantized polyphase filterbank with capability-selected
//! fixed-point convolution kernels, driven by a continuous timing-phase tracker.

pub mod firdes;
pub mod pfb;
pub mod resamp;

pub use firdes::{FilterDesign, KaiserDesign};
pub use pfb::{CoefficientTable, Filterbank, FilterbankQ15, FilterbankQ31, Kernel, SimdCaps, SlidingWindow};
pub use resamp::{Resampler, MAX_RATE, MIN_RATE, ResamplerConfig, ResamplerMode, TimingSnapshot};

use thiserror::Error;

/// Errors raised while building or driving the resampler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Tap count {total} is not divisible into {num_phases} phases")]
    TapCountMismatch { total: usize, num_phases: usize },

    #[error("Filter has {actual} taps per phase, this build requires {expected}")]
    TapsPerPhaseMismatch { actual: usize, expected: usize },

    #[error("Invalid resampling rate: {0} (must be within [1/65536, 65536])")]
    InvalidRate(f64),

    #[error("Output buffer holds {capacity} samples, need at least {required}")]
    OutputBufferTooSmall { capacity: usize, required: usize },

    #[error("Kernel {0} is not available on this host")]
    KernelUnavailable(String),
}

/// Result type for DSP operations
pub type Result<T> = std::result::Result<T, DspError>;
