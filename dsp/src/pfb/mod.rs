//! Polyphase Filterbank
//!
//! Owns a compacting sample window and a quantized coefficient table, and
//! evaluates any branch of the bank against the current window. Available in
//! a wide (Q31) and a narrow (Q15) variant with the same contract.

pub mod kernel;
pub mod quantize;
pub mod window;

pub use kernel::{DotProduct, Kernel, SimdCaps};
pub use quantize::CoefficientTable;
pub use window::{SlidingWindow, WINDOW_CAPACITY};

use crate::{DspError, Result};
use num_complex::Complex;
use tracing::info;

/// Polyphase filterbank over fixed-point samples of component type `T`
#[derive(Debug, Clone)]
pub struct Filterbank<T: DotProduct> {
    table: CoefficientTable<T>,
    window: SlidingWindow<T>,
    kernel: Kernel,
}

/// Wide variant
pub type FilterbankQ31 = Filterbank<i32>;

/// Narrow variant
pub type FilterbankQ15 = Filterbank<i16>;

impl<T: DotProduct> Filterbank<T> {
    /// Build a bank of `num_phases` branches from `prototype`, using the best kernel for this host
    pub fn new(num_phases: usize, prototype: &[f32]) -> Result<Self> {
        Self::with_kernel(num_phases, prototype, Kernel::best_for::<T>())
    }

    /// Build a bank with an explicit kernel
    pub fn with_kernel(num_phases: usize, prototype: &[f32], kernel: Kernel) -> Result<Self> {
        if !T::supports(kernel, SimdCaps::host()) {
            return Err(DspError::KernelUnavailable(kernel.to_string()));
        }

        let table = CoefficientTable::quantize(num_phases, prototype)?;
        let window = SlidingWindow::new(table.sub_len());

        info!(
            "{} filterbank: {} phases x {} taps, {} kernel",
            T::NAME,
            table.num_phases(),
            table.sub_len(),
            kernel
        );

        Ok(Self { table, window, kernel })
    }

    /// Append one sample to the window
    #[inline]
    pub fn push(&mut self, x: Complex<T>) {
        self.window.push(x);
    }

    /// Output of branch `phase` for the current window.
    ///
    /// `phase` must be below `num_phases()`.
    #[inline]
    pub fn evaluate(&self, phase: usize) -> Complex<T> {
        debug_assert!(phase < self.table.num_phases(), "phase {} out of range", phase);
        let h = self.table.phase(phase);
        // SAFETY: the kernel was checked against the host capabilities at construction
        unsafe { T::dotprod(self.kernel, self.window.recent(), h) }
    }

    /// Clear the sample history
    pub fn reset(&mut self) {
        self.window.reset();
    }

    /// Number of branches
    pub fn num_phases(&self) -> usize {
        self.table.num_phases()
    }

    /// Taps per branch
    pub fn taps_per_phase(&self) -> usize {
        self.table.sub_len()
    }

    /// Kernel in use
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Sample window
    pub fn window(&self) -> &SlidingWindow<T> {
        &self.window
    }
}
