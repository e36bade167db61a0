//! Compacting Sample Window
//!
//! Fixed-capacity history buffer for the filterbank. Samples are appended at
//! a cursor; when the cursor reaches capacity the newest `sub_len - 1`
//! samples are copied back to the start. The most recent `sub_len` samples
//! are therefore always one contiguous slice.

use num_complex::Complex;
use tracing::trace;

/// Samples held by a window before it compacts
pub const WINDOW_CAPACITY: usize = 2048;

/// Sliding window over the most recent input samples
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    buffer: Vec<Complex<T>>,
    cursor: usize,
    sub_len: usize,
    compactions: u64,
}

impl<T: Copy + Default> SlidingWindow<T> {
    /// Create a window for `sub_len`-tap dot products, primed with zeros
    pub fn new(sub_len: usize) -> Self {
        Self::with_capacity(sub_len, WINDOW_CAPACITY)
    }

    /// Create a window with an explicit capacity (must exceed `sub_len`)
    pub fn with_capacity(sub_len: usize, capacity: usize) -> Self {
        assert!(sub_len > 0 && capacity > sub_len, "window capacity must exceed the dot-product length");
        Self {
            buffer: vec![Complex::default(); capacity],
            cursor: sub_len,
            sub_len,
            compactions: 0,
        }
    }

    /// Append one sample, compacting first if the buffer is full
    #[inline]
    pub fn push(&mut self, x: Complex<T>) {
        if self.cursor == self.buffer.len() {
            self.compact();
        }
        self.buffer[self.cursor] = x;
        self.cursor += 1;
    }

    /// Move the newest `sub_len - 1` samples to the front of the buffer
    pub fn compact(&mut self) {
        let keep = self.sub_len - 1;
        self.buffer.copy_within(self.cursor - keep..self.cursor, 0);
        self.cursor = keep;
        self.compactions += 1;
        trace!("Window compacted ({} total)", self.compactions);
    }

    /// The `sub_len` most recently pushed samples, oldest first
    #[inline]
    pub fn recent(&self) -> &[Complex<T>] {
        &self.buffer[self.cursor - self.sub_len..self.cursor]
    }

    /// Clear history back to the zero-primed state
    pub fn reset(&mut self) {
        self.buffer.fill(Complex::default());
        self.cursor = self.sub_len;
    }

    /// Write position
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of compactions performed so far
    pub fn compactions(&self) -> u64 {
        self.compactions
    }

    /// Buffer capacity in samples
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}
