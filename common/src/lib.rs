//! Common Fixed-Point Types Library
//!
//! This crate provides the fixed-point sample types and arithmetic shared
//! by the resampling front end and its I/O layer.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
