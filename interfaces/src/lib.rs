//! Sample Stream Interfaces Library
//!
//! This crate provides the byte-level IQ sample streams that feed the
//! resampler and carry its output: raw interleaved sample formats over any
//! async reader or writer (files, pipes, stdio).

pub mod iq_stream;

pub use iq_stream::{IqBlock, IqReader, IqWriter, SampleFormat, StreamStats};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed buffer: {len} bytes is not a whole number of {width}-byte samples")]
    MalformedBuffer { len: usize, width: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for interface operations
pub type Result<T> = std::result::Result<T, InterfaceError>;
