//! Raw IQ Sample Streams
//!
//! Interleaved little-endian I/Q sample framing over async byte streams.
//! Input blocks are delivered as Q15 samples; output is written from
//! floating-point samples in the configured format.

use crate::{InterfaceError, Result};
use bytes::{Buf, BufMut, BytesMut};
use common::types::{cq15_from_cf, Cq15};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Default samples per input block
pub const DEFAULT_BLOCK_LEN: usize = 4096;

/// Wire format of one complex sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit I then Q (Q15)
    Cs16,
    /// 32-bit float I then Q
    Cf32,
}

impl SampleFormat {
    /// Bytes per complex sample
    pub const fn width(&self) -> usize {
        match self {
            SampleFormat::Cs16 => 4,
            SampleFormat::Cf32 => 8,
        }
    }

    /// Decode whole samples from `bytes`
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<Cq15>> {
        match self {
            SampleFormat::Cs16 => decode_cs16(bytes),
            SampleFormat::Cf32 => decode_cf32(bytes),
        }
    }

    /// Append `samples` to `dst`
    pub fn encode(&self, samples: &[Complex32], dst: &mut BytesMut) {
        match self {
            SampleFormat::Cs16 => encode_cs16(samples, dst),
            SampleFormat::Cf32 => encode_cf32(samples, dst),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::Cs16 => write!(f, "cs16"),
            SampleFormat::Cf32 => write!(f, "cf32"),
        }
    }
}

impl FromStr for SampleFormat {
    type Err = InterfaceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cs16" | "sc16" | "i16" => Ok(SampleFormat::Cs16),
            "cf32" | "fc32" | "f32" => Ok(SampleFormat::Cf32),
            other => Err(InterfaceError::InvalidConfig(format!("unknown sample format '{}'", other))),
        }
    }
}

/// Block of input samples
#[derive(Debug, Clone, PartialEq)]
pub struct IqBlock {
    /// Q15 samples
    pub samples: Vec<Cq15>,
    /// Stream index of the first sample
    pub timestamp: u64,
}

impl IqBlock {
    pub fn new(samples: Vec<Cq15>, timestamp: u64) -> Self {
        Self { samples, timestamp }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Stream counters
#[derive(Debug, Default, Clone)]
pub struct StreamStats {
    pub samples_in: u64,
    pub samples_out: u64,
    pub blocks_in: u64,
    pub blocks_out: u64,
    pub blocks_dropped: u64,
    pub bytes_discarded: u64,
}

fn check_whole(bytes: &[u8], width: usize) -> Result<()> {
    if bytes.len() % width != 0 {
        return Err(InterfaceError::MalformedBuffer { len: bytes.len(), width });
    }
    Ok(())
}

/// Decode interleaved little-endian 16-bit I/Q
pub fn decode_cs16(bytes: &[u8]) -> Result<Vec<Cq15>> {
    check_whole(bytes, SampleFormat::Cs16.width())?;
    let mut buf = bytes;
    let mut samples = Vec::with_capacity(bytes.len() / 4);
    while buf.has_remaining() {
        let re = buf.get_i16_le();
        let im = buf.get_i16_le();
        samples.push(Cq15::new(re, im));
    }
    Ok(samples)
}

/// Decode interleaved little-endian float I/Q, saturating to Q15
pub fn decode_cf32(bytes: &[u8]) -> Result<Vec<Cq15>> {
    check_whole(bytes, SampleFormat::Cf32.width())?;
    let mut buf = bytes;
    let mut samples = Vec::with_capacity(bytes.len() / 8);
    while buf.has_remaining() {
        let re = buf.get_f32_le();
        let im = buf.get_f32_le();
        samples.push(cq15_from_cf(Complex32::new(re, im)));
    }
    Ok(samples)
}

/// Encode as interleaved little-endian float I/Q
pub fn encode_cf32(samples: &[Complex32], dst: &mut BytesMut) {
    dst.reserve(samples.len() * SampleFormat::Cf32.width());
    for s in samples {
        dst.put_f32_le(s.re);
        dst.put_f32_le(s.im);
    }
}

/// Encode as interleaved little-endian 16-bit I/Q, saturating
pub fn encode_cs16(samples: &[Complex32], dst: &mut BytesMut) {
    dst.reserve(samples.len() * SampleFormat::Cs16.width());
    for s in samples {
        let q = cq15_from_cf(*s);
        dst.put_i16_le(q.re);
        dst.put_i16_le(q.im);
    }
}

/// Block reader over an async byte source.
///
/// Bytes of a sample split across reads are carried over to the next block.
pub struct IqReader<R> {
    inner: R,
    format: SampleFormat,
    block_len: usize,
    buf: BytesMut,
    timestamp: u64,
    eof: bool,
    stats: StreamStats,
}

impl<R: AsyncRead + Unpin> IqReader<R> {
    pub fn new(inner: R, format: SampleFormat, block_len: usize) -> Self {
        let block_len = block_len.max(1);
        Self {
            inner,
            format,
            block_len,
            buf: BytesMut::with_capacity(block_len * format.width()),
            timestamp: 0,
            eof: false,
            stats: StreamStats::default(),
        }
    }

    /// Read the next block. Returns `None` once the source is exhausted.
    ///
    /// Blocks are `block_len` samples except possibly the last.
    pub async fn read_block(&mut self) -> Result<Option<IqBlock>> {
        let width = self.format.width();
        let want = self.block_len * width;

        while !self.eof && self.buf.len() < want {
            self.buf.reserve(want - self.buf.len());
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                self.eof = true;
                debug!("Input stream reached EOF at sample {}", self.timestamp);
            } else {
                trace!("Read {} bytes ({} buffered)", n, self.buf.len());
            }
        }

        let whole = self.buf.len().min(want) / width * width;
        if whole == 0 {
            if !self.buf.is_empty() {
                warn!("Discarding {} trailing bytes of a partial sample", self.buf.len());
                self.stats.bytes_discarded += self.buf.len() as u64;
                self.buf.clear();
            }
            return Ok(None);
        }

        let bytes = self.buf.split_to(whole);
        let samples = self.format.decode(&bytes)?;
        let block = IqBlock::new(samples, self.timestamp);

        self.timestamp += block.len() as u64;
        self.stats.samples_in += block.len() as u64;
        self.stats.blocks_in += 1;
        Ok(Some(block))
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Sample writer over an async byte sink
pub struct IqWriter<W> {
    inner: W,
    format: SampleFormat,
    buf: BytesMut,
    stats: StreamStats,
}

impl<W: AsyncWrite + Unpin> IqWriter<W> {
    pub fn new(inner: W, format: SampleFormat) -> Self {
        Self {
            inner,
            format,
            buf: BytesMut::new(),
            stats: StreamStats::default(),
        }
    }

    /// Encode and write `samples`
    pub async fn write_samples(&mut self, samples: &[Complex32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.buf.clear();
        self.format.encode(samples, &mut self.buf);
        self.inner.write_all(&self.buf).await?;

        self.stats.samples_out += samples.len() as u64;
        self.stats.blocks_out += 1;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
