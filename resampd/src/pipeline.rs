//! Streaming Pipeline
//!
//! reader task -> resampler worker (blocking thread) -> bounded queue -> writer task
//!
//! The worker is the only owner of the resampler. When the writer falls
//! behind and the output queue stays full past the configured timeout, the
//! block is dropped and counted rather than stalling the input.

use crate::config::PipelineConfig;
use anyhow::{anyhow, Result};
use dsp::Resampler;
use interfaces::{IqBlock, IqReader, IqWriter, StreamStats};
use num_complex::Complex32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Counters shared between pipeline stages
#[derive(Debug, Default)]
pub struct PipelineCounters {
    samples_in: AtomicU64,
    samples_out: AtomicU64,
    blocks_in: AtomicU64,
    blocks_out: AtomicU64,
    blocks_dropped: AtomicU64,
}

impl PipelineCounters {
    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_out: self.samples_out.load(Ordering::Relaxed),
            blocks_in: self.blocks_in.load(Ordering::Relaxed),
            blocks_out: self.blocks_out.load(Ordering::Relaxed),
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
            bytes_discarded: 0,
        }
    }
}

/// Resampled output of one input block
#[derive(Debug)]
struct OutputBlock {
    samples: Vec<Complex32>,
    /// Timestamp of the input block it came from
    source_timestamp: u64,
}

/// Run the pipeline until the input is exhausted, `shutdown` turns true, or a stage fails.
///
/// On shutdown the reader stops and the blocks already queued are resampled,
/// written and flushed before this returns. Dropping the shutdown sender also stops the reader.
pub async fn run<R, W>(
    mut reader: IqReader<R>,
    mut writer: IqWriter<W>,
    resampler: Resampler,
    config: &PipelineConfig,
    counters: Arc<PipelineCounters>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<StreamStats>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let depth = config.queue_depth.max(1);
    let (in_tx, in_rx) = mpsc::channel::<IqBlock>(depth);
    let (out_tx, mut out_rx) = mpsc::channel::<OutputBlock>(depth);

    let reader_handle = tokio::spawn(async move {
        loop {
            let block = tokio::select! {
                res = reader.read_block() => match res? {
                    Some(block) => block,
                    None => break,
                },
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Shutdown requested, closing input");
                    break;
                }
            };
            trace!("Read block at sample {} ({} samples)", block.timestamp, block.len());
            if in_tx.send(block).await.is_err() {
                debug!("Worker stopped, reader exiting");
                break;
            }
        }
        Ok::<u64, interfaces::InterfaceError>(reader.stats().bytes_discarded)
    });

    let timeout = Duration::from_millis(config.queue_timeout_ms);
    let worker_counters = counters.clone();
    let handle = Handle::current();
    let worker_handle =
        tokio::task::spawn_blocking(move || worker(resampler, in_rx, out_tx, timeout, handle, worker_counters));

    let writer_counters = counters.clone();
    let writer_handle = tokio::spawn(async move {
        while let Some(block) = out_rx.recv().await {
            trace!(
                "Writing {} samples from input sample {}",
                block.samples.len(),
                block.source_timestamp
            );
            writer.write_samples(&block.samples).await?;
            writer_counters.blocks_out.fetch_add(1, Ordering::Relaxed);
        }
        writer.flush().await?;
        Ok::<(), interfaces::InterfaceError>(())
    });

    let bytes_discarded = reader_handle
        .await
        .map_err(|e| anyhow!("Reader task failed: {}", e))??;
    worker_handle
        .await
        .map_err(|e| anyhow!("Resampler worker failed: {}", e))?;
    writer_handle
        .await
        .map_err(|e| anyhow!("Writer task failed: {}", e))??;

    let mut stats = counters.snapshot();
    stats.bytes_discarded = bytes_discarded;
    Ok(stats)
}

fn worker(
    mut resampler: Resampler,
    mut input: mpsc::Receiver<IqBlock>,
    output: mpsc::Sender<OutputBlock>,
    timeout: Duration,
    handle: Handle,
    counters: Arc<PipelineCounters>,
) {
    info!(
        "Resampler worker started: rate {:.9}, {} kernel",
        resampler.rate(),
        resampler.kernel()
    );

    while let Some(block) = input.blocking_recv() {
        counters.samples_in.fetch_add(block.len() as u64, Ordering::Relaxed);
        counters.blocks_in.fetch_add(1, Ordering::Relaxed);

        let mut samples = Vec::new();
        let produced = resampler.process(&block.samples, &mut samples);
        counters.samples_out.fetch_add(produced as u64, Ordering::Relaxed);

        let out = OutputBlock { samples, source_timestamp: block.timestamp };
        match handle.block_on(output.send_timeout(out, timeout)) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(dropped)) => {
                let total = counters.blocks_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Output queue full for {:?}, dropped block from sample {} ({} dropped)",
                    timeout, dropped.source_timestamp, total
                );
            }
            Err(SendTimeoutError::Closed(_)) => {
                warn!("Writer stopped, resampler worker exiting");
                break;
            }
        }
    }

    debug!("Resampler worker finished, state {:?}", resampler.state());
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsp::ResamplerConfig;
    use interfaces::SampleFormat;

    fn cs16_tone(n: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(n * 4);
        for i in 0..n {
            let phase = 0.02 * std::f64::consts::PI * i as f64;
            bytes.extend_from_slice(&((8000.0 * phase.cos()) as i16).to_le_bytes());
            bytes.extend_from_slice(&((8000.0 * phase.sin()) as i16).to_le_bytes());
        }
        bytes
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pipeline_resamples_whole_stream() {
        let n = 10_000;
        let input = cs16_tone(n);
        let reader = IqReader::new(std::io::Cursor::new(input), SampleFormat::Cs16, 512);
        let writer = IqWriter::new(Vec::new(), SampleFormat::Cf32);

        let mut resampler = Resampler::new(ResamplerConfig::default()).unwrap();
        let rate = 1.5;
        resampler.set_rate(rate).unwrap();

        let counters = Arc::new(PipelineCounters::default());
        let config = PipelineConfig { queue_timeout_ms: 5_000, ..Default::default() };
        let (_stop_tx, stop_rx) = watch::channel(false);
        let stats = run(reader, writer, resampler, &config, counters, stop_rx).await.unwrap();

        assert_eq!(stats.samples_in, n as u64);
        assert_eq!(stats.blocks_in, (n as u64 + 511) / 512);
        assert_eq!(stats.blocks_dropped, 0);
        assert_eq!(stats.blocks_out, stats.blocks_in);
        assert!((stats.samples_out as f64 - n as f64 * rate).abs() <= 1.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pipeline_counts_trailing_bytes() {
        let mut input = cs16_tone(100);
        input.push(0xff);
        let reader = IqReader::new(std::io::Cursor::new(input), SampleFormat::Cs16, 64);
        let writer = IqWriter::new(Vec::new(), SampleFormat::Cs16);
        let resampler = Resampler::new(ResamplerConfig::default()).unwrap();

        let counters = Arc::new(PipelineCounters::default());
        let (_stop_tx, stop_rx) = watch::channel(false);
        let stats = run(reader, writer, resampler, &PipelineConfig::default(), counters, stop_rx)
            .await
            .unwrap();
        assert_eq!(stats.samples_in, 100);
        assert_eq!(stats.samples_out, 100);
        assert_eq!(stats.bytes_discarded, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_drains_and_flushes_open_input() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Input that never reaches EOF, output behind a buffer larger than the whole result
        let (mut input_tx, input_rx) = tokio::io::duplex(64 * 1024);
        let (output_tx, mut output_rx) = tokio::io::duplex(64 * 1024);
        input_tx.write_all(&cs16_tone(1_000)).await.unwrap();

        let reader = IqReader::new(input_rx, SampleFormat::Cs16, 250);
        let writer = IqWriter::new(tokio::io::BufWriter::new(output_tx), SampleFormat::Cf32);
        let resampler = Resampler::new(ResamplerConfig::default()).unwrap();

        let counters = Arc::new(PipelineCounters::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let config = PipelineConfig::default();
        let task = {
            let counters = counters.clone();
            tokio::spawn(async move { run(reader, writer, resampler, &config, counters, stop_rx).await })
        };

        tokio::time::timeout(Duration::from_secs(10), async {
            while counters.snapshot().blocks_out < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        stop_tx.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats.samples_in, 1_000);
        assert_eq!(stats.samples_out, 1_000);

        let mut bytes = Vec::new();
        output_rx.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes.len(), 1_000 * SampleFormat::Cf32.width());
        drop(input_tx);
    }
}
