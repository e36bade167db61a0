//! Streaming IQ Resampler
//!
//! Reads a raw complex sample stream, converts it to a new sample rate with
//! the fixed-point polyphase resampler, and writes the result.

mod config;
mod pipeline;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::ResampdConfig;
use dsp::{Kernel, Resampler, SimdCaps};
use interfaces::{IqReader, IqWriter, SampleFormat, StreamStats};
use pipeline::PipelineCounters;

/// Fixed-point polyphase IQ resampler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, or YAML with a .yml/.yaml extension)
    #[arg(short, long)]
    config: Option<String>,

    /// Input path, "-" for stdin
    #[arg(short, long)]
    input: Option<String>,

    /// Output path, "-" for stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Input sample format (cs16, cf32)
    #[arg(long)]
    input_format: Option<SampleFormat>,

    /// Output sample format (cs16, cf32)
    #[arg(long)]
    output_format: Option<SampleFormat>,

    /// Input sample rate in Hz
    #[arg(long)]
    input_rate: Option<f64>,

    /// Output sample rate in Hz
    #[arg(long)]
    output_rate: Option<f64>,

    /// Input clock error in ppm
    #[arg(long, allow_hyphen_values = true)]
    ppm: Option<f64>,

    /// Convolution kernel (neon, sse2, scalar); best available when omitted
    #[arg(long)]
    kernel: Option<Kernel>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut ResampdConfig) {
        let stream = &mut config.stream;
        if let Some(input) = &self.input {
            stream.input = input.clone();
        }
        if let Some(output) = &self.output {
            stream.output = output.clone();
        }
        if let Some(format) = self.input_format {
            stream.input_format = format;
        }
        if let Some(format) = self.output_format {
            stream.output_format = format;
        }
        if let Some(rate) = self.input_rate {
            stream.input_rate = rate;
        }
        if let Some(rate) = self.output_rate {
            stream.output_rate = rate;
        }
        if let Some(ppm) = self.ppm {
            stream.ppm = ppm;
        }
        if let Some(kernel) = self.kernel {
            config.resampler.kernel = Some(kernel);
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
    }
}

async fn open_input(path: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if path == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening input {}", path))?;
    Ok(Box::new(file))
}

async fn open_output(path: &str) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
    if path == "-" {
        return Ok(Box::new(tokio::io::stdout()));
    }
    let file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("creating output {}", path))?;
    Ok(Box::new(tokio::io::BufWriter::new(file)))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(args));

    // A stdin read still parked on a blocking thread must not hold up exit
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

/// Time allowed for queued output to drain after Ctrl-C
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for blocking I/O threads once the pipeline has finished
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

fn report(outcome: std::result::Result<Result<StreamStats>, JoinError>) -> Result<()> {
    match outcome {
        Ok(Ok(stats)) => {
            info!(
                "Pipeline finished: {} samples in, {} samples out, {} blocks dropped",
                stats.samples_in, stats.samples_out, stats.blocks_dropped
            );
            if stats.bytes_discarded > 0 {
                warn!("{} trailing input bytes did not form a whole sample", stats.bytes_discarded);
            }
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Pipeline error: {:#}", e);
            Err(e)
        }
        Err(e) => Err(anyhow!("Pipeline task failed: {}", e)),
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ResampdConfig::from_file(path)?,
        None => ResampdConfig::default(),
    };
    args.apply(&mut config);

    // Initialize logging; samples may go to stdout so logs go to stderr
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting resampd");
    if let Some(path) = &args.config {
        info!("Configuration file: {}", path);
    }
    config.validate()?;

    let stream = &config.stream;
    let rate = config.rate();
    info!("Stream configuration:");
    info!("  Input: {} ({})", stream.input, stream.input_format);
    info!("  Output: {} ({})", stream.output, stream.output_format);
    info!(
        "  Rate: {} Hz -> {} Hz, {} ppm, ratio {:.9}",
        stream.input_rate, stream.output_rate, stream.ppm, rate
    );
    info!("  Host SIMD capabilities: {:?}", SimdCaps::host());

    let mut resampler = Resampler::new(config.resampler.clone())?;
    resampler.set_rate(rate)?;
    info!(
        "Resampler ready: {} kernel, group delay {} input samples",
        resampler.kernel(),
        resampler.group_delay()
    );

    let reader = IqReader::new(open_input(&stream.input).await?, stream.input_format, stream.block_len);
    let writer = IqWriter::new(open_output(&stream.output).await?, stream.output_format);

    let counters = Arc::new(PipelineCounters::default());
    let pipeline_config = config.pipeline.clone();
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut pipeline_handle = {
        let counters = counters.clone();
        tokio::spawn(async move {
            pipeline::run(reader, writer, resampler, &pipeline_config, counters, stop_rx).await
        })
    };

    // Start statistics reporting
    let stats_handle = (config.pipeline.stats_interval_secs > 0).then(|| {
        let counters = counters.clone();
        let period = Duration::from_secs(config.pipeline.stats_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let stats = counters.snapshot();
                info!(
                    "Pipeline: {} samples in, {} samples out, {} blocks, {} dropped",
                    stats.samples_in, stats.samples_out, stats.blocks_in, stats.blocks_dropped
                );
            }
        })
    });

    // Wait for end of input or shutdown signal
    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, draining queued output");
            let _ = stop_tx.send(true);
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut pipeline_handle).await {
                Ok(outcome) => report(outcome),
                Err(_) => {
                    warn!("Output did not drain within {:?}, abandoning it", DRAIN_TIMEOUT);
                    pipeline_handle.abort();
                    Ok(())
                }
            }
        }
        outcome = &mut pipeline_handle => report(outcome),
    };

    if let Some(handle) = stats_handle {
        handle.abort();
    }

    info!("resampd shutdown complete");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "resampd",
            "--input",
            "in.cs16",
            "--output-rate",
            "48000",
            "--ppm",
            "-3.5",
            "--kernel",
            "scalar",
            "--output-format",
            "cs16",
        ]);
        let mut config = ResampdConfig::default();
        args.apply(&mut config);

        assert_eq!(config.stream.input, "in.cs16");
        assert_eq!(config.stream.output, "-");
        assert_eq!(config.stream.output_rate, 48000.0);
        assert_eq!(config.stream.ppm, -3.5);
        assert_eq!(config.stream.output_format, SampleFormat::Cs16);
        assert_eq!(config.resampler.kernel, Some(Kernel::Scalar));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_cli_rejects_unknown_kernel() {
        assert!(Args::try_parse_from(["resampd", "--kernel", "avx9"]).is_err());
    }
}
