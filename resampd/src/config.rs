//! Resampler Daemon Configuration
//!
//! TOML or YAML file layout for the streaming resampler. Every section is
//! optional; command-line flags override file values.

use anyhow::{anyhow, Context};
use dsp::{ResamplerConfig, MAX_RATE, MIN_RATE};
use interfaces::iq_stream::DEFAULT_BLOCK_LEN;
use interfaces::SampleFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResampdConfig {
    /// Sample stream endpoints and rates
    #[serde(default)]
    pub stream: StreamConfig,
    /// Filter design and kernel selection
    #[serde(default)]
    pub resampler: ResamplerConfig,
    /// Worker queue settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Stream configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Input path, `-` for stdin
    #[serde(default = "default_endpoint")]
    pub input: String,
    /// Output path, `-` for stdout
    #[serde(default = "default_endpoint")]
    pub output: String,
    #[serde(default = "default_input_format")]
    pub input_format: SampleFormat,
    #[serde(default = "default_output_format")]
    pub output_format: SampleFormat,
    /// Input sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub input_rate: f64,
    /// Output sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub output_rate: f64,
    /// Input clock error in parts per million
    #[serde(default)]
    pub ppm: f64,
    /// Samples per input block
    #[serde(default = "default_block_len")]
    pub block_len: usize,
}

fn default_endpoint() -> String {
    "-".to_string()
}

fn default_input_format() -> SampleFormat {
    SampleFormat::Cs16
}

fn default_output_format() -> SampleFormat {
    SampleFormat::Cf32
}

fn default_sample_rate() -> f64 {
    1_488_375.0
}

fn default_block_len() -> usize {
    DEFAULT_BLOCK_LEN
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            input: default_endpoint(),
            output: default_endpoint(),
            input_format: default_input_format(),
            output_format: default_output_format(),
            input_rate: default_sample_rate(),
            output_rate: default_sample_rate(),
            ppm: 0.0,
            block_len: default_block_len(),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Output blocks buffered between the worker and the writer
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// How long the worker waits on a full output queue before dropping a block
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    /// Statistics reporting interval, 0 disables
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_queue_depth() -> usize {
    32
}

fn default_queue_timeout_ms() -> u64 {
    100
}

fn default_stats_interval_secs() -> u64 {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            queue_timeout_ms: default_queue_timeout_ms(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl ResampdConfig {
    /// Load configuration, choosing YAML for `.yml`/`.yaml` files and TOML otherwise
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Self::from_yaml_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
        .with_context(|| format!("parsing configuration file {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Resampling rate including the clock correction
    pub fn rate(&self) -> f64 {
        self.stream.output_rate / self.stream.input_rate * (1.0 + self.stream.ppm * 1e-6)
    }

    /// Check values the resampler and pipeline cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        let s = &self.stream;
        if !(s.input_rate.is_finite() && s.input_rate > 0.0) {
            return Err(anyhow!("Invalid input rate: {} Hz", s.input_rate));
        }
        if !(s.output_rate.is_finite() && s.output_rate > 0.0) {
            return Err(anyhow!("Invalid output rate: {} Hz", s.output_rate));
        }
        if !s.ppm.is_finite() || s.ppm.abs() >= 1e6 {
            return Err(anyhow!("Invalid clock correction: {} ppm", s.ppm));
        }
        let rate = self.rate();
        if !(MIN_RATE..=MAX_RATE).contains(&rate) {
            return Err(anyhow!(
                "Rate ratio {} out of range [{}, {}]",
                rate, MIN_RATE, MAX_RATE
            ));
        }
        if s.block_len == 0 {
            return Err(anyhow!("Block length must be at least 1 sample"));
        }
        if self.pipeline.queue_depth == 0 {
            return Err(anyhow!("Queue depth must be at least 1 block"));
        }
        self.resampler.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsp::Kernel;

    #[test]
    fn test_defaults() {
        let config = ResampdConfig::default();
        assert_eq!(config.stream.input, "-");
        assert_eq!(config.stream.input_format, SampleFormat::Cs16);
        assert_eq!(config.stream.output_format, SampleFormat::Cf32);
        assert_eq!(config.rate(), 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ResampdConfig::from_toml_str("").unwrap();
        assert_eq!(config.pipeline.queue_depth, 32);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_parse_toml() {
        let config = ResampdConfig::from_toml_str(
            r#"
            [stream]
            input = "capture.cs16"
            input_rate = 2000000.0
            output_rate = 1488375.0
            ppm = -12.5

            [resampler]
            num_phases = 64
            kernel = "scalar"

            [pipeline]
            queue_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.stream.input, "capture.cs16");
        assert_eq!(config.stream.output, "-");
        assert_eq!(config.resampler.num_phases, 64);
        assert_eq!(config.resampler.kernel, Some(Kernel::Scalar));
        assert_eq!(config.resampler.cutoff, ResamplerConfig::default().cutoff);
        assert_eq!(config.pipeline.queue_timeout_ms, 250);

        let expected = 1488375.0 / 2000000.0 * (1.0 - 12.5e-6);
        assert!((config.rate() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_parse_yaml() {
        let config = ResampdConfig::from_yaml_str(
            "stream:\n  output: out.cf32\n  output_format: cs16\n  block_len: 1024\nlog:\n  level: debug\n",
        )
        .unwrap();
        assert_eq!(config.stream.output, "out.cf32");
        assert_eq!(config.stream.output_format, SampleFormat::Cs16);
        assert_eq!(config.stream.block_len, 1024);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ResampdConfig::default();
        config.stream.input_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = ResampdConfig::default();
        config.stream.output_rate = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = ResampdConfig::default();
        config.pipeline.queue_depth = 0;
        assert!(config.validate().is_err());

        let mut config = ResampdConfig::default();
        config.stream.input_rate = 1.0;
        config.stream.output_rate = 1e6;
        assert!(config.validate().is_err());

        let mut config = ResampdConfig::default();
        config.resampler.cutoff = 0.7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(ResampdConfig::from_toml_str("[stream]\ninput_format = \"u8\"\n").is_err());
    }
}
