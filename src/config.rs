use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub view: ViewConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// Worker threads for the parallel stages, 0 = available parallelism
    #[serde(default)]
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
    /// Bytes that must be read before a load ETA is shown
    #[serde(default = "default_min_eta_bytes")]
    pub min_eta_bytes: u64,
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Probe the container and decode with symphonia
    Auto,
    /// Headerless signed 16-bit little-endian PCM
    Raw,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_format")]
    pub format: InputFormat,
    #[serde(default = "default_raw_sample_rate")]
    pub raw_sample_rate: u32,
    #[serde(default = "default_raw_channels")]
    pub raw_channels: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_view_width")]
    pub width: u16,
    #[serde(default = "default_view_height")]
    pub height: u16,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            hop_size: default_hop_size(),
            fft_size: default_fft_size(),
            workers: 0,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> AnalysisResult<()> {
        if self.window_size == 0 || self.hop_size == 0 {
            return Err(AnalysisError::InvalidParameters(format!(
                "window_size ({}) and hop_size ({}) must be non-zero",
                self.window_size, self.hop_size
            )));
        }
        if self.fft_size < self.window_size {
            return Err(AnalysisError::InvalidParameters(format!(
                "fft_size ({}) must be at least window_size ({})",
                self.fft_size, self.window_size
            )));
        }
        if self.fft_size < 4 {
            return Err(AnalysisError::InvalidParameters(format!(
                "fft_size ({}) is too small",
                self.fft_size
            )));
        }
        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
            read_chunk_bytes: default_read_chunk_bytes(),
            min_eta_bytes: default_min_eta_bytes(),
            status_interval_ms: default_status_interval_ms(),
        }
    }
}

impl LoaderConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            raw_sample_rate: default_raw_sample_rate(),
            raw_channels: default_raw_channels(),
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            width: default_view_width(),
            height: default_view_height(),
        }
    }
}

fn default_window_size() -> usize { 2048 }
fn default_hop_size() -> usize { 512 }
fn default_fft_size() -> usize { 2048 }
fn default_http_timeout_secs() -> u64 { 30 }
fn default_read_chunk_bytes() -> usize { 64 * 1024 }
fn default_min_eta_bytes() -> u64 { 512 * 1024 }
fn default_status_interval_ms() -> u64 { 100 }
fn default_format() -> InputFormat { InputFormat::Auto }
fn default_raw_sample_rate() -> u32 { 44_100 }
fn default_raw_channels() -> usize { 1 }
fn default_view_width() -> u16 { 80 }
fn default_view_height() -> u16 { 24 }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            log::warn!("Ignoring malformed config {}: {}", path.display(), err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.analysis, AnalysisConfig::default());
        assert_eq!(config.analysis.window_size, 2048);
        assert_eq!(config.analysis.hop_size, 512);
        assert_eq!(config.loader.min_eta_bytes, 512 * 1024);
        assert_eq!(config.input.format, InputFormat::Auto);
        assert_eq!(config.view.width, 80);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [analysis]
            hop_size = 256

            [input]
            format = "raw"
            raw_channels = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.analysis.hop_size, 256);
        assert_eq!(config.analysis.fft_size, 2048);
        assert_eq!(config.input.format, InputFormat::Raw);
        assert_eq!(config.input.raw_channels, 2);
        assert_eq!(config.input.raw_sample_rate, 44_100);
    }

    #[test]
    fn validate_rejects_short_fft() {
        let config = AnalysisConfig {
            fft_size: 1024,
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::InvalidParameters(_))
        ));
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wavetrace.toml");
        std::fs::write(&path, "[loader]\nstatus_interval_ms = 250\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.loader.status_interval(), Duration::from_millis(250));
        assert!(load_config(&dir.path().join("missing.toml")).is_none());
    }
}
