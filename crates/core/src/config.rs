//! Pipeline configuration loaded from TOML with per-field defaults.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::trace;

/// Default number of tracks transcoded at the same time.
pub const DEFAULT_MAX_CONCURRENT_TRANSCODES: usize = 3;

/// Settings for a [`crate::pipeline::SubtitlePipeline`] and its ffmpeg tools.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Path or name of the ffmpeg binary.
    pub ffmpeg: PathBuf,
    /// Path or name of the ffprobe binary.
    pub ffprobe: PathBuf,
    /// Directory receiving the per-track intermediate subtitle files.
    pub staging_dir: PathBuf,
    pub max_concurrent_transcodes: usize,
    pub probe_timeout_secs: u64,
    pub track_timeout_secs: u64,
    pub classifier: ClassifierConfig,
}

/// Thresholds below which the classifier answers `unknown`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Minimum detector confidence in `0.0..=1.0`.
    pub min_confidence: f64,
    /// Minimum number of dialogue characters worth classifying.
    pub min_chars: usize,
    /// Reject results the detector itself flags as unreliable.
    pub require_reliable: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            staging_dir: PathBuf::from("subtitles"),
            max_concurrent_transcodes: DEFAULT_MAX_CONCURRENT_TRANSCODES,
            probe_timeout_secs: 30,
            track_timeout_secs: 120,
            classifier: ClassifierConfig::default(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            min_chars: 20,
            require_reliable: true,
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        trace!("load config path={}", path.display());
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Worker pool size, never zero.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_transcodes.max(1)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn track_timeout(&self) -> Duration {
        Duration::from_secs(self.track_timeout_secs)
    }
}
