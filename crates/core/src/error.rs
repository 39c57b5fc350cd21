//! Error types for the extraction pipeline.
//!
//! Every error here is scoped either to a single track or, for
//! [`ProbeError`], to a whole video run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Container probing failed. This is the only error that aborts a video run.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("unreadable probe output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The external transcoder failed for reasons other than a missing track.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("transcode timed out after {0:?}")]
    Timeout(Duration),
}

/// Neither the detected encoding nor the UTF-8 retry produced valid text.
#[derive(Debug, Error)]
#[error("bytes are not valid {encoding} and not valid utf-8")]
pub struct DecodeError {
    pub encoding: String,
}

/// Failure while extracting a single track.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("staging file {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Persisting a finished record failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
