//! Extraction and normalization of embedded subtitle tracks.
//!
//! A [`pipeline::SubtitlePipeline`] probes a video container, transcodes each
//! subtitle track to SRT, detects and decodes its byte encoding, classifies
//! the language of the text and stores one record per track.

pub mod config;
pub mod decode;
pub mod encoding;
pub mod error;
pub mod language;
pub mod pipeline;
pub mod srt;
pub mod staging;
pub mod store;
pub mod track;
pub mod video;

pub use config::PipelineConfig;
pub use error::{DecodeError, ExtractionError, ProbeError, StoreError, TranscodeError};
pub use pipeline::{RunReport, SubtitlePipeline, TrackOutcome};
pub use store::{MemoryRecordStore, RecordStore, SqliteRecordStore, SubtitleRecord};
pub use video::{FfmpegTools, TrackDescriptor, Video};
