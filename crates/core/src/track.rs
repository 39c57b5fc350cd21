//! Extraction of a single subtitle track: transcode, check, detect, decode.

use crate::decode::{DecodedText, TextDecoder};
use crate::encoding::EncodingDetector;
use crate::error::{ExtractionError, TranscodeError};
use crate::staging::StagingArea;
use crate::video::{with_timeout, TrackDescriptor, TranscodeOutcome, Transcoder, Video};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Raw transcoder output for one track.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub track_index: usize,
    pub raw_bytes: Vec<u8>,
    pub is_empty: bool,
}

/// Why a track produced nothing, without anything having gone wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The container no longer has the track.
    MissingTrack,
    /// The transcoder wrote no file.
    NoOutput,
    /// The transcoder wrote an empty file.
    EmptyOutput,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::MissingTrack => "track missing from container",
            SkipReason::NoOutput => "transcoder wrote no output",
            SkipReason::EmptyOutput => "transcoder output is empty",
        };
        f.write_str(text)
    }
}

/// Successful extraction or a skip.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Decoded(DecodedText),
    Skip(SkipReason),
}

/// Runs one track through the transcoder, the encoding detector and the decoder.
pub struct TrackExtractor<'a, T: ?Sized> {
    transcoder: &'a T,
    staging: &'a StagingArea,
    timeout: Duration,
    detector: EncodingDetector,
    decoder: TextDecoder,
}

impl<'a, T: Transcoder + ?Sized> TrackExtractor<'a, T> {
    pub fn new(transcoder: &'a T, staging: &'a StagingArea, timeout: Duration) -> Self {
        Self {
            transcoder,
            staging,
            timeout,
            detector: EncodingDetector::new(),
            decoder: TextDecoder::new(),
        }
    }

    /// Extract `track` of `video` to decoded text.
    ///
    /// A missing track or empty output is a [`Extracted::Skip`]; tool
    /// failures, timeouts and undecodable bytes are errors for this track only.
    pub async fn extract(
        &self,
        video: &Video,
        track: &TrackDescriptor,
    ) -> Result<Extracted, ExtractionError> {
        let result = match self.stage(video, track).await? {
            Ok(result) => result,
            Err(reason) => {
                info!(video_id = %video.id, track = track.index, "skipping track: {reason}");
                return Ok(Extracted::Skip(reason));
            }
        };
        if result.is_empty {
            let reason = SkipReason::EmptyOutput;
            info!(video_id = %video.id, track = track.index, "skipping track: {reason}");
            return Ok(Extracted::Skip(reason));
        }
        let detection = self.detector.detect(&result.raw_bytes);
        debug!(
            track = track.index,
            "detected {} (confidence {:.2})", detection.encoding, detection.confidence
        );
        let (text, encoding_used) = self.decoder.decode(&result.raw_bytes, &detection.encoding)?;
        Ok(Extracted::Decoded(DecodedText {
            track_index: track.index,
            text,
            encoding_used,
        }))
    }

    /// Transcode into the staging area and read the artifact back.
    async fn stage(
        &self,
        video: &Video,
        track: &TrackDescriptor,
    ) -> Result<Result<ExtractionResult, SkipReason>, ExtractionError> {
        let output = self.artifact_path(video, track);
        trace!(
            "stage(track={}): transcoding to {}",
            track.index,
            output.display()
        );
        // A file left by an earlier run must not pass for this run's output.
        match tokio::fs::remove_file(&output).await {
            Ok(()) => debug!("removed stale artifact {}", output.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(ExtractionError::Staging { path: output, source }),
        }
        let outcome = with_timeout(
            self.timeout,
            self.transcoder.transcode(&video.path, track.index, &output),
            TranscodeError::Timeout,
        )
        .await?;
        if outcome == TranscodeOutcome::MissingTrack {
            return Ok(Err(SkipReason::MissingTrack));
        }
        let raw_bytes = match tokio::fs::read(&output).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Err(SkipReason::NoOutput));
            }
            Err(source) => return Err(ExtractionError::Staging { path: output, source }),
        };
        Ok(Ok(ExtractionResult {
            track_index: track.index,
            is_empty: raw_bytes.is_empty(),
            raw_bytes,
        }))
    }

    fn artifact_path(&self, video: &Video, track: &TrackDescriptor) -> PathBuf {
        self.staging
            .track_path(&video.id, track.index, track.declared_language.as_deref())
    }
}
