//! Video container access: probing for subtitle tracks and transcoding
//! single tracks to SRT through ffprobe and ffmpeg.

use crate::config::PipelineConfig;
use crate::error::{ProbeError, TranscodeError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

/// ffmpeg's complaint when an optional `-map` selects nothing.
const NO_STREAM_MARKER: &str = "does not contain any stream";

/// An uploaded video as seen by the extraction pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub id: String,
    pub path: PathBuf,
}

impl Video {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// One subtitle track reported by the prober.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDescriptor {
    /// Zero-based position among the container's subtitle streams.
    pub index: usize,
    /// Raw language tag from the container, case untouched.
    pub declared_language: Option<String>,
}

impl TrackDescriptor {
    pub fn new(index: usize, declared_language: Option<&str>) -> Self {
        Self {
            index,
            declared_language: declared_language.map(str::to_string),
        }
    }
}

/// Result of asking the transcoder for one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeOutcome {
    /// The tool ran and wrote to the requested output path.
    Written,
    /// The container has no track at the requested index.
    MissingTrack,
}

/// Enumerates the subtitle tracks of a media file.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<Vec<TrackDescriptor>, ProbeError>;
}

/// Converts one subtitle track to SRT at `output`.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        path: &Path,
        track_index: usize,
        output: &Path,
    ) -> Result<TranscodeOutcome, TranscodeError>;
}

/// Subtitle stream entry in ffprobe's JSON output.
#[derive(Debug, Deserialize)]
struct Stream {
    index: Option<u32>,
    #[serde(default)]
    tags: Tags,
}

/// ffprobe omits the tags object when a stream has none.
#[derive(Debug, Default, Deserialize)]
struct Tags {
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Streams {
    #[serde(default)]
    streams: Vec<Stream>,
}

/// Turn ffprobe's JSON into track descriptors.
///
/// Tracks are numbered by their position in the subtitle-only listing, which
/// is what ffmpeg's `0:s:N` selector expects.
pub fn parse_probe_output(json: &[u8]) -> Result<Vec<TrackDescriptor>, ProbeError> {
    let data: Streams = serde_json::from_slice(json)?;
    Ok(data
        .streams
        .into_iter()
        .enumerate()
        .map(|(i, stream)| {
            trace!("subtitle track {i} is container stream {:?}", stream.index);
            TrackDescriptor {
                index: i,
                declared_language: stream.tags.language.filter(|l| !l.trim().is_empty()),
            }
        })
        .collect())
}

/// Build the ffprobe arguments listing subtitle streams with their language.
pub fn ffprobe_args(input: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-select_streams".to_string(),
        "s".to_string(),
        "-show_entries".to_string(),
        "stream=index:stream_tags=language".to_string(),
        "-of".to_string(),
        "json".to_string(),
        input.display().to_string(),
    ]
}

/// Build the ffmpeg arguments converting subtitle track `track_index` to SRT.
/// The `?` on the map lets ffmpeg skip a track that has gone missing.
pub fn ffmpeg_extract_args(input: &Path, track_index: usize, output: &Path) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-map".to_string(),
        format!("0:s:{}?", track_index),
        "-c:s".to_string(),
        "srt".to_string(),
        output.display().to_string(),
    ]
}

/// Prober and transcoder backed by the ffprobe and ffmpeg binaries.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegTools {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.ffmpeg, &config.ffprobe)
    }
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

/// Spawn `program` and collect its output. The child is killed if the
/// returned future is dropped, which is how timeouts cancel it.
async fn run_tool(program: &Path, args: &[String]) -> std::io::Result<Output> {
    trace!("run_tool {} {}", program.display(), args.join(" "));
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .unwrap_or(program.as_os_str())
        .to_string_lossy()
        .to_string()
}

#[async_trait]
impl Prober for FfmpegTools {
    async fn probe(&self, path: &Path) -> Result<Vec<TrackDescriptor>, ProbeError> {
        trace!("probe(path={}): listing subtitle streams", path.display());
        let tool = tool_name(&self.ffprobe);
        let output = run_tool(&self.ffprobe, &ffprobe_args(path))
            .await
            .map_err(|e| ProbeError::Tool {
                tool: tool.clone(),
                message: format!("failed to spawn: {e}"),
            })?;
        if !output.status.success() {
            return Err(ProbeError::Tool {
                tool,
                message: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let tracks = parse_probe_output(&output.stdout)?;
        debug!("{} subtitle tracks in {}", tracks.len(), path.display());
        Ok(tracks)
    }
}

#[async_trait]
impl Transcoder for FfmpegTools {
    async fn transcode(
        &self,
        path: &Path,
        track_index: usize,
        output: &Path,
    ) -> Result<TranscodeOutcome, TranscodeError> {
        let tool = tool_name(&self.ffmpeg);
        let args = ffmpeg_extract_args(path, track_index, output);
        let result = run_tool(&self.ffmpeg, &args)
            .await
            .map_err(|e| TranscodeError::Tool {
                tool: tool.clone(),
                message: format!("failed to spawn: {e}"),
            })?;
        let stderr = String::from_utf8_lossy(&result.stderr);
        if stderr.contains(NO_STREAM_MARKER) {
            return Ok(TranscodeOutcome::MissingTrack);
        }
        if !result.status.success() {
            return Err(TranscodeError::Tool {
                tool,
                message: format!("exited with {}: {}", result.status, stderr.trim()),
            });
        }
        Ok(TranscodeOutcome::Written)
    }
}

/// Run `fut` under `limit`, mapping expiry with `on_timeout`.
pub(crate) async fn with_timeout<T, E>(
    limit: Duration,
    fut: impl std::future::Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_elapsed) => Err(on_timeout(limit)),
    }
}
