//! Staging directory holding the intermediate SRT file of each track.

use std::path::{Path, PathBuf};

/// Deterministic artifact naming under one staging directory.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if needed.
    pub async fn ensure(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// `<video_id>_sub_<index>_<language>.srt`, with `sub_<index>` standing
    /// in for an undeclared language.
    pub fn track_path(&self, video_id: &str, track_index: usize, language: Option<&str>) -> PathBuf {
        let language = language
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("sub_{track_index}"));
        self.dir.join(format!(
            "{}_sub_{}_{}.srt",
            sanitize(video_id),
            track_index,
            sanitize(&language)
        ))
    }
}

/// Keep file names flat and portable.
///
/// Bytes outside `[A-Za-z0-9_-.]`, a leading `.` and the escape character
/// itself become `~xx` hex escapes, so distinct inputs never share a name.
fn sanitize(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for (i, b) in part.bytes().enumerate() {
        let keep = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_') || (b == b'.' && i > 0);
        if keep {
            out.push(b as char);
        } else {
            out.push_str(&format!("~{b:02x}"));
        }
    }
    out
}
