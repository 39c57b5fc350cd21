//! SRT reading for classification.
//! ffmpeg writes every extracted track as SubRip, so the dialogue can be
//! separated from cue numbers and timing before the language is guessed.

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Inline markup: HTML-ish tags (`<i>`, `<font ...>`) and ASS overrides (`{\an8}`).
static MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>|\{\\[^}]*\}").expect("invalid markup regex"));

/// Text lines of a single SRT cue.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub lines: Vec<String>,
}

/// Parse SRT text into cues, preserving order.
/// Accepts CRLF line endings and a leading BOM.
pub fn parse(input: &str) -> Result<Vec<Cue>> {
    let input = input.trim_start_matches('\u{feff}');
    let mut cues = Vec::new();
    let mut lines = input.lines().map(|l| l.trim_end_matches('\r'));
    loop {
        let index_line = match lines.next() {
            Some(l) if !l.trim().is_empty() => l.trim(),
            Some(_) => continue,
            None => break,
        };
        if !is_number(index_line) {
            return Err(anyhow!("bad cue number {index_line:?}"));
        }
        let time_line = lines
            .next()
            .ok_or_else(|| anyhow!("cue {index_line}: missing time"))?;
        check_times(time_line)?;
        let mut text = Vec::new();
        for line in lines.by_ref() {
            if line.trim().is_empty() {
                break;
            }
            text.push(line.to_string());
        }
        cues.push(Cue { lines: text });
    }
    Ok(cues)
}

/// Dialogue only: markup removed, one cue line per output line.
///
/// Input that is not well-formed SRT is filtered line by line instead,
/// dropping numeric lines and anything containing a `-->` timing arrow.
pub fn dialogue(input: &str) -> String {
    let raw: Vec<String> = match parse(input) {
        Ok(cues) => cues.into_iter().flat_map(|c| c.lines).collect(),
        Err(_) => input
            .lines()
            .map(str::trim)
            .filter(|l| !l.contains("-->") && l.parse::<u32>().is_err())
            .map(str::to_string)
            .collect(),
    };
    raw.iter()
        .map(|l| MARKUP.replace_all(l, "").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Check a time range like `00:00:01,000 --> 00:00:02,000`.
/// Only the shape matters; the timestamps themselves are never used.
fn check_times(line: &str) -> Result<()> {
    let (start, end) = line
        .split_once("-->")
        .ok_or_else(|| anyhow!("no time range in {line:?}"))?;
    // Players allow position hints after the end time.
    let end = end.split_whitespace().next().unwrap_or("");
    check_time(start.trim())?;
    check_time(end)
}

/// `HH:MM:SS,mmm` or `HH:MM:SS.mmm`, any number of digits per field.
fn check_time(t: &str) -> Result<()> {
    let parts: Vec<&str> = t.split([':', ',', '.']).collect();
    if parts.len() != 4 || !parts.iter().all(|p| is_number(p)) {
        return Err(anyhow!("bad time {t:?}"));
    }
    Ok(())
}
