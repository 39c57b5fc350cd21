//! Byte encoding detection for raw subtitle output.

use encoding_rs::{Encoding, UTF_8};
use tracing::trace;

/// Encoding name returned when nothing better can be determined.
pub const FALLBACK_ENCODING: &str = "utf-8";

/// Best-effort guess produced by [`EncodingDetector::detect`].
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Lowercase WHATWG encoding name, e.g. `utf-8` or `windows-1251`.
    pub encoding: String,
    /// Advisory only; never used to reject a guess.
    pub confidence: f32,
}

impl Detection {
    fn new(encoding: &'static Encoding, confidence: f32) -> Self {
        Self {
            encoding: encoding.name().to_ascii_lowercase(),
            confidence,
        }
    }

    fn fallback() -> Self {
        Self {
            encoding: FALLBACK_ENCODING.to_string(),
            confidence: 0.0,
        }
    }
}

/// Guesses the encoding of subtitle bytes.
///
/// A byte order mark wins outright, valid UTF-8 (including plain ASCII) is
/// reported as `utf-8`, and anything else is handed to `chardetng`'s
/// statistical detector. The detector never fails: an empty buffer yields the
/// fallback name.
#[derive(Debug, Default, Clone, Copy)]
pub struct EncodingDetector;

impl EncodingDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, bytes: &[u8]) -> Detection {
        trace!("detect len={}", bytes.len());
        if bytes.is_empty() {
            return Detection::fallback();
        }
        if let Some((encoding, _)) = Encoding::for_bom(bytes) {
            return Detection::new(encoding, 1.0);
        }
        if std::str::from_utf8(bytes).is_ok() {
            return Detection::new(UTF_8, 1.0);
        }
        let mut detector = chardetng::EncodingDetector::new();
        detector.feed(bytes, true);
        Detection::new(detector.guess(None, true), 0.5)
    }
}
