//! Language identification and code normalization.

use crate::config::ClassifierConfig;
use crate::srt;
use isolang::Language;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Sentinel for text whose language could not be determined.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Container tag meaning "undetermined"; treated as no declaration.
const UNDETERMINED_TAG: &str = "und";

/// Detector output codes mapped to the canonical codes stored in records.
///
/// Covers the two-letter ISO 639-1 codes of common subtitle languages and the
/// detector's own three-letter codes that differ from ISO 639-2/T.
static LANGUAGE_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("en", "eng"),
        ("de", "deu"),
        ("fr", "fra"),
        ("es", "spa"),
        ("it", "ita"),
        ("pt", "por"),
        ("nl", "nld"),
        ("sv", "swe"),
        ("da", "dan"),
        ("no", "nor"),
        ("nb", "nor"),
        ("fi", "fin"),
        ("pl", "pol"),
        ("cs", "ces"),
        ("sk", "slk"),
        ("hu", "hun"),
        ("ro", "ron"),
        ("el", "ell"),
        ("tr", "tur"),
        ("ru", "rus"),
        ("uk", "ukr"),
        ("bg", "bul"),
        ("hr", "hrv"),
        ("sr", "srp"),
        ("ar", "ara"),
        ("he", "heb"),
        ("fa", "fas"),
        ("hi", "hin"),
        ("th", "tha"),
        ("vi", "vie"),
        ("id", "ind"),
        ("ja", "jpn"),
        ("ko", "kor"),
        ("zh", "zho"),
        ("zh-cn", "zho"),
        ("zh-tw", "zho"),
        ("cmn", "zho"),
        ("pes", "fas"),
        ("nob", "nor"),
    ])
});

/// ISO 639-2/B tags found in container metadata and their 639-2/T forms.
static BIBLIOGRAPHIC_CODES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("fre", "fra"),
        ("ger", "deu"),
        ("dut", "nld"),
        ("gre", "ell"),
        ("chi", "zho"),
        ("cze", "ces"),
        ("ice", "isl"),
        ("alb", "sqi"),
        ("arm", "hye"),
        ("baq", "eus"),
        ("bur", "mya"),
        ("per", "fas"),
        ("geo", "kat"),
        ("may", "msa"),
        ("mac", "mkd"),
        ("rum", "ron"),
        ("slo", "slk"),
        ("wel", "cym"),
    ])
});

/// Map a raw detector code through [`LANGUAGE_MAP`]; unmapped codes pass through.
pub fn canonical_code(raw: &str) -> String {
    LANGUAGE_MAP
        .get(raw)
        .map(|c| c.to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Normalize a tag declared by the container.
///
/// Returns `None` for empty or `und` tags. Known two-letter and
/// bibliographic codes become ISO 639-2/T; anything else is lowercased.
pub fn canonical_declared(tag: &str) -> Option<String> {
    let tag = tag.trim().to_lowercase();
    if tag.is_empty() || tag == UNDETERMINED_TAG {
        return None;
    }
    if let Some(code) = LANGUAGE_MAP.get(tag.as_str()) {
        return Some(code.to_string());
    }
    if let Some(code) = BIBLIOGRAPHIC_CODES.get(tag.as_str()) {
        return Some(code.to_string());
    }
    if tag.len() == 2 {
        if let Some(lang) = Language::from_639_1(&tag) {
            return Some(lang.to_639_3().to_string());
        }
    }
    Some(tag)
}

/// Whether a declared tag and a classified code name the same language.
pub fn languages_match(declared: &str, classified: &str) -> bool {
    match (canonical_declared(declared), canonical_declared(classified)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Whether a tag names a real ISO 639 language.
pub fn is_known_language(code: &str) -> bool {
    canonical_declared(code)
        .map(|c| Language::from_639_3(&c).is_some())
        .unwrap_or(false)
}

/// Determines the natural language of decoded subtitle text.
///
/// Uses `whatlang`'s trigram and script detector, which involves no
/// randomness: identical text always yields the identical code.
pub struct LanguageClassifier {
    detector: whatlang::Detector,
    config: ClassifierConfig,
}

impl LanguageClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            detector: whatlang::Detector::new(),
            config,
        }
    }

    /// Raw detector code for `text`, or [`UNKNOWN_LANGUAGE`].
    pub fn detect_raw(&self, text: &str) -> &'static str {
        let dialogue = srt::dialogue(text);
        let letters = dialogue.chars().filter(|c| c.is_alphabetic()).count();
        if letters < self.config.min_chars {
            trace!("detect_raw: {letters} letters is too short");
            return UNKNOWN_LANGUAGE;
        }
        let Some(info) = self.detector.detect(&dialogue) else {
            return UNKNOWN_LANGUAGE;
        };
        if self.config.require_reliable && !info.is_reliable() {
            debug!(
                "detect_raw: unreliable guess {} ({:.2})",
                info.lang().code(),
                info.confidence()
            );
            return UNKNOWN_LANGUAGE;
        }
        if info.confidence() < self.config.min_confidence {
            return UNKNOWN_LANGUAGE;
        }
        info.lang().code()
    }

    /// Canonical language code for `text`.
    ///
    /// When the detector gives up, the track's declared language stands in,
    /// and [`UNKNOWN_LANGUAGE`] when nothing was declared.
    pub fn classify(&self, text: &str, declared: Option<&str>) -> String {
        match self.detect_raw(text) {
            UNKNOWN_LANGUAGE => declared
                .and_then(canonical_declared)
                .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string()),
            raw => canonical_code(raw),
        }
    }
}

impl Default for LanguageClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}
