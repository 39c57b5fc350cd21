//! Strict decoding with a single UTF-8 retry.

use crate::encoding::FALLBACK_ENCODING;
use crate::error::DecodeError;
use encoding_rs::{Encoding, UTF_8};
use tracing::{debug, trace};

/// Text decoded from a track together with the encoding that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedText {
    pub track_index: usize,
    pub text: String,
    pub encoding_used: String,
}

/// Decodes raw subtitle bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextDecoder;

impl TextDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode `bytes` strictly as `encoding`, retrying once as UTF-8.
    ///
    /// Returns the text and the name of the encoding that succeeded. An
    /// unknown label counts as a failed first attempt.
    pub fn decode(&self, bytes: &[u8], encoding: &str) -> Result<(String, String), DecodeError> {
        trace!("decode len={} encoding={}", bytes.len(), encoding);
        if let Some(enc) = Encoding::for_label(encoding.trim().as_bytes()) {
            if let Some(text) = strict(enc, bytes) {
                return Ok((text, enc.name().to_ascii_lowercase()));
            }
        }
        debug!("decoding as {encoding} failed, retrying as utf-8");
        strict(UTF_8, bytes)
            .map(|text| (text, FALLBACK_ENCODING.to_string()))
            .ok_or_else(|| DecodeError {
                encoding: encoding.to_string(),
            })
    }
}

/// Decode without replacement characters, dropping a matching BOM.
fn strict(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
    if had_errors {
        None
    } else {
        Some(text.into_owned())
    }
}
