//! Decodes an inbound query key into a resize request.
//!
//! Keys take the form `resize/<width>x<height>/<filename>`, where the
//! filename is everything after the dimensions segment and may itself
//! contain slashes.

use regex::Regex;
use std::sync::LazyLock;

/// Prefix under which original images live.
pub const ORIGINAL_PREFIX: &str = "original";

// `(?s)` keeps the filename as the full remainder even across newlines.
static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\Aresize/([0-9]+)x([0-9]+)/(.+)\z").expect("key pattern is valid")
});

/// A parsed request for a derived image.
///
/// Immutable once parsed; `raw_key` is the exact key the request arrived with
/// and doubles as the storage key of the derived artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeRequest {
    pub width: u32,
    pub height: u32,
    pub filename: String,
    pub raw_key: String,
}

impl ResizeRequest {
    /// Parse a key, returning `None` when it does not describe a resize.
    ///
    /// Dimensions are not bounds-checked here; zero or very large values are
    /// left for the transform step to reject. Values that do not fit in a
    /// `u32` cannot name a pixel size at all and are treated as a bad key.
    pub fn parse(key: &str) -> Option<Self> {
        let caps = KEY_PATTERN.captures(key)?;
        let width = caps[1].parse::<u32>().ok()?;
        let height = caps[2].parse::<u32>().ok()?;

        Some(Self {
            width,
            height,
            filename: caps[3].to_string(),
            raw_key: key.to_string(),
        })
    }

    /// Storage key of the original this request derives from.
    pub fn original_key(&self) -> String {
        format!("{}/{}", ORIGINAL_PREFIX, self.filename)
    }
}
