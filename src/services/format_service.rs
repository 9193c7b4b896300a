//! Output format resolution.
//!
//! Maps the content type declared on an original to the encoding used for
//! its derived artifacts. Which mapping applies is a deployment choice
//! (`FORMAT_MODE`).

use std::{fmt, str::FromStr};

/// Encodings the gateway can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    /// Encoding name, as used in `image/<name>`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How derived artifacts pick their encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatMode {
    /// Keep JPEG originals as JPEG; everything else becomes PNG.
    #[default]
    Adaptive,
    /// Always emit PNG.
    FixedPng,
}

impl FormatMode {
    /// Resolve the output format for an original with the given content type.
    pub fn resolve(&self, content_type: Option<&str>) -> OutputFormat {
        match self {
            Self::FixedPng => OutputFormat::Png,
            Self::Adaptive => match content_type {
                Some("image/jpeg") | Some("image/pjpeg") => OutputFormat::Jpeg,
                _ => OutputFormat::Png,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Adaptive => "adaptive",
            Self::FixedPng => "fixed-png",
        }
    }
}

impl fmt::Display for FormatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adaptive" => Ok(Self::Adaptive),
            "fixed-png" => Ok(Self::FixedPng),
            other => Err(format!(
                "unknown format mode `{other}` (expected `adaptive` or `fixed-png`)"
            )),
        }
    }
}
