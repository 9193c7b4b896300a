//! Image transformation: decode, resize to an exact size, re-encode.
//!
//! The pipeline talks to a [`Transformer`] so tests can swap in a fake; the
//! production implementation is [`ImageTransformer`], built on the `image`
//! crate.

use crate::services::format_service::OutputFormat;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::{fmt, io::Cursor, str::FromStr};
use thiserror::Error;

/// Upper bound on output pixels (1 gigapixel). Anything larger is refused
/// before a buffer is allocated for it.
pub const MAX_PIXELS: u64 = 1_000_000_000;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("invalid target dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("target resolution {width}x{height} exceeds maximum pixel count")]
    ResolutionTooLarge { width: u32, height: u32 },
    #[error("failed to encode {format}: {reason}")]
    Encode {
        format: OutputFormat,
        reason: String,
    },
    #[error("transform task failed: {0}")]
    Task(String),
}

pub type TransformResult<T> = Result<T, TransformError>;

/// How the source is fitted into the requested box. Either way the output is
/// exactly the requested size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFit {
    /// Stretch to the target size, ignoring aspect ratio.
    #[default]
    Exact,
    /// Keep aspect ratio, scale to cover the target, centre-crop the excess.
    Cover,
}

impl ResizeFit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Cover => "cover",
        }
    }
}

impl fmt::Display for ResizeFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResizeFit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "cover" => Ok(Self::Cover),
            other => Err(format!(
                "unknown resize fit `{other}` (expected `exact` or `cover`)"
            )),
        }
    }
}

/// Turns original image bytes into an encoded image of the requested size.
pub trait Transformer: Send + Sync {
    fn transform(
        &self,
        input: &[u8],
        width: u32,
        height: u32,
        format: OutputFormat,
    ) -> TransformResult<Vec<u8>>;
}

/// [`Transformer`] backed by the `image` crate, using a Lanczos3 filter.
#[derive(Debug, Clone, Copy)]
pub struct ImageTransformer {
    fit: ResizeFit,
    jpeg_quality: u8,
}

impl ImageTransformer {
    pub fn new(fit: ResizeFit, jpeg_quality: u8) -> Self {
        Self { fit, jpeg_quality }
    }
}

impl Default for ImageTransformer {
    fn default() -> Self {
        Self::new(ResizeFit::default(), DEFAULT_JPEG_QUALITY)
    }
}

impl Transformer for ImageTransformer {
    fn transform(
        &self,
        input: &[u8],
        width: u32,
        height: u32,
        format: OutputFormat,
    ) -> TransformResult<Vec<u8>> {
        validate_target(width, height)?;

        let img = decode_image(input)?;
        let resized = match self.fit {
            ResizeFit::Exact => img.resize_exact(width, height, FilterType::Lanczos3),
            ResizeFit::Cover => img.resize_to_fill(width, height, FilterType::Lanczos3),
        };

        encode_image(&resized, format, self.jpeg_quality)
    }
}

fn validate_target(width: u32, height: u32) -> TransformResult<()> {
    if width == 0 || height == 0 {
        return Err(TransformError::InvalidDimensions { width, height });
    }
    if width as u64 * height as u64 > MAX_PIXELS {
        return Err(TransformError::ResolutionTooLarge { width, height });
    }
    Ok(())
}

/// Decode bytes of any compiled-in format, guessing it from the content.
fn decode_image(input: &[u8]) -> TransformResult<DynamicImage> {
    ImageReader::new(Cursor::new(input))
        .with_guessed_format()
        .map_err(|e| TransformError::Decode(format!("failed to guess format: {e}")))?
        .decode()
        .map_err(|e| TransformError::Decode(e.to_string()))
}

fn encode_image(img: &DynamicImage, format: OutputFormat, quality: u8) -> TransformResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encode_err = |e: image::ImageError| TransformError::Encode {
        format,
        reason: e.to_string(),
    };

    match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel.
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            img.to_rgb8().write_with_encoder(encoder).map_err(encode_err)?;
        }
        OutputFormat::Png => {
            img.write_to(&mut buf, ImageFormat::Png).map_err(encode_err)?;
        }
    }

    Ok(buf.into_inner())
}
