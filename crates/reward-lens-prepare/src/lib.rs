#![warn(missing_docs)]
//! # reward-lens-prepare
//!
//! ## Purpose
//! Turns one raw camera frame into a bounded, upload-ready JPEG.
//!
//! ## Responsibilities
//! - Constrain the longer edge to a maximum dimension, preserving aspect ratio.
//! - Undo front-camera mirroring so the image matches what a viewer sees.
//! - Encode as JPEG at a transfer-friendly quality.
//!
//! ## Data flow
//! [`Frame`] + mirroring flag -> [`prepare_frame`] -> [`PreparedImage`] whose
//! [`EncodedImage`] goes into the analysis request.
//!
//! ## Error model
//! Zero-sized frames fail with [`PrepareError::FrameNotReady`]; the caller must
//! not start an analysis in that case.
//!
//! ## Security and privacy notes
//! Prepared images are never written to disk. [`PreparedImage::fingerprint`]
//! lets logs correlate an upload without carrying image bytes.

use base64::Engine as _;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use reward_lens_core::{EncodedImage, Frame};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default bound for the longer image edge.
pub const DEFAULT_MAX_DIMENSION: u32 = 1080;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// MIME type of every prepared image.
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// Tunables for [`prepare_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Maximum length of the longer edge in pixels.
    pub max_dimension: u32,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Encoded image plus the facts needed to log and transmit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    /// Encoded JPEG.
    pub image: EncodedImage,
    /// Width of the source frame.
    pub source_width: u32,
    /// Height of the source frame.
    pub source_height: u32,
    /// Whether mirror correction was applied.
    pub mirror_corrected: bool,
}

impl PreparedImage {
    /// Base64 (standard alphabet) of the JPEG bytes.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.image.bytes)
    }

    /// `data:` URL form of the image.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.image.mime_type, self.to_base64())
    }

    /// Hex SHA-256 of the JPEG bytes.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.image.bytes))
    }

    /// Consumes the wrapper and returns the encoded image.
    pub fn into_encoded(self) -> EncodedImage {
        self.image
    }
}

/// Computes output dimensions for a `width x height` source.
///
/// Frames already within `max_dimension` keep their size.
pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }

    let scale_edge = |edge: u32, longer: u32| -> u32 {
        let scaled = (f64::from(edge) * f64::from(max_dimension) / f64::from(longer)).round();
        (scaled as u32).max(1)
    };

    if width > height {
        (max_dimension, scale_edge(height, width))
    } else {
        (scale_edge(width, height), max_dimension)
    }
}

/// Resizes, mirror-corrects, and JPEG-encodes one frame.
///
/// # Errors
/// Returns [`PrepareError::FrameNotReady`] for zero-sized frames,
/// [`PrepareError::InvalidBuffer`] when the pixel buffer does not match the
/// frame geometry, and [`PrepareError::Encode`] when JPEG encoding fails.
pub fn prepare_frame(
    frame: &Frame,
    mirrored: bool,
    options: PrepareOptions,
) -> Result<PreparedImage, PrepareError> {
    if !frame.is_ready() {
        return Err(PrepareError::FrameNotReady);
    }
    if options.max_dimension == 0 {
        return Err(PrepareError::InvalidOptions(
            "max_dimension must be greater than zero".to_string(),
        ));
    }

    let source = RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or(PrepareError::InvalidBuffer {
            width: frame.width,
            height: frame.height,
        })?;

    let (width, height) = scaled_dimensions(frame.width, frame.height, options.max_dimension);
    let mut resized = if (width, height) == (frame.width, frame.height) {
        source
    } else {
        imageops::resize(&source, width, height, FilterType::Triangle)
    };

    if mirrored {
        imageops::flip_horizontal_in_place(&mut resized);
    }

    let rgb = DynamicImage::ImageRgba8(resized).to_rgb8();
    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, options.jpeg_quality.clamp(1, 100))
        .encode(rgb.as_raw(), width, height, image::ColorType::Rgb8.into())
        .map_err(|error| PrepareError::Encode(error.to_string()))?;

    Ok(PreparedImage {
        image: EncodedImage {
            mime_type: JPEG_MIME_TYPE.to_string(),
            width,
            height,
            bytes: jpeg,
        },
        source_width: frame.width,
        source_height: frame.height,
        mirror_corrected: mirrored,
    })
}

/// Error type for image preparation.
#[derive(Debug, Error)]
pub enum PrepareError {
    /// The camera has not delivered a non-empty frame yet.
    #[error("camera frame is not ready")]
    FrameNotReady,
    /// Pixel buffer does not match the declared geometry.
    #[error("pixel buffer does not match {width}x{height} RGBA")]
    InvalidBuffer {
        /// Declared frame width.
        width: u32,
        /// Declared frame height.
        height: u32,
    },
    /// Options out of range.
    #[error("invalid prepare options: {0}")]
    InvalidOptions(String),
    /// JPEG encoder failure.
    #[error("jpeg encoding failed: {0}")]
    Encode(String),
}
