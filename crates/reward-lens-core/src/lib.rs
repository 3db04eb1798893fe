#![warn(missing_docs)]
//! # reward-lens-core
//!
//! ## Purpose
//! Defines the pure data model shared across the `reward-lens` workspace.
//!
//! ## Responsibilities
//! - Represent raw camera frames and encoded images.
//! - Represent analysis requests, analysis results, and committed rewards.
//! - Validate star ranges and normalized bounding boxes.
//! - Name the failure taxonomy every other crate reports into.
//!
//! ## Data flow
//! Camera code emits [`Frame`] values. The image preparer turns a frame into an
//! [`EncodedImage`], which is wrapped with session settings into an
//! [`AnalysisRequest`]. The orchestrator answers with an [`AnalysisResult`],
//! and the confirmation stage finally emits a [`Reward`].
//!
//! ## Ownership and lifetimes
//! All values own their buffers (`Vec<u8>`, `String`) so they can cross async
//! task boundaries without borrowing from camera or network buffers.
//!
//! ## Error model
//! Validation failures return [`CoreError`] variants.
//!
//! ## Example
//! ```rust
//! use reward_lens_core::{Difficulty, StarRange};
//!
//! let range = StarRange::new(2, 4).expect("valid range");
//! assert_eq!(range.clamp(9), 4);
//! assert_eq!(Difficulty::Medium.star_range(), range);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest star count a reward can carry.
pub const MAX_STARS: u8 = 5;

/// Lowest allowed lower bound of a [`StarRange`].
pub const MIN_RANGE_BOUND: u8 = 1;

/// Upper bound of the normalized bounding-box coordinate space.
pub const BOX_SCALE: u16 = 1000;

/// Centered box used whenever a result carries no usable location.
pub const DEFAULT_BOUNDING_BOX: BoundingBox = BoundingBox {
    ymin: 200,
    xmin: 200,
    ymax: 800,
    xmax: 800,
};

/// Grade band of the audience the feedback is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GradeLevel {
    /// Lower primary (grades 1-3).
    #[default]
    Lower,
    /// Upper primary (grades 4-6).
    Upper,
}

impl FromStr for GradeLevel {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lower" | "1-3" => Ok(Self::Lower),
            "upper" | "4-6" => Ok(Self::Upper),
            other => Err(CoreError::InvalidSetting {
                name: "grade",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of work or behavior being rewarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    /// Behavior and participation.
    #[default]
    General,
    /// Handwriting, math, reading.
    Academic,
    /// Art and imaginative work.
    Creative,
}

impl FromStr for TaskType {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "academic" => Ok(Self::Academic),
            "creative" => Ok(Self::Creative),
            other => Err(CoreError::InvalidSetting {
                name: "task",
                value: other.to_string(),
            }),
        }
    }
}

/// Inclusive star bounds every returned score must respect.
///
/// Always satisfies `1 <= min <= max <= 5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StarRangeRepr")]
pub struct StarRange {
    min: u8,
    max: u8,
}

#[derive(Deserialize)]
struct StarRangeRepr {
    min: u8,
    max: u8,
}

impl TryFrom<StarRangeRepr> for StarRange {
    type Error = CoreError;

    fn try_from(repr: StarRangeRepr) -> Result<Self, Self::Error> {
        Self::new(repr.min, repr.max)
    }
}

impl StarRange {
    /// Creates a validated star range.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidStarRange`] unless `1 <= min <= max <= 5`.
    pub fn new(min: u8, max: u8) -> Result<Self, CoreError> {
        if min < MIN_RANGE_BOUND || max > MAX_STARS || min > max {
            return Err(CoreError::InvalidStarRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Inclusive lower bound.
    pub fn min(&self) -> u8 {
        self.min
    }

    /// Inclusive upper bound.
    pub fn max(&self) -> u8 {
        self.max
    }

    /// Returns `true` when `stars` lies inside the range.
    pub fn contains(&self, stars: u8) -> bool {
        (self.min..=self.max).contains(&stars)
    }

    /// Clamps an arbitrary (possibly negative) score into the range.
    pub fn clamp(&self, stars: i64) -> u8 {
        stars.clamp(i64::from(self.min), i64::from(self.max)) as u8
    }
}

impl Default for StarRange {
    fn default() -> Self {
        Difficulty::default().star_range()
    }
}

impl fmt::Display for StarRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Operator-facing difficulty preset that selects a [`StarRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Difficulty {
    /// One or two stars.
    Easy,
    /// Two to four stars.
    #[default]
    Medium,
    /// Four or five stars.
    Hard,
}

impl Difficulty {
    /// Returns the star range this preset stands for.
    pub fn star_range(self) -> StarRange {
        let (min, max) = match self {
            Self::Easy => (1, 2),
            Self::Medium => (2, 4),
            Self::Hard => (4, 5),
        };
        StarRange { min, max }
    }
}

impl FromStr for Difficulty {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(CoreError::InvalidSetting {
                name: "difficulty",
                value: other.to_string(),
            }),
        }
    }
}

/// Subject location on a 0-1000 normalized scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Top edge.
    pub ymin: u16,
    /// Left edge.
    pub xmin: u16,
    /// Bottom edge.
    pub ymax: u16,
    /// Right edge.
    pub xmax: u16,
}

impl BoundingBox {
    /// Creates a validated box.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidBoundingBox`] when a coordinate exceeds
    /// [`BOX_SCALE`] or an edge pair is inverted.
    pub fn new(ymin: u16, xmin: u16, ymax: u16, xmax: u16) -> Result<Self, CoreError> {
        if [ymin, xmin, ymax, xmax].iter().any(|value| *value > BOX_SCALE) {
            return Err(CoreError::InvalidBoundingBox(
                "coordinate exceeds normalized scale".to_string(),
            ));
        }
        if ymin > ymax || xmin > xmax {
            return Err(CoreError::InvalidBoundingBox(
                "box edges are inverted".to_string(),
            ));
        }
        Ok(Self {
            ymin,
            xmin,
            ymax,
            xmax,
        })
    }

    /// Returns `[ymin, xmin, ymax, xmax]`.
    pub fn as_array(&self) -> [u16; 4] {
        [self.ymin, self.xmin, self.ymax, self.xmax]
    }
}

/// One raw frame read from a camera stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Identity of the stream the frame came from.
    pub camera_id: String,
    /// Frame width in pixels; zero while the camera warms up.
    pub width: u32,
    /// Frame height in pixels; zero while the camera warms up.
    pub height: u32,
    /// Capture time in Unix epoch milliseconds.
    pub captured_at_ms: u64,
    /// Raw RGBA pixel buffer (`width * height * 4` bytes).
    pub rgba: Vec<u8>,
}

impl Frame {
    /// Constructs a validated frame.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidFrameShape`] when the pixel buffer length is
    /// not exactly `width * height * 4`.
    pub fn new(
        camera_id: impl Into<String>,
        width: u32,
        height: u32,
        captured_at_ms: u64,
        rgba: Vec<u8>,
    ) -> Result<Self, CoreError> {
        let expected_len = required_rgba_len(width, height)?;
        if rgba.len() != expected_len {
            return Err(CoreError::InvalidFrameShape {
                expected: expected_len,
                actual: rgba.len(),
            });
        }

        Ok(Self {
            camera_id: camera_id.into(),
            width,
            height,
            captured_at_ms,
            rgba,
        })
    }

    /// Returns `true` once the stream delivers non-empty frames.
    pub fn is_ready(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Compressed still image ready for network transfer.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// MIME type of `bytes`, for example `image/jpeg`.
    pub mime_type: String,
    /// Encoded width in pixels.
    pub width: u32,
    /// Encoded height in pixels.
    pub height: u32,
    /// Encoded bytes.
    pub bytes: Vec<u8>,
}

impl fmt::Debug for EncodedImage {
    // Image content stays out of debug output and therefore out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("mime_type", &self.mime_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// One analysis attempt for one captured image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    image: EncodedImage,
    grade_level: GradeLevel,
    task_type: TaskType,
    star_range: StarRange,
}

impl AnalysisRequest {
    /// Creates an immutable request.
    pub fn new(
        image: EncodedImage,
        grade_level: GradeLevel,
        task_type: TaskType,
        star_range: StarRange,
    ) -> Self {
        Self {
            image,
            grade_level,
            task_type,
            star_range,
        }
    }

    /// Encoded image to analyze.
    pub fn image(&self) -> &EncodedImage {
        &self.image
    }

    /// Audience grade band.
    pub fn grade_level(&self) -> GradeLevel {
        self.grade_level
    }

    /// Kind of work being rewarded.
    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// Bounds for the returned star count.
    pub fn star_range(&self) -> StarRange {
        self.star_range
    }
}

/// Validated outcome of one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Whether a valid subject was found.
    pub detected: bool,
    /// Short operator-facing message.
    pub message: String,
    /// Proposed star count.
    pub stars: u8,
    /// Subject location, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

impl AnalysisResult {
    /// Builds a `detected=false` result that still honors `range`.
    pub fn not_detected(message: impl Into<String>, range: StarRange) -> Self {
        Self {
            detected: false,
            message: message.into(),
            stars: range.min(),
            bounding_box: None,
        }
    }
}

/// Permanent record of one confirmed reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    /// Opaque unique identifier.
    pub id: String,
    /// Final message chosen by the operator.
    pub message: String,
    /// Final star count (0-5).
    pub stars: u8,
    /// Commit time in Unix epoch milliseconds.
    pub created_at_ms: u64,
}

impl Reward {
    /// Serializes the reward to compact JSON bytes.
    ///
    /// # Errors
    /// Returns [`CoreError::Codec`] when JSON serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(self).map_err(CoreError::Codec)
    }

    /// Deserializes a reward from JSON bytes.
    ///
    /// # Errors
    /// Returns [`CoreError::Codec`] when JSON decoding fails.
    /// Returns [`CoreError::InvalidStars`] when the star count exceeds 5.
    pub fn from_json_bytes(raw: &[u8]) -> Result<Self, CoreError> {
        let reward: Self = serde_json::from_slice(raw).map_err(CoreError::Codec)?;
        if reward.stars > MAX_STARS {
            return Err(CoreError::InvalidStars(reward.stars));
        }
        Ok(reward)
    }
}

/// Failure taxonomy surfaced to the lifecycle and the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Camera device missing, busy, or permission denied.
    CameraUnavailable,
    /// Rate-limited or overloaded service; the only retried kind.
    TransientServiceFailure,
    /// Bad credential, schema violation, or non-retriable status.
    PermanentServiceFailure,
    /// Service answered but found no valid subject.
    NotDetected,
    /// Frame could not be encoded.
    ImagePreparation,
}

impl FailureKind {
    /// Returns `true` for failures that may succeed when retried later.
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::TransientServiceFailure)
    }
}

/// Error type for core validation and codec failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Frame buffer shape does not match declared geometry.
    #[error("invalid frame shape: expected {expected} bytes, got {actual}")]
    InvalidFrameShape {
        /// Expected RGBA byte count.
        expected: usize,
        /// Actual RGBA byte count.
        actual: usize,
    },
    /// Frame dimensions overflow addressable memory.
    #[error("frame dimensions overflow")]
    FrameOverflow,
    /// Star bounds violate `1 <= min <= max <= 5`.
    #[error("invalid star range {min}-{max}")]
    InvalidStarRange {
        /// Requested lower bound.
        min: u8,
        /// Requested upper bound.
        max: u8,
    },
    /// Star count outside 0-5.
    #[error("invalid star count {0}")]
    InvalidStars(u8),
    /// Bounding box violates normalized-scale invariants.
    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),
    /// Unknown textual setting value.
    #[error("invalid {name} setting: {value:?}")]
    InvalidSetting {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },
    /// JSON encoding/decoding error.
    #[error("reward codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

fn required_rgba_len(width: u32, height: u32) -> Result<usize, CoreError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or(CoreError::FrameOverflow)
}

#[cfg(test)]
mod tests {
    //! Unit tests for range and box validation.

    use super::*;

    #[test]
    fn star_range_rejects_inverted_and_out_of_scale_bounds() {
        assert!(StarRange::new(0, 3).is_err());
        assert!(StarRange::new(4, 2).is_err());
        assert!(StarRange::new(1, 6).is_err());
        assert!(StarRange::new(3, 3).is_ok());
    }

    #[test]
    fn clamp_handles_negative_and_oversized_scores() {
        let range = StarRange::new(2, 4).expect("valid range");
        assert_eq!(range.clamp(-7), 2);
        assert_eq!(range.clamp(3), 3);
        assert_eq!(range.clamp(100), 4);
    }

    #[test]
    fn bounding_box_rejects_inverted_edges() {
        assert!(BoundingBox::new(800, 200, 200, 800).is_err());
        assert!(BoundingBox::new(0, 0, 1001, 10).is_err());
        assert_eq!(
            BoundingBox::new(200, 200, 800, 800).expect("valid box"),
            DEFAULT_BOUNDING_BOX
        );
    }

    #[test]
    fn zero_sized_frame_is_valid_but_not_ready() {
        let frame = Frame::new("cam", 0, 0, 1, Vec::new()).expect("empty frame is valid");
        assert!(!frame.is_ready());
    }

    #[test]
    fn star_range_deserialization_validates_bounds() {
        let ok: StarRange = serde_json::from_str(r#"{"min":2,"max":4}"#).expect("valid json");
        assert_eq!(ok.max(), 4);
        assert!(serde_json::from_str::<StarRange>(r#"{"min":5,"max":1}"#).is_err());
    }
}
