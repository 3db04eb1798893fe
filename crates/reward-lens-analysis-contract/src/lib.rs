#![warn(missing_docs)]
//! # reward-lens-analysis-contract
//!
//! ## Purpose
//! Defines the remote analysis contract: what the service is told, which
//! response shape it must return, and how that response is validated.
//!
//! ## Responsibilities
//! - Select guidance text from the fixed grade x task instruction table.
//! - Publish the structured response schema sent with every request.
//! - Parse raw responses and fill every optional field exactly once.
//!
//! ## Data flow
//! Raw service text -> [`parse_analysis_response`] -> [`RawAnalysisResponse`]
//! -> [`normalize_response`] -> validated [`AnalysisResult`].
//!
//! ## Ownership and lifetimes
//! Parsed values are owned structs to avoid borrowing from transient network
//! buffers.
//!
//! ## Error model
//! Invalid JSON or a non-object payload return [`AnalysisContractError`].
//! Missing or out-of-range fields are not errors; they are replaced with
//! documented defaults by [`normalize_response`].

use reward_lens_core::{
    AnalysisResult, BOX_SCALE, BoundingBox, DEFAULT_BOUNDING_BOX, GradeLevel, StarRange, TaskType,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Contract version for prompts and response schema.
pub const ANALYSIS_CONTRACT_VERSION_V1: &str = "v1";

/// Message used when a detected result arrives without usable text.
pub const DEFAULT_MESSAGE: &str = "Wonderful effort, keep shining!";

/// Message used when nothing was detected and the response has no text.
pub const NOT_DETECTED_MESSAGE: &str =
    "No schoolwork found in the picture. Try again with the work in view.";

/// User turn sent alongside the image.
pub const USER_PROMPT: &str = "Analyze this image for a student reward.";

/// Response exactly as the service produced it, every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnalysisResponse {
    /// Whether a subject was found.
    #[serde(default)]
    pub detected: Option<bool>,
    /// Feedback text.
    #[serde(default)]
    pub message: Option<String>,
    /// Proposed score; models occasionally emit fractional numbers.
    #[serde(default)]
    pub stars: Option<f64>,
    /// `[ymin, xmin, ymax, xmax]` on the 0-1000 scale.
    #[serde(default)]
    pub bounding_box: Option<Vec<f64>>,
}

/// Guidance strings for one grade band and task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionVariant {
    /// Audience-specific tone guidance.
    pub audience: &'static str,
    /// Task-specific focus guidance.
    pub focus: &'static str,
}

/// Selects one of the six fixed instruction variants.
pub fn instruction_variant(grade: GradeLevel, task: TaskType) -> InstructionVariant {
    let audience = match grade {
        GradeLevel::Lower => {
            "Target audience: lower primary (grades 1-3). Use very simple, playful language and a few emojis."
        }
        GradeLevel::Upper => {
            "Target audience: upper primary (grades 4-6). Use inspiring, slightly more mature language that praises effort and excellence."
        }
    };
    let focus = match task {
        TaskType::General => {
            "Focus: general behavior and participation. Reward smiling, tidy uniform, and helping others."
        }
        TaskType::Academic => {
            "Focus: academic work such as handwriting, math, and reading. Reward neatness, focus, and correctness."
        }
        TaskType::Creative => {
            "Focus: creativity and art. Reward colors, imagination, and uniqueness."
        }
    };
    InstructionVariant { audience, focus }
}

/// Builds the full system instruction for one request.
///
/// The star range is stated as a hard constraint; the orchestrator still
/// clamps whatever comes back.
pub fn system_instruction(grade: GradeLevel, task: TaskType, range: StarRange) -> String {
    let variant = instruction_variant(grade, task);
    format!(
        "You are a classroom assistant that rewards positive behavior and good work.\n\n\
         {audience}\n{focus}\n\n\
         Steps:\n\
         1. DETECT: look for a student or a piece of student work in the image.\n\
         2. ANALYZE: judge quality and effort, noting specific visible details.\n\
         3. LOCATE: give the bounding box [ymin, xmin, ymax, xmax] (0-1000 scale) of the main subject.\n\
         4. RESPOND: return JSON only.\n\n\
         Output rules:\n\
         - message: short (at most 15 words) and personal, naming a detail you can see.\n\
         - stars: integer between {min} and {max}. Never go outside this range.\n\
         - detected: false if the image is black, blurry, or empty.\n\
         - boundingBox: [ymin, xmin, ymax, xmax] of the main subject.",
        audience = variant.audience,
        focus = variant.focus,
        min = range.min(),
        max = range.max(),
    )
}

/// Structured response schema sent with every request.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "detected": { "type": "BOOLEAN" },
            "message": { "type": "STRING" },
            "stars": { "type": "INTEGER" },
            "boundingBox": {
                "type": "ARRAY",
                "items": { "type": "INTEGER" },
                "description": "[ymin, xmin, ymax, xmax] normalized 0-1000"
            }
        },
        "required": ["detected", "message", "stars"]
    })
}

/// Parses raw service text into a [`RawAnalysisResponse`].
///
/// A surrounding markdown code fence is tolerated.
///
/// # Errors
/// Returns [`AnalysisContractError::Empty`] for blank text,
/// [`AnalysisContractError::Decode`] for invalid JSON, and
/// [`AnalysisContractError::InvalidContract`] when the payload is not a JSON
/// object.
pub fn parse_analysis_response(raw: &str) -> Result<RawAnalysisResponse, AnalysisContractError> {
    let body = strip_code_fence(raw.trim());
    if body.is_empty() {
        return Err(AnalysisContractError::Empty);
    }

    let value: Value = serde_json::from_str(body).map_err(AnalysisContractError::Decode)?;
    if !value.is_object() {
        return Err(AnalysisContractError::InvalidContract(
            "response is not a JSON object".to_string(),
        ));
    }

    serde_json::from_value(value).map_err(AnalysisContractError::Decode)
}

/// Fills defaults and enforces invariants on a parsed response.
///
/// - `detected` missing -> `true`.
/// - `stars` missing -> `range.min()`; present -> rounded and clamped.
/// - `message` missing or blank -> [`DEFAULT_MESSAGE`], or
///   [`NOT_DETECTED_MESSAGE`] when nothing was detected.
/// - `boundingBox` missing or malformed -> [`DEFAULT_BOUNDING_BOX`].
pub fn normalize_response(raw: RawAnalysisResponse, range: StarRange) -> AnalysisResult {
    let stars = match raw.stars {
        Some(value) if value.is_finite() => range.clamp(value.round() as i64),
        _ => range.min(),
    };

    let detected = raw.detected.unwrap_or(true);
    let fallback = if detected {
        DEFAULT_MESSAGE
    } else {
        NOT_DETECTED_MESSAGE
    };
    let message = raw
        .message
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| fallback.to_string());

    AnalysisResult {
        detected,
        message,
        stars,
        bounding_box: Some(normalize_bounding_box(raw.bounding_box.as_deref())),
    }
}

/// Validates a raw box, returning [`DEFAULT_BOUNDING_BOX`] when unusable.
///
/// Coordinates are rounded and clamped to `0..=1000`; a box with the wrong
/// arity or inverted edges is replaced entirely.
pub fn normalize_bounding_box(raw: Option<&[f64]>) -> BoundingBox {
    let Some(values) = raw else {
        return DEFAULT_BOUNDING_BOX;
    };
    let [ymin, xmin, ymax, xmax] = values else {
        return DEFAULT_BOUNDING_BOX;
    };

    let scale = |value: f64| -> Option<u16> {
        value
            .is_finite()
            .then(|| value.round().clamp(0.0, f64::from(BOX_SCALE)) as u16)
    };

    match (scale(*ymin), scale(*xmin), scale(*ymax), scale(*xmax)) {
        (Some(ymin), Some(xmin), Some(ymax), Some(xmax)) => {
            BoundingBox::new(ymin, xmin, ymax, xmax).unwrap_or(DEFAULT_BOUNDING_BOX)
        }
        _ => DEFAULT_BOUNDING_BOX,
    }
}

fn strip_code_fence(body: &str) -> &str {
    let Some(inner) = body.strip_prefix("```") else {
        return body;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Analysis contract errors.
#[derive(Debug, Error)]
pub enum AnalysisContractError {
    /// Service returned no text.
    #[error("analysis response is empty")]
    Empty,
    /// JSON decode failure.
    #[error("analysis decode failure: {0}")]
    Decode(#[from] serde_json::Error),
    /// Parsed payload violates contract invariants.
    #[error("analysis contract violation: {0}")]
    InvalidContract(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for parsing and default filling.

    use super::*;

    #[test]
    fn missing_fields_receive_defaults() {
        let range = StarRange::new(2, 4).expect("valid range");
        let result = normalize_response(RawAnalysisResponse::default(), range);

        assert!(result.detected);
        assert_eq!(result.stars, 2);
        assert_eq!(result.message, DEFAULT_MESSAGE);
        assert_eq!(result.bounding_box, Some(DEFAULT_BOUNDING_BOX));
    }

    #[test]
    fn fenced_json_is_accepted() {
        let parsed = parse_analysis_response("```json\n{\"detected\":false}\n```")
            .expect("fenced payload should parse");
        assert_eq!(parsed.detected, Some(false));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(matches!(
            parse_analysis_response("[1,2,3]"),
            Err(AnalysisContractError::InvalidContract(_))
        ));
        assert!(matches!(
            parse_analysis_response("   "),
            Err(AnalysisContractError::Empty)
        ));
    }

    #[test]
    fn inverted_or_short_boxes_fall_back() {
        assert_eq!(
            normalize_bounding_box(Some(&[900.0, 100.0, 100.0, 900.0])),
            DEFAULT_BOUNDING_BOX
        );
        assert_eq!(
            normalize_bounding_box(Some(&[1.0, 2.0, 3.0])),
            DEFAULT_BOUNDING_BOX
        );
        assert_eq!(
            normalize_bounding_box(Some(&[-5.0, 10.0, 1200.0, 990.4])).as_array(),
            [0, 10, 1000, 990]
        );
    }
}
