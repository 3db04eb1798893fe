//! Integration tests for strict response normalization.

use std::collections::HashSet;

use reward_lens_analysis_contract::{
    DEFAULT_MESSAGE, NOT_DETECTED_MESSAGE, RawAnalysisResponse, instruction_variant,
    normalize_response, parse_analysis_response, response_schema, system_instruction,
};
use reward_lens_core::{DEFAULT_BOUNDING_BOX, GradeLevel, StarRange, TaskType};

fn all_ranges() -> Vec<StarRange> {
    let mut ranges = Vec::new();
    for min in 1..=5 {
        for max in min..=5 {
            ranges.push(StarRange::new(min, max).expect("range should be valid"));
        }
    }
    ranges
}

#[test]
fn response_normalization_tests_stars_always_inside_range() {
    let scores = [
        None,
        Some(-3.0),
        Some(0.0),
        Some(1.0),
        Some(2.6),
        Some(5.0),
        Some(42.0),
        Some(f64::NAN),
    ];

    for range in all_ranges() {
        for score in scores {
            let result = normalize_response(
                RawAnalysisResponse {
                    stars: score,
                    ..RawAnalysisResponse::default()
                },
                range,
            );
            assert!(
                range.contains(result.stars),
                "score {score:?} escaped range {range}"
            );
        }
    }
}

#[test]
fn response_normalization_tests_missing_box_uses_default() {
    let raw = parse_analysis_response(r#"{"detected":true,"message":"Neat work!","stars":3}"#)
        .expect("payload should parse");
    let result = normalize_response(raw, StarRange::new(1, 5).unwrap());

    assert_eq!(result.bounding_box, Some(DEFAULT_BOUNDING_BOX));
    assert_eq!(result.message, "Neat work!");
    assert_eq!(result.stars, 3);
}

#[test]
fn response_normalization_tests_keeps_valid_box_and_not_detected_flag() {
    let raw = parse_analysis_response(
        r#"{"detected":false,"message":"Too dark","stars":0,"boundingBox":[10,20,300,400]}"#,
    )
    .expect("payload should parse");
    let result = normalize_response(raw, StarRange::new(2, 4).unwrap());

    assert!(!result.detected);
    assert_eq!(result.stars, 2);
    assert_eq!(
        result.bounding_box.map(|bounding_box| bounding_box.as_array()),
        Some([10, 20, 300, 400])
    );
}

#[test]
fn response_normalization_tests_blank_message_default_follows_detection() {
    let range = StarRange::new(2, 4).expect("range should be valid");

    let missed = parse_analysis_response(r#"{"detected":false,"message":"   "}"#)
        .expect("payload should parse");
    let result = normalize_response(missed, range);
    assert!(!result.detected);
    assert_eq!(result.message, NOT_DETECTED_MESSAGE);

    let found = parse_analysis_response(r#"{"detected":true}"#).expect("payload should parse");
    assert_eq!(normalize_response(found, range).message, DEFAULT_MESSAGE);
}

#[test]
fn response_normalization_tests_instruction_table_has_six_variants() {
    let mut variants = HashSet::new();
    for grade in [GradeLevel::Lower, GradeLevel::Upper] {
        for task in [TaskType::General, TaskType::Academic, TaskType::Creative] {
            let variant = instruction_variant(grade, task);
            variants.insert((variant.audience, variant.focus));
        }
    }
    assert_eq!(variants.len(), 6);
}

#[test]
fn response_normalization_tests_instruction_states_range() {
    let text = system_instruction(
        GradeLevel::Upper,
        TaskType::Creative,
        StarRange::new(4, 5).unwrap(),
    );
    assert!(text.contains("between 4 and 5"));
    assert!(text.contains("creativity"));

    let schema = response_schema();
    assert_eq!(schema["required"], serde_json::json!(["detected", "message", "stars"]));
}
