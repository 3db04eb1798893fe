//! Tests difficulty presets and textual settings parsing.

use reward_lens_core::{Difficulty, GradeLevel, StarRange, TaskType};

#[test]
fn difficulty_preset_tests_map_to_expected_ranges() {
    assert_eq!(Difficulty::Easy.star_range(), StarRange::new(1, 2).unwrap());
    assert_eq!(Difficulty::Medium.star_range(), StarRange::new(2, 4).unwrap());
    assert_eq!(Difficulty::Hard.star_range(), StarRange::new(4, 5).unwrap());
    assert_eq!(StarRange::default(), Difficulty::Medium.star_range());
}

#[test]
fn difficulty_preset_tests_parse_settings_case_insensitively() {
    assert_eq!("HARD".parse::<Difficulty>().unwrap(), Difficulty::Hard);
    assert_eq!("4-6".parse::<GradeLevel>().unwrap(), GradeLevel::Upper);
    assert_eq!(" creative ".parse::<TaskType>().unwrap(), TaskType::Creative);
    assert!("extreme".parse::<Difficulty>().is_err());
}
