//! Fixtures shared by latency smoke tests.

use reward_lens_core::{AnalysisRequest, CoreError, Frame, GradeLevel, StarRange, TaskType};
use reward_lens_prepare::PreparedImage;

/// Builds a `width x height` RGBA frame with a diagonal gradient.
///
/// # Errors
/// Propagates frame validation failures.
pub fn gradient_frame(width: u32, height: u32) -> Result<Frame, CoreError> {
    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            rgba.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255]);
        }
    }
    Frame::new("bench-camera", width, height, 0, rgba)
}

/// Wraps a prepared image in an analysis request for the default audience.
pub fn request_for(prepared: PreparedImage, range: StarRange) -> AnalysisRequest {
    AnalysisRequest::new(
        prepared.into_encoded(),
        GradeLevel::Lower,
        TaskType::Academic,
        range,
    )
}
