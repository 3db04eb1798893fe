//! Shared fixtures for orchestrator integration tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use reward_lens_analysis::{AnalysisService, ServiceError};
use reward_lens_analysis_contract::RawAnalysisResponse;
use reward_lens_core::{AnalysisRequest, EncodedImage, GradeLevel, StarRange, TaskType};

/// Builds a request around a tiny opaque payload.
#[allow(dead_code)]
pub fn fixture_request(task: TaskType, min: u8, max: u8) -> AnalysisRequest {
    let image = EncodedImage {
        mime_type: "image/jpeg".to_string(),
        width: 4,
        height: 4,
        bytes: vec![0xFF, 0xD8, 0xFF, 0xD9],
    };
    AnalysisRequest::new(
        image,
        GradeLevel::Lower,
        task,
        StarRange::new(min, max).expect("fixture range should be valid"),
    )
}

/// Service that replays a fixed script, then repeats a fallback answer.
pub struct ScriptedService {
    script: Mutex<VecDeque<Result<RawAnalysisResponse, ServiceError>>>,
    repeat: fn() -> Result<RawAnalysisResponse, ServiceError>,
    calls: AtomicU32,
}

#[allow(dead_code)]
impl ScriptedService {
    pub fn new(
        script: Vec<Result<RawAnalysisResponse, ServiceError>>,
        repeat: fn() -> Result<RawAnalysisResponse, ServiceError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat,
            calls: AtomicU32::new(0),
        }
    }

    /// Always answers with the same error or response.
    pub fn always(repeat: fn() -> Result<RawAnalysisResponse, ServiceError>) -> Self {
        Self::new(Vec::new(), repeat)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisService for ScriptedService {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<RawAnalysisResponse, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().expect("script lock").pop_front();
        next.unwrap_or_else(self.repeat)
    }
}

#[allow(dead_code)]
pub fn rate_limited() -> Result<RawAnalysisResponse, ServiceError> {
    Err(ServiceError::RateLimited("429 RESOURCE_EXHAUSTED".to_string()))
}

#[allow(dead_code)]
pub fn overloaded() -> Result<RawAnalysisResponse, ServiceError> {
    Err(ServiceError::Overloaded("503 model overloaded".to_string()))
}

#[allow(dead_code)]
pub fn unauthorized() -> Result<RawAnalysisResponse, ServiceError> {
    Err(ServiceError::Unauthorized("API key not valid".to_string()))
}

#[allow(dead_code)]
pub fn detected_four_stars() -> Result<RawAnalysisResponse, ServiceError> {
    Ok(RawAnalysisResponse {
        detected: Some(true),
        message: Some("Lovely neat handwriting!".to_string()),
        stars: Some(4.0),
        bounding_box: Some(vec![100.0, 150.0, 700.0, 850.0]),
    })
}
