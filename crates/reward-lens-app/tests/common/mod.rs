//! Shared fixtures for app integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reward_lens_analysis::{
    AnalysisMode, AnalysisOrchestrator, AnalysisService, RetryPolicy, ServiceError, Simulator,
};
use reward_lens_analysis_contract::RawAnalysisResponse;
use reward_lens_app::{CaptureSession, FeedbackCue, FeedbackSink, SessionSettings};
use reward_lens_capture::SyntheticCamera;
use reward_lens_core::AnalysisRequest;
use reward_lens_lifecycle::InMemoryHistory;

/// Simulated analysis latency used by the session fixtures.
#[allow(dead_code)]
pub const SIMULATED_DELAY: Duration = Duration::from_millis(1_500);

/// Sink that records every cue.
#[derive(Default)]
pub struct RecordingFeedback {
    cues: Mutex<Vec<FeedbackCue>>,
}

#[allow(dead_code)]
impl RecordingFeedback {
    pub fn cues(&self) -> Vec<FeedbackCue> {
        self.cues.lock().expect("cue lock").clone()
    }
}

impl FeedbackSink for RecordingFeedback {
    fn cue(&self, cue: FeedbackCue) {
        self.cues.lock().expect("cue lock").push(cue);
    }
}

/// Service that always rejects the credential.
pub struct RejectingService;

#[async_trait]
impl AnalysisService for RejectingService {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<RawAnalysisResponse, ServiceError> {
        Err(ServiceError::Unauthorized("API key not valid".to_string()))
    }
}

/// Service that stays busy for ten seconds and then reports a rate limit.
/// Tracks how many calls are in flight at once.
#[derive(Default)]
pub struct SlowBusyService {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[allow(dead_code)]
impl SlowBusyService {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnalysisService for SlowBusyService {
    fn name(&self) -> &'static str {
        "slow-busy"
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<RawAnalysisResponse, ServiceError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _call = ActiveCall(&self.active);
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        Err(ServiceError::RateLimited("RESOURCE_EXHAUSTED".to_string()))
    }
}

/// Session plus the handles tests inspect.
#[allow(dead_code)]
pub struct Harness {
    pub session: CaptureSession,
    pub camera: Arc<SyntheticCamera>,
    pub feedback: Arc<RecordingFeedback>,
}

/// Simulator-only session with a deterministic seed.
#[allow(dead_code)]
pub fn simulated_session(camera: SyntheticCamera, settings: SessionSettings) -> Harness {
    let orchestrator = AnalysisOrchestrator::new(
        AnalysisMode::SimulatedOnly,
        RetryPolicy::default(),
        None,
        Simulator::with_seed(SIMULATED_DELAY, 42),
    )
    .expect("default policy is valid");
    harness(camera, orchestrator, settings)
}

/// Remote-only session whose service always fails permanently.
#[allow(dead_code)]
pub fn rejecting_session() -> Harness {
    let orchestrator = AnalysisOrchestrator::new(
        AnalysisMode::RemoteOnly,
        RetryPolicy::default(),
        Some(Arc::new(RejectingService) as Arc<dyn AnalysisService>),
        Simulator::default(),
    )
    .expect("default policy is valid");
    harness(SyntheticCamera::new(32, 24), orchestrator, SessionSettings::default())
}

/// Remote-only session backed by `service`.
#[allow(dead_code)]
pub fn remote_session(service: Arc<dyn AnalysisService>) -> Harness {
    let orchestrator = AnalysisOrchestrator::new(
        AnalysisMode::RemoteOnly,
        RetryPolicy::default(),
        Some(service),
        Simulator::default(),
    )
    .expect("default policy is valid");
    harness(SyntheticCamera::new(32, 24), orchestrator, SessionSettings::default())
}

fn harness(
    camera: SyntheticCamera,
    orchestrator: AnalysisOrchestrator,
    settings: SessionSettings,
) -> Harness {
    let camera = Arc::new(camera);
    let feedback = Arc::new(RecordingFeedback::default());
    let session = CaptureSession::start(
        camera.clone(),
        Arc::new(orchestrator),
        Box::new(InMemoryHistory::new()),
        feedback.clone(),
        settings,
    );
    Harness {
        session,
        camera,
        feedback,
    }
}

/// Advances virtual time.
#[allow(dead_code)]
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
