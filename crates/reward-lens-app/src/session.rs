//! Async capture session driver.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use reward_lens_analysis::{AnalysisOrchestrator, AnalysisOutcome};
use reward_lens_capture::{
    COUNTDOWN_TICK, CameraDevice, CameraSession, CaptureController, CountdownStep, Facing,
    LONG_PRESS_THRESHOLD, ReleaseOutcome, ReleasePolicy, TriggerPhase, TriggerTicket,
};
use reward_lens_core::{
    AnalysisRequest, AnalysisResult, FailureKind, Frame, GradeLevel, Reward, StarRange, TaskType,
};
use reward_lens_lifecycle::{
    AnalysisTicket, AnalysisTransition, ConfirmationStage, DwellTicket, LifecycleFailure,
    LifecycleState, RewardDraft, RewardHistory, RewardLifecycle,
};
use reward_lens_prepare::{PrepareError, PrepareOptions, prepare_frame};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{AppError, FeedbackCue, FeedbackSink, redact_sensitive};

/// Timer durations used by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Hold time that arms the countdown.
    pub long_press: Duration,
    /// Countdown step.
    pub countdown_tick: Duration,
    /// Time the detection overlay stays before the draft opens.
    pub dwell: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            long_press: LONG_PRESS_THRESHOLD,
            countdown_tick: COUNTDOWN_TICK,
            dwell: Duration::from_millis(1_500),
        }
    }
}

/// Per-session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Audience grade band.
    pub grade: GradeLevel,
    /// Kind of work being rewarded.
    pub task: TaskType,
    /// Bounds for analysis scores.
    pub star_range: StarRange,
    /// Countdown release behavior.
    pub release_policy: ReleasePolicy,
    /// Initial camera direction.
    pub facing: Facing,
    /// Timer durations.
    pub timing: SessionTiming,
    /// Image preparation tunables.
    pub prepare: PrepareOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            grade: GradeLevel::Lower,
            task: TaskType::General,
            star_range: StarRange::default(),
            release_policy: ReleasePolicy::default(),
            facing: Facing::default(),
            timing: SessionTiming::default(),
            prepare: PrepareOptions::default(),
        }
    }
}

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Trigger phase.
    pub trigger: TriggerPhase,
    /// Countdown number on screen, if armed.
    pub countdown: Option<u8>,
    /// Failure shown in `Error`.
    pub failure: Option<LifecycleFailure>,
    /// Last accepted analysis result.
    pub result: Option<AnalysisResult>,
    /// Open reward draft.
    pub draft: Option<RewardDraft>,
    /// Selected camera direction.
    pub facing: Facing,
    /// Whether a camera stream is held.
    pub camera_open: bool,
    /// Sum of stars in the history.
    pub total_stars: u64,
    /// Whether the session was closed.
    pub closed: bool,
}

struct Inner {
    lifecycle: RewardLifecycle,
    controller: CaptureController,
    confirmation: ConfirmationStage,
    camera: CameraSession,
    settings: SessionSettings,
    history: Box<dyn RewardHistory>,
    analysis_cancel: Option<CancellationToken>,
    closed: bool,
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        let trigger = self.controller.phase();
        SessionSnapshot {
            state: self.lifecycle.state(),
            trigger,
            countdown: match trigger {
                TriggerPhase::Armed { remaining } => Some(remaining),
                _ => None,
            },
            failure: self.lifecycle.failure().cloned(),
            result: self.lifecycle.result().cloned(),
            draft: self.confirmation.draft().cloned(),
            facing: self.camera.facing(),
            camera_open: self.camera.is_open(),
            total_stars: self.history.total_stars(),
            closed: self.closed,
        }
    }

    /// Stops the in-flight analysis task, if any.
    fn cancel_analysis(&mut self) {
        if let Some(token) = self.analysis_cancel.take() {
            token.cancel();
        }
    }

    fn open_camera(&mut self, feedback: &dyn FeedbackSink) {
        if let Err(error) = self.camera.open() {
            self.camera_failed(&error.to_string(), feedback);
        }
    }

    fn camera_failed(&mut self, detail: &str, feedback: &dyn FeedbackSink) {
        let message = redact_sensitive(detail);
        warn!(%message, "camera_unavailable");
        self.controller.reset();
        match self.lifecycle.on_camera_failure(message) {
            Ok(()) => feedback.cue(FeedbackCue::Failed),
            Err(error) => warn!(%error, "camera_failure_not_recorded"),
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    orchestrator: Arc<AnalysisOrchestrator>,
    feedback: Arc<dyn FeedbackSink>,
    cancel: CancellationToken,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.snapshot_tx.send_replace(inner.snapshot());
    }
}

/// One running capture session.
///
/// Dropping the session cancels every pending timer and in-flight analysis
/// and releases the camera.
pub struct CaptureSession {
    shared: Arc<Shared>,
}

impl CaptureSession {
    /// Opens the camera and starts an idle session.
    ///
    /// A camera that cannot be opened puts the session in `Error` with
    /// [`FailureKind::CameraUnavailable`]; [`Self::dismiss`] retries.
    /// Must be called inside a tokio runtime.
    pub fn start(
        camera: Arc<dyn CameraDevice>,
        orchestrator: Arc<AnalysisOrchestrator>,
        history: Box<dyn RewardHistory>,
        feedback: Arc<dyn FeedbackSink>,
        settings: SessionSettings,
    ) -> Self {
        let mut inner = Inner {
            lifecycle: RewardLifecycle::new(),
            controller: CaptureController::new(settings.release_policy),
            confirmation: ConfirmationStage::new(),
            camera: CameraSession::new(camera, settings.facing),
            settings,
            history,
            analysis_cancel: None,
            closed: false,
        };
        inner.open_camera(feedback.as_ref());

        let (snapshot_tx, _) = watch::channel(inner.snapshot());
        info!(
            grade = ?settings.grade,
            task = ?settings.task,
            stars = %settings.star_range,
            "capture_session_started"
        );

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                orchestrator,
                feedback,
                cancel: CancellationToken::new(),
                snapshot_tx,
            }),
        }
    }

    /// Subscribes to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock().snapshot()
    }

    /// Operator pressed the trigger.
    ///
    /// Returns `false` when the press is ignored: not idle, camera closed,
    /// session closed, or an interaction already running.
    pub fn press_start(&self) -> bool {
        let mut inner = self.shared.lock();
        let allowed = !inner.closed && inner.lifecycle.can_capture() && inner.camera.is_open();
        let Some(ticket) = inner.controller.press_start(allowed) else {
            return false;
        };
        spawn_long_press(&self.shared, ticket, inner.settings.timing);
        self.shared.publish(&inner);
        true
    }

    /// Operator released the trigger. A short press fires immediately.
    pub fn press_end(&self) -> ReleaseOutcome {
        let mut inner = self.shared.lock();
        let outcome = inner.controller.press_end();
        if outcome == ReleaseOutcome::Fire {
            fire(&self.shared, &mut inner);
        }
        self.shared.publish(&inner);
        outcome
    }

    /// Sets the draft star count (0-5).
    ///
    /// # Errors
    /// Returns [`AppError::Lifecycle`] for out-of-range values or without a draft.
    pub fn set_stars(&self, stars: u8) -> Result<(), AppError> {
        let mut inner = self.shared.lock();
        inner.confirmation.set_stars(stars)?;
        self.shared.publish(&inner);
        Ok(())
    }

    /// Replaces the draft message.
    ///
    /// # Errors
    /// Returns [`AppError::Lifecycle`] without a draft.
    pub fn set_message(&self, message: impl Into<String>) -> Result<(), AppError> {
        let mut inner = self.shared.lock();
        inner.confirmation.set_message(message)?;
        self.shared.publish(&inner);
        Ok(())
    }

    /// Commits the draft to the history and returns to `Idle`.
    ///
    /// Returns `Ok(None)` when there is nothing to commit and the session is
    /// already idle.
    ///
    /// # Errors
    /// Returns [`AppError::Busy`] while analyzing, detecting, or in `Error`.
    pub fn commit(&self) -> Result<Option<Reward>, AppError> {
        let mut inner = self.shared.lock();
        match inner.lifecycle.state() {
            LifecycleState::Idle => return Ok(None),
            LifecycleState::Success => {}
            _ => return Err(AppError::Busy),
        }

        let reward = inner.confirmation.commit(now_ms());
        if let Some(reward) = &reward {
            inner.history.append(reward.clone());
            self.shared.feedback.cue(FeedbackCue::Committed);
            info!(id = %reward.id, stars = reward.stars, "reward_committed");
        }
        inner.lifecycle.finish()?;
        self.shared.publish(&inner);
        Ok(reward)
    }

    /// Drops the draft and returns to `Idle`.
    ///
    /// # Errors
    /// Returns [`AppError::Lifecycle`] outside `Success`.
    pub fn discard(&self) -> Result<(), AppError> {
        let mut inner = self.shared.lock();
        inner.lifecycle.finish()?;
        inner.confirmation.discard();
        self.shared.publish(&inner);
        Ok(())
    }

    /// Leaves `Error` and, when the camera is closed, tries to reopen it.
    ///
    /// # Errors
    /// Returns [`AppError::Lifecycle`] outside `Error`.
    pub fn dismiss(&self) -> Result<(), AppError> {
        let mut inner = self.shared.lock();
        inner.lifecycle.dismiss()?;
        if !inner.camera.is_open() && !inner.closed {
            let feedback = Arc::clone(&self.shared.feedback);
            inner.open_camera(feedback.as_ref());
        }
        self.shared.publish(&inner);
        Ok(())
    }

    /// Cancels any countdown, ignores any in-flight analysis, and returns to
    /// `Idle`.
    pub fn reset(&self) {
        let mut inner = self.shared.lock();
        inner.cancel_analysis();
        inner.controller.reset();
        inner.lifecycle.reset();
        inner.confirmation.discard();
        self.shared.publish(&inner);
    }

    /// Switches between front and back cameras.
    ///
    /// # Errors
    /// Returns [`AppError::Busy`] unless idle and disarmed,
    /// [`AppError::Closed`] after [`Self::close`], and [`AppError::Capture`]
    /// when the new stream cannot be opened (the session also enters `Error`).
    pub fn switch_facing(&self) -> Result<Facing, AppError> {
        let mut inner = self.shared.lock();
        if inner.closed {
            return Err(AppError::Closed);
        }
        if !inner.lifecycle.can_capture() || inner.controller.phase() != TriggerPhase::Disarmed {
            return Err(AppError::Busy);
        }

        let result = inner.camera.switch_facing();
        if let Err(error) = &result {
            let feedback = Arc::clone(&self.shared.feedback);
            inner.camera_failed(&error.to_string(), feedback.as_ref());
        }
        self.shared.publish(&inner);
        Ok(result?)
    }

    /// Changes grade, task, and star range for subsequent captures.
    pub fn configure(&self, grade: GradeLevel, task: TaskType, star_range: StarRange) {
        let mut inner = self.shared.lock();
        inner.settings.grade = grade;
        inner.settings.task = task;
        inner.settings.star_range = star_range;
        debug!(?grade, ?task, stars = %star_range, "session_configured");
    }

    /// Rewards, newest first.
    pub fn history(&self) -> Vec<Reward> {
        self.shared.lock().history.entries()
    }

    /// Removes a reward from the history.
    pub fn remove_reward(&self, id: &str) -> bool {
        let mut inner = self.shared.lock();
        let removed = inner.history.remove(id);
        self.shared.publish(&inner);
        removed
    }

    /// Edits the message of a stored reward.
    pub fn update_reward(&self, id: &str, message: &str) -> bool {
        let mut inner = self.shared.lock();
        let updated = inner.history.update(id, message);
        self.shared.publish(&inner);
        updated
    }

    /// Empties the history.
    pub fn clear_history(&self) {
        let mut inner = self.shared.lock();
        inner.history.clear();
        self.shared.publish(&inner);
    }

    /// Tears the session down: cancels timers and analysis, releases the
    /// camera. Idempotent.
    pub fn close(&self) {
        self.shared.cancel.cancel();
        let mut inner = self.shared.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.cancel_analysis();
        inner.controller.reset();
        inner.lifecycle.reset();
        inner.confirmation.discard();
        inner.camera.close();
        self.shared.publish(&inner);
        info!("capture_session_closed");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

fn now_ms() -> u64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or(0)
}

/// Returns the session if it is still alive and not torn down.
fn live(weak: &Weak<Shared>, cancel: &CancellationToken) -> Option<Arc<Shared>> {
    if cancel.is_cancelled() {
        return None;
    }
    weak.upgrade()
}

async fn sleep_live(
    weak: &Weak<Shared>,
    cancel: &CancellationToken,
    duration: Duration,
) -> Option<Arc<Shared>> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        _ = tokio::time::sleep(duration) => live(weak, cancel),
    }
}

fn spawn_long_press(shared: &Arc<Shared>, ticket: TriggerTicket, timing: SessionTiming) {
    let weak = Arc::downgrade(shared);
    let cancel = shared.cancel.clone();
    tokio::spawn(async move {
        let Some(shared) = sleep_live(&weak, &cancel, timing.long_press).await else {
            return;
        };
        if on_long_press(&shared, ticket) {
            drop(shared);
            run_countdown(weak, cancel, ticket, timing.countdown_tick).await;
        }
    });
}

fn on_long_press(shared: &Arc<Shared>, ticket: TriggerTicket) -> bool {
    let mut inner = shared.lock();
    let Some(remaining) = inner.controller.long_press_elapsed(ticket) else {
        return false;
    };
    shared.feedback.cue(FeedbackCue::CaptureArmed);
    shared.feedback.cue(FeedbackCue::CountdownTick(remaining));
    shared.publish(&inner);
    true
}

async fn run_countdown(
    weak: Weak<Shared>,
    cancel: CancellationToken,
    ticket: TriggerTicket,
    tick: Duration,
) {
    loop {
        let Some(shared) = sleep_live(&weak, &cancel, tick).await else {
            return;
        };
        if !on_countdown_tick(&shared, ticket) {
            return;
        }
    }
}

fn on_countdown_tick(shared: &Arc<Shared>, ticket: TriggerTicket) -> bool {
    let mut inner = shared.lock();
    let keep_going = match inner.controller.countdown_elapsed(ticket) {
        CountdownStep::Stale => return false,
        CountdownStep::Remaining(remaining) => {
            shared.feedback.cue(FeedbackCue::CountdownTick(remaining));
            true
        }
        CountdownStep::Fire => {
            fire(shared, &mut inner);
            false
        }
    };
    shared.publish(&inner);
    keep_going
}

/// Reads a frame and hands it to the pipeline. Caller publishes.
fn fire(shared: &Arc<Shared>, inner: &mut Inner) {
    inner.controller.fired();
    shared.feedback.cue(FeedbackCue::CaptureFired);

    let (frame, mirrored) = match inner.camera.capture(now_ms()) {
        Ok(captured) => captured,
        Err(error) => {
            inner.camera_failed(&error.to_string(), shared.feedback.as_ref());
            return;
        }
    };

    let ticket = match inner.lifecycle.begin_analysis() {
        Ok(ticket) => ticket,
        Err(error) => {
            warn!(%error, "capture_dropped");
            return;
        }
    };
    inner.cancel_analysis();
    let analysis_cancel = shared.cancel.child_token();
    inner.analysis_cancel = Some(analysis_cancel.clone());
    spawn_analysis(shared, ticket, analysis_cancel, frame, mirrored, inner.settings);
}

/// Runs one analysis under `analysis_cancel`, a child of the session token.
fn spawn_analysis(
    shared: &Arc<Shared>,
    ticket: AnalysisTicket,
    analysis_cancel: CancellationToken,
    frame: Frame,
    mirrored: bool,
    settings: SessionSettings,
) {
    let weak = Arc::downgrade(shared);
    let cancel = shared.cancel.clone();
    let orchestrator = Arc::clone(&shared.orchestrator);

    tokio::spawn(async move {
        let prepared = match prepare_frame(&frame, mirrored, settings.prepare) {
            Ok(prepared) => prepared,
            Err(error) => {
                if let Some(shared) = live(&weak, &cancel) {
                    on_prepare_failed(&shared, ticket, error);
                }
                return;
            }
        };
        debug!(
            fingerprint = %prepared.fingerprint(),
            width = prepared.image.width,
            height = prepared.image.height,
            "capture_prepared"
        );

        let request = AnalysisRequest::new(
            prepared.into_encoded(),
            settings.grade,
            settings.task,
            settings.star_range,
        );
        let outcome = tokio::select! {
            _ = analysis_cancel.cancelled() => {
                debug!("analysis_cancelled");
                return;
            }
            outcome = orchestrator.analyze_with_report(&request) => outcome,
        };

        let Some(shared) = live(&weak, &cancel) else {
            debug!("analysis_result_discarded");
            return;
        };
        if analysis_cancel.is_cancelled() {
            return;
        }
        on_analysis_outcome(&shared, ticket, outcome, settings.timing);
    });
}

fn on_prepare_failed(shared: &Arc<Shared>, ticket: AnalysisTicket, error: PrepareError) {
    let mut inner = shared.lock();
    let outcome = match error {
        PrepareError::FrameNotReady => {
            info!("frame_not_ready");
            inner.lifecycle.abort(ticket)
        }
        other => {
            let failed = inner.lifecycle.fail(
                ticket,
                LifecycleFailure {
                    kind: FailureKind::ImagePreparation,
                    message: other.to_string(),
                },
            );
            if failed.is_ok() && inner.lifecycle.state() == LifecycleState::Error {
                shared.feedback.cue(FeedbackCue::Failed);
            }
            failed
        }
    };
    if let Err(error) = outcome {
        warn!(%error, "prepare_failure_not_recorded");
    }
    shared.publish(&inner);
}

fn on_analysis_outcome(
    shared: &Arc<Shared>,
    ticket: AnalysisTicket,
    outcome: AnalysisOutcome,
    timing: SessionTiming,
) {
    let mut inner = shared.lock();
    let AnalysisOutcome { result, report } = outcome;
    match inner.lifecycle.on_analysis_result(ticket, result, report.failure) {
        Ok(AnalysisTransition::Detected(dwell)) => {
            shared.feedback.cue(FeedbackCue::Detected);
            spawn_dwell(shared, dwell, timing.dwell);
        }
        Ok(AnalysisTransition::Failed(failure)) => {
            info!(kind = ?failure.kind, attempts = report.attempts, "analysis_failed");
            shared.feedback.cue(FeedbackCue::Failed);
        }
        Ok(AnalysisTransition::Ignored) => {}
        Err(error) => warn!(%error, "analysis_result_rejected"),
    }
    shared.publish(&inner);
}

fn spawn_dwell(shared: &Arc<Shared>, ticket: DwellTicket, dwell: Duration) {
    let weak = Arc::downgrade(shared);
    let cancel = shared.cancel.clone();
    tokio::spawn(async move {
        if let Some(shared) = sleep_live(&weak, &cancel, dwell).await {
            on_dwell_elapsed(&shared, ticket);
        }
    });
}

fn on_dwell_elapsed(shared: &Arc<Shared>, ticket: DwellTicket) {
    let mut inner = shared.lock();
    if !inner.lifecycle.on_dwell_elapsed(ticket) {
        return;
    }
    if let Some(result) = inner.lifecycle.result().cloned() {
        inner.confirmation.open(&result);
    }
    shared.publish(&inner);
}
