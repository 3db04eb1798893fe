#![warn(missing_docs)]
//! # reward-lens-capture
//!
//! ## Purpose
//! Provides camera acquisition and the capture trigger state machine.
//!
//! ## Responsibilities
//! - Define a backend-agnostic camera device trait.
//! - Enforce exclusive stream ownership through [`CameraSession`].
//! - Expose a deterministic synthetic camera for CI and unit tests.
//! - Decide when a capture fires: immediate tap, or long press followed by a
//!   3-2-1 countdown ([`CaptureController`]).
//!
//! ## Data flow
//! Operator press/release events -> [`CaptureController`] -> `Fire` ->
//! [`CameraSession::capture`] reads a [`Frame`] -> image preparation.
//!
//! ## Ownership and lifetimes
//! [`StreamHandle`] values are moved into [`CameraDevice::release`], so a
//! released handle cannot be used again. [`CameraSession`] releases its stream
//! on drop.
//!
//! ## Error model
//! Acquisition and read failures are reported as [`CaptureError`] values and
//! are never retried here; the caller surfaces them as a distinct error state.
//!
//! ## Timing model
//! The controller holds no clocks. The caller schedules timers and reports
//! their expiry with the [`TriggerTicket`] it was handed; tickets from an
//! earlier interaction are ignored.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reward_lens_core::Frame;
use thiserror::Error;
use tracing::{debug, info};

/// Hold duration after which a press arms the countdown.
pub const LONG_PRESS_THRESHOLD: Duration = Duration::from_millis(600);

/// Interval between countdown ticks.
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// First value shown when the countdown arms.
pub const COUNTDOWN_START: u8 = 3;

/// Camera direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Facing {
    /// Rear camera, pointed at the subject.
    #[default]
    Back,
    /// Front (selfie) camera; its preview is mirrored.
    Front,
}

impl Facing {
    /// Returns `true` when frames from this direction are horizontally mirrored.
    pub fn is_mirrored(self) -> bool {
        matches!(self, Self::Front)
    }

    /// Returns the opposite direction.
    pub fn toggled(self) -> Self {
        match self {
            Self::Back => Self::Front,
            Self::Front => Self::Back,
        }
    }
}

/// Opaque handle to one acquired camera stream.
#[derive(Debug, PartialEq, Eq)]
pub struct StreamHandle {
    id: u64,
    facing: Facing,
}

impl StreamHandle {
    /// Creates a handle; intended for [`CameraDevice`] implementations.
    pub fn new(id: u64, facing: Facing) -> Self {
        Self { id, facing }
    }

    /// Backend-assigned stream id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Direction the stream was opened with.
    pub fn facing(&self) -> Facing {
        self.facing
    }
}

/// Trait implemented by concrete camera providers.
pub trait CameraDevice: Send + Sync {
    /// Opens a stream for `facing`.
    ///
    /// # Errors
    /// Returns [`CaptureError::CameraUnavailable`] when the device is missing or
    /// permission is denied, and [`CaptureError::Busy`] when another stream is
    /// still open.
    fn acquire(&self, facing: Facing) -> Result<StreamHandle, CaptureError>;

    /// Closes a stream. Consumes the handle.
    fn release(&self, stream: StreamHandle);

    /// Reads the newest frame from `stream`.
    ///
    /// # Errors
    /// Returns [`CaptureError::UnknownStream`] for handles this device did not
    /// issue or already released.
    fn current_frame(&self, stream: &StreamHandle, captured_at_ms: u64)
    -> Result<Frame, CaptureError>;
}

/// Exclusive owner of at most one open camera stream.
pub struct CameraSession {
    device: Arc<dyn CameraDevice>,
    facing: Facing,
    stream: Option<StreamHandle>,
}

impl CameraSession {
    /// Creates a closed session that will open `facing` on [`Self::open`].
    pub fn new(device: Arc<dyn CameraDevice>, facing: Facing) -> Self {
        Self {
            device,
            facing,
            stream: None,
        }
    }

    /// Acquires the stream if it is not already open.
    ///
    /// # Errors
    /// Propagates device acquisition failures.
    pub fn open(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_none() {
            let stream = self.device.acquire(self.facing)?;
            info!(stream = stream.id(), facing = ?self.facing, "camera_acquired");
            self.stream = Some(stream);
        }
        Ok(())
    }

    /// Releases the current stream, flips direction, and reacquires.
    ///
    /// The old stream is always released before the new one is requested. On
    /// failure the session stays closed with the new direction selected.
    ///
    /// # Errors
    /// Propagates device acquisition failures.
    pub fn switch_facing(&mut self) -> Result<Facing, CaptureError> {
        self.close();
        self.facing = self.facing.toggled();
        self.open()?;
        Ok(self.facing)
    }

    /// Reads one frame together with its mirroring flag.
    ///
    /// # Errors
    /// Returns [`CaptureError::NotAcquired`] when the session is closed.
    pub fn capture(&self, captured_at_ms: u64) -> Result<(Frame, bool), CaptureError> {
        let stream = self.stream.as_ref().ok_or(CaptureError::NotAcquired)?;
        let frame = self.device.current_frame(stream, captured_at_ms)?;
        Ok((frame, stream.facing().is_mirrored()))
    }

    /// Releases the stream, if any.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            info!(stream = stream.id(), "camera_released");
            self.device.release(stream);
        }
    }

    /// Returns `true` while a stream is held.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Currently selected direction.
    pub fn facing(&self) -> Facing {
        self.facing
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Deterministic camera for tests and headless runs.
///
/// Frames are a horizontal gradient (red channel equals the column index
/// modulo 256) so mirroring is observable.
#[derive(Debug)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    available: AtomicBool,
    warmup_frames: AtomicU32,
    next_id: AtomicU64,
    open_streams: Mutex<Vec<u64>>,
    acquisitions: AtomicU64,
}

impl SyntheticCamera {
    /// Creates an available camera producing `width x height` frames.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            available: AtomicBool::new(true),
            warmup_frames: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
            open_streams: Mutex::new(Vec::new()),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Makes the next `count` frame reads return zero-sized frames.
    pub fn with_warmup(self, count: u32) -> Self {
        self.warmup_frames.store(count, Ordering::SeqCst);
        self
    }

    /// Toggles whether acquisition succeeds.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of streams currently open.
    pub fn open_stream_count(&self) -> usize {
        self.open_streams.lock().map(|open| open.len()).unwrap_or(0)
    }

    /// Number of successful acquisitions so far.
    pub fn acquisition_count(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new(64, 48)
    }
}

impl CameraDevice for SyntheticCamera {
    fn acquire(&self, facing: Facing) -> Result<StreamHandle, CaptureError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CaptureError::CameraUnavailable(
                "synthetic camera disabled".to_string(),
            ));
        }

        let mut open = self
            .open_streams
            .lock()
            .map_err(|_| CaptureError::Backend("synthetic stream lock poisoned".to_string()))?;
        if !open.is_empty() {
            return Err(CaptureError::Busy);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        open.push(id);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(StreamHandle::new(id, facing))
    }

    fn release(&self, stream: StreamHandle) {
        if let Ok(mut open) = self.open_streams.lock() {
            open.retain(|id| *id != stream.id());
        }
    }

    fn current_frame(
        &self,
        stream: &StreamHandle,
        captured_at_ms: u64,
    ) -> Result<Frame, CaptureError> {
        let open = self
            .open_streams
            .lock()
            .map_err(|_| CaptureError::Backend("synthetic stream lock poisoned".to_string()))?;
        if !open.contains(&stream.id()) {
            return Err(CaptureError::UnknownStream(stream.id()));
        }
        drop(open);

        let warming = self
            .warmup_frames
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if warming {
            return Frame::new(stream.id().to_string(), 0, 0, captured_at_ms, Vec::new())
                .map_err(|error| CaptureError::Backend(error.to_string()));
        }

        let mut rgba = Vec::with_capacity((self.width as usize) * (self.height as usize) * 4);
        for _ in 0..self.height {
            for x in 0..self.width {
                rgba.extend_from_slice(&[(x % 256) as u8, 64, 128, 255]);
            }
        }

        Frame::new(
            format!("synthetic-{}", stream.id()),
            self.width,
            self.height,
            captured_at_ms,
            rgba,
        )
        .map_err(|error| CaptureError::Backend(error.to_string()))
    }
}

/// What happens to an armed countdown when the press is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleasePolicy {
    /// The countdown runs to completion once armed.
    #[default]
    KeepCountdown,
    /// Releasing the press cancels the countdown.
    CancelCountdown,
}

/// Trigger phase shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPhase {
    /// Waiting for a press.
    Disarmed,
    /// Countdown visible; `remaining` is the number on screen.
    Armed {
        /// Seconds left before the capture fires.
        remaining: u8,
    },
    /// Capture handed to the pipeline.
    Firing,
}

/// Identifies the interaction a timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerTicket {
    generation: u64,
}

/// Result of releasing the press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// No press was in progress.
    Ignored,
    /// Short press: capture fires now.
    Fire,
    /// Countdown keeps running.
    CountdownContinues,
    /// Countdown was cancelled.
    CountdownCancelled,
}

/// Result of one countdown timer expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    /// Timer belonged to a superseded interaction.
    Stale,
    /// Countdown continues with this value on screen.
    Remaining(u8),
    /// Countdown reached zero; capture fires now.
    Fire,
}

/// Tap / long-press countdown state machine.
#[derive(Debug, Clone)]
pub struct CaptureController {
    phase: TriggerPhase,
    pressed: bool,
    generation: u64,
    release_policy: ReleasePolicy,
}

impl CaptureController {
    /// Creates a disarmed controller.
    pub fn new(release_policy: ReleasePolicy) -> Self {
        Self {
            phase: TriggerPhase::Disarmed,
            pressed: false,
            generation: 0,
            release_policy,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> TriggerPhase {
        self.phase
    }

    /// Returns `true` while the operator holds the trigger.
    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Configured release policy.
    pub fn release_policy(&self) -> ReleasePolicy {
        self.release_policy
    }

    /// Starts a press.
    ///
    /// Returns the ticket for the long-press timer, or `None` when capture is
    /// not allowed or an interaction is already running.
    pub fn press_start(&mut self, capture_allowed: bool) -> Option<TriggerTicket> {
        if !capture_allowed || self.pressed || self.phase != TriggerPhase::Disarmed {
            return None;
        }
        self.generation += 1;
        self.pressed = true;
        Some(self.ticket())
    }

    /// Ends a press.
    pub fn press_end(&mut self) -> ReleaseOutcome {
        if !self.pressed {
            return ReleaseOutcome::Ignored;
        }
        self.pressed = false;

        match self.phase {
            TriggerPhase::Disarmed => {
                // Supersedes the pending long-press timer.
                self.generation += 1;
                self.phase = TriggerPhase::Firing;
                debug!("capture_tap");
                ReleaseOutcome::Fire
            }
            TriggerPhase::Armed { .. } => match self.release_policy {
                ReleasePolicy::KeepCountdown => ReleaseOutcome::CountdownContinues,
                ReleasePolicy::CancelCountdown => {
                    self.reset();
                    debug!("countdown_cancelled");
                    ReleaseOutcome::CountdownCancelled
                }
            },
            TriggerPhase::Firing => ReleaseOutcome::Ignored,
        }
    }

    /// Reports expiry of the long-press timer.
    ///
    /// Returns the first countdown value when the countdown arms.
    pub fn long_press_elapsed(&mut self, ticket: TriggerTicket) -> Option<u8> {
        if ticket.generation != self.generation
            || !self.pressed
            || self.phase != TriggerPhase::Disarmed
        {
            return None;
        }
        self.phase = TriggerPhase::Armed {
            remaining: COUNTDOWN_START,
        };
        debug!(remaining = COUNTDOWN_START, "countdown_armed");
        Some(COUNTDOWN_START)
    }

    /// Reports expiry of one countdown tick.
    pub fn countdown_elapsed(&mut self, ticket: TriggerTicket) -> CountdownStep {
        if ticket.generation != self.generation {
            return CountdownStep::Stale;
        }
        let TriggerPhase::Armed { remaining } = self.phase else {
            return CountdownStep::Stale;
        };

        let remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            self.phase = TriggerPhase::Firing;
            self.pressed = false;
            CountdownStep::Fire
        } else {
            self.phase = TriggerPhase::Armed { remaining };
            CountdownStep::Remaining(remaining)
        }
    }

    /// Returns to `Disarmed` once the fired capture has been handed off.
    pub fn fired(&mut self) {
        if self.phase == TriggerPhase::Firing {
            self.phase = TriggerPhase::Disarmed;
        }
    }

    /// Cancels any press, timer, or countdown.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.pressed = false;
        self.phase = TriggerPhase::Disarmed;
    }

    fn ticket(&self) -> TriggerTicket {
        TriggerTicket {
            generation: self.generation,
        }
    }
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new(ReleasePolicy::default())
    }
}

/// Capture layer error type.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Device missing or permission denied.
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    /// Another stream is still open on the device.
    #[error("camera is busy with another stream")]
    Busy,
    /// Capture attempted without an open stream.
    #[error("camera stream has not been acquired")]
    NotAcquired,
    /// Handle unknown to the device or already released.
    #[error("unknown camera stream: {0}")]
    UnknownStream(u64),
    /// Backend runtime failure.
    #[error("camera backend failure: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for synthetic camera and trigger basics.

    use super::*;

    #[test]
    fn synthetic_camera_is_exclusive() {
        let camera = SyntheticCamera::new(4, 4);
        let first = camera.acquire(Facing::Back).expect("first acquire");
        assert!(matches!(camera.acquire(Facing::Front), Err(CaptureError::Busy)));
        camera.release(first);
        assert!(camera.acquire(Facing::Front).is_ok());
    }

    #[test]
    fn released_handle_cannot_read_frames() {
        let camera = SyntheticCamera::new(4, 4);
        let stream = camera.acquire(Facing::Back).expect("acquire");
        let stale = StreamHandle::new(stream.id(), Facing::Back);
        camera.release(stream);
        assert!(matches!(
            camera.current_frame(&stale, 1),
            Err(CaptureError::UnknownStream(_))
        ));
    }

    #[test]
    fn press_ignored_while_capture_disallowed() {
        let mut controller = CaptureController::default();
        assert!(controller.press_start(false).is_none());
        assert_eq!(controller.press_end(), ReleaseOutcome::Ignored);
        assert_eq!(controller.phase(), TriggerPhase::Disarmed);
    }
}
