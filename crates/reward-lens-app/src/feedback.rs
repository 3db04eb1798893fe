//! Operator feedback cues.

use tracing::debug;

/// Moments the operator is signaled about (sound, haptics, animation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedbackCue {
    /// Long press armed the countdown.
    CaptureArmed,
    /// Countdown shows this number.
    CountdownTick(u8),
    /// Shutter fired.
    CaptureFired,
    /// Analysis found a subject.
    Detected,
    /// Capture or analysis failed.
    Failed,
    /// Reward committed.
    Committed,
}

/// Receives feedback cues.
///
/// Called with session state locked; implementations must not call back into
/// the session.
pub trait FeedbackSink: Send + Sync {
    /// Delivers one cue.
    fn cue(&self, cue: FeedbackCue);
}

/// Sink that only logs cues.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFeedback;

impl FeedbackSink for TracingFeedback {
    fn cue(&self, cue: FeedbackCue) {
        debug!(?cue, "feedback_cue");
    }
}
