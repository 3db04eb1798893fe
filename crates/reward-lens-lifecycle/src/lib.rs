#![warn(missing_docs)]
//! # reward-lens-lifecycle
//!
//! ## Purpose
//! Sequences one capture from analysis through confirmation, and records
//! confirmed rewards.
//!
//! ## Responsibilities
//! - Enforce the legal `Idle -> Analyzing -> Detected -> Success -> Idle`
//!   path plus its failure and recovery edges.
//! - Invalidate stale async completions through generation tickets.
//! - Hold the editable reward draft and produce a [`Reward`] on commit.
//! - Define the history collaborator boundary.
//!
//! ## Data flow
//! [`AnalysisResult`] -> [`RewardLifecycle::on_analysis_result`] -> dwell ->
//! [`ConfirmationStage`] -> [`Reward`] -> [`RewardHistory::append`].
//!
//! ## Ownership and lifetimes
//! The lifecycle owns the last result and failure. The confirmation stage
//! owns the draft until commit consumes it.
//!
//! ## Error model
//! Illegal transitions return [`LifecycleError::InvalidTransition`] and leave
//! state untouched. Stale tickets are ignored rather than treated as errors.

use std::fmt;

use reward_lens_core::{AnalysisResult, FailureKind, MAX_STARS, Reward};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Lifecycle states of one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Waiting for a capture.
    #[default]
    Idle,
    /// Analysis in flight.
    Analyzing,
    /// Subject found; dwell timer running.
    Detected,
    /// Draft open for confirmation.
    Success,
    /// Failure shown to the operator.
    Error,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Analyzing => "analyzing",
            Self::Detected => "detected",
            Self::Success => "success",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

impl LifecycleState {
    /// Returns whether `self -> next` is a legal edge.
    ///
    /// `reset` bypasses this table.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Analyzing)
                | (Self::Idle, Self::Error) // camera failure
                | (Self::Analyzing, Self::Detected)
                | (Self::Analyzing, Self::Error)
                | (Self::Analyzing, Self::Idle) // frame not ready
                | (Self::Detected, Self::Success)
                | (Self::Success, Self::Idle)
                | (Self::Error, Self::Idle)
        )
    }
}

/// Failure shown in the `Error` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleFailure {
    /// Taxonomy entry.
    pub kind: FailureKind,
    /// Operator-facing text.
    pub message: String,
}

/// Identifies one analysis; stale once the generation moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisTicket {
    generation: u64,
}

/// Identifies one dwell timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DwellTicket {
    generation: u64,
}

/// What an analysis completion did to the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisTransition {
    /// Moved to `Detected`; schedule the dwell timer with this ticket.
    Detected(DwellTicket),
    /// Moved to `Error`.
    Failed(LifecycleFailure),
    /// Ticket was stale; nothing changed.
    Ignored,
}

/// Capture lifecycle state machine.
#[derive(Debug, Default)]
pub struct RewardLifecycle {
    state: LifecycleState,
    generation: u64,
    result: Option<AnalysisResult>,
    failure: Option<LifecycleFailure>,
}

impl RewardLifecycle {
    /// Creates an idle lifecycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Current generation; bumped by every new analysis and by `reset`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Last accepted analysis result.
    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    /// Failure shown in the `Error` state.
    pub fn failure(&self) -> Option<&LifecycleFailure> {
        self.failure.as_ref()
    }

    /// Captures are accepted only while idle.
    pub fn can_capture(&self) -> bool {
        self.state == LifecycleState::Idle
    }

    /// `Idle -> Analyzing`.
    ///
    /// # Errors
    /// Returns [`LifecycleError::InvalidTransition`] outside `Idle`.
    pub fn begin_analysis(&mut self) -> Result<AnalysisTicket, LifecycleError> {
        self.transition(LifecycleState::Analyzing)?;
        self.generation += 1;
        self.result = None;
        self.failure = None;
        Ok(AnalysisTicket {
            generation: self.generation,
        })
    }

    /// Applies an analysis completion.
    ///
    /// `failure` overrides the kind recorded for a `detected=false` result;
    /// it defaults to [`FailureKind::NotDetected`].
    ///
    /// # Errors
    /// Returns [`LifecycleError::InvalidTransition`] when the ticket is current
    /// but the lifecycle is not analyzing.
    pub fn on_analysis_result(
        &mut self,
        ticket: AnalysisTicket,
        result: AnalysisResult,
        failure: Option<FailureKind>,
    ) -> Result<AnalysisTransition, LifecycleError> {
        if !self.is_current(ticket.generation) {
            warn!(ticket = ticket.generation, current = self.generation, "stale_analysis_result");
            return Ok(AnalysisTransition::Ignored);
        }

        if result.detected {
            self.transition(LifecycleState::Detected)?;
            self.result = Some(result);
            return Ok(AnalysisTransition::Detected(DwellTicket {
                generation: self.generation,
            }));
        }

        let failure = LifecycleFailure {
            kind: failure.unwrap_or(FailureKind::NotDetected),
            message: result.message.clone(),
        };
        self.fail(ticket, failure.clone())?;
        self.result = Some(result);
        Ok(AnalysisTransition::Failed(failure))
    }

    /// `Analyzing -> Error` for failures outside the analysis result, such as
    /// image preparation. Stale tickets are ignored.
    ///
    /// # Errors
    /// Returns [`LifecycleError::InvalidTransition`] when not analyzing.
    pub fn fail(
        &mut self,
        ticket: AnalysisTicket,
        failure: LifecycleFailure,
    ) -> Result<(), LifecycleError> {
        if !self.is_current(ticket.generation) {
            return Ok(());
        }
        self.transition(LifecycleState::Error)?;
        info!(kind = ?failure.kind, "capture_failed");
        self.failure = Some(failure);
        Ok(())
    }

    /// `Detected -> Success` when `ticket` is still current.
    ///
    /// Returns `true` when the transition happened.
    pub fn on_dwell_elapsed(&mut self, ticket: DwellTicket) -> bool {
        if !self.is_current(ticket.generation) || self.state != LifecycleState::Detected {
            return false;
        }
        self.transition(LifecycleState::Success).is_ok()
    }

    /// `Analyzing -> Idle` when the captured frame was not usable.
    ///
    /// # Errors
    /// Returns [`LifecycleError::InvalidTransition`] when not analyzing.
    pub fn abort(&mut self, ticket: AnalysisTicket) -> Result<(), LifecycleError> {
        if !self.is_current(ticket.generation) {
            return Ok(());
        }
        self.transition(LifecycleState::Idle)
    }

    /// `Idle -> Error` with [`FailureKind::CameraUnavailable`].
    ///
    /// # Errors
    /// Returns [`LifecycleError::InvalidTransition`] outside `Idle`.
    pub fn on_camera_failure(&mut self, message: impl Into<String>) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Error)?;
        self.failure = Some(LifecycleFailure {
            kind: FailureKind::CameraUnavailable,
            message: message.into(),
        });
        Ok(())
    }

    /// `Success -> Idle` after commit or discard.
    ///
    /// # Errors
    /// Returns [`LifecycleError::InvalidTransition`] outside `Success`.
    pub fn finish(&mut self) -> Result<(), LifecycleError> {
        if self.state != LifecycleState::Success {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                to: LifecycleState::Idle,
            });
        }
        self.transition(LifecycleState::Idle)?;
        self.result = None;
        Ok(())
    }

    /// `Error -> Idle`.
    ///
    /// # Errors
    /// Returns [`LifecycleError::InvalidTransition`] outside `Error`.
    pub fn dismiss(&mut self) -> Result<(), LifecycleError> {
        if self.state != LifecycleState::Error {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                to: LifecycleState::Idle,
            });
        }
        self.transition(LifecycleState::Idle)?;
        self.failure = None;
        Ok(())
    }

    /// Returns to `Idle` from any state and invalidates every ticket.
    pub fn reset(&mut self) {
        let from = self.state;
        self.generation += 1;
        self.state = LifecycleState::Idle;
        self.result = None;
        self.failure = None;
        info!(%from, generation = self.generation, "lifecycle_reset");
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    fn transition(&mut self, next: LifecycleState) -> Result<(), LifecycleError> {
        let current = self.state;
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "invalid_lifecycle_transition");
            return Err(LifecycleError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        self.state = next;
        info!(from = %current, to = %next, "lifecycle_transition");
        Ok(())
    }
}

/// Editable reward values before commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardDraft {
    /// Message the operator may edit.
    pub message: String,
    /// Star count the operator may edit (0-5).
    pub stars: u8,
}

/// Holds the draft between `Success` and commit.
#[derive(Debug, Default)]
pub struct ConfirmationStage {
    draft: Option<RewardDraft>,
}

impl ConfirmationStage {
    /// Creates an empty stage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes the draft from a detected result, replacing any previous one.
    pub fn open(&mut self, result: &AnalysisResult) {
        self.draft = Some(RewardDraft {
            message: result.message.clone(),
            stars: result.stars,
        });
    }

    /// Current draft.
    pub fn draft(&self) -> Option<&RewardDraft> {
        self.draft.as_ref()
    }

    /// Sets the draft star count.
    ///
    /// # Errors
    /// Returns [`LifecycleError::InvalidStars`] above 5 and
    /// [`LifecycleError::NoDraft`] without an open draft.
    pub fn set_stars(&mut self, stars: u8) -> Result<(), LifecycleError> {
        if stars > MAX_STARS {
            return Err(LifecycleError::InvalidStars(stars));
        }
        let draft = self.draft.as_mut().ok_or(LifecycleError::NoDraft)?;
        draft.stars = stars;
        Ok(())
    }

    /// Replaces the draft message.
    ///
    /// # Errors
    /// Returns [`LifecycleError::NoDraft`] without an open draft.
    pub fn set_message(&mut self, message: impl Into<String>) -> Result<(), LifecycleError> {
        let draft = self.draft.as_mut().ok_or(LifecycleError::NoDraft)?;
        draft.message = message.into();
        Ok(())
    }

    /// Consumes the draft into a [`Reward`]. `None` when no draft is open.
    pub fn commit(&mut self, now_ms: u64) -> Option<Reward> {
        let draft = self.draft.take()?;
        Some(Reward {
            id: uuid::Uuid::new_v4().to_string(),
            message: draft.message,
            stars: draft.stars,
            created_at_ms: now_ms,
        })
    }

    /// Drops the draft.
    pub fn discard(&mut self) {
        self.draft = None;
    }
}

/// Reward log collaborator.
pub trait RewardHistory: Send + Sync {
    /// Adds a reward at the front of the log.
    fn append(&mut self, reward: Reward);

    /// Removes a reward. Returns `true` when it existed.
    fn remove(&mut self, id: &str) -> bool;

    /// Replaces the message of a stored reward. Returns `true` when it existed.
    fn update(&mut self, id: &str, message: &str) -> bool;

    /// Removes every reward.
    fn clear(&mut self);

    /// Rewards, newest first.
    fn entries(&self) -> Vec<Reward>;

    /// Sum of all stored star counts.
    fn total_stars(&self) -> u64 {
        self.entries()
            .iter()
            .map(|reward| u64::from(reward.stars))
            .sum()
    }
}

/// Process-local history.
#[derive(Debug, Default, Clone)]
pub struct InMemoryHistory {
    rewards: Vec<Reward>,
}

impl InMemoryHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rewards.
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    /// Returns `true` when empty.
    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}

impl RewardHistory for InMemoryHistory {
    fn append(&mut self, reward: Reward) {
        self.rewards.insert(0, reward);
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.rewards.len();
        self.rewards.retain(|reward| reward.id != id);
        self.rewards.len() != before
    }

    fn update(&mut self, id: &str, message: &str) -> bool {
        match self.rewards.iter_mut().find(|reward| reward.id == id) {
            Some(reward) => {
                reward.message = message.to_string();
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.rewards.clear();
    }

    fn entries(&self) -> Vec<Reward> {
        self.rewards.clone()
    }

    fn total_stars(&self) -> u64 {
        self.rewards.iter().map(|reward| u64::from(reward.stars)).sum()
    }
}

/// Lifecycle and confirmation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// Edge not in the transition table.
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        /// State before the attempt.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },
    /// Star count above 5.
    #[error("stars must be within 0..=5, got {0}")]
    InvalidStars(u8),
    /// No draft is open.
    #[error("no reward draft is open")]
    NoDraft,
}

#[cfg(test)]
mod tests {
    //! Unit tests for the transition table.

    use super::*;

    #[test]
    fn illegal_edges_are_rejected() {
        type S = LifecycleState;
        assert!(!S::Idle.can_transition_to(S::Success));
        assert!(!S::Detected.can_transition_to(S::Idle));
        assert!(!S::Success.can_transition_to(S::Analyzing));
        assert!(!S::Error.can_transition_to(S::Analyzing));
        assert!(S::Analyzing.can_transition_to(S::Idle));
    }

    #[test]
    fn failed_begin_leaves_state_untouched() {
        let mut lifecycle = RewardLifecycle::new();
        lifecycle.begin_analysis().unwrap();
        let generation = lifecycle.generation();

        let error = lifecycle.begin_analysis().unwrap_err();
        assert_eq!(
            error,
            LifecycleError::InvalidTransition {
                from: LifecycleState::Analyzing,
                to: LifecycleState::Analyzing,
            }
        );
        assert_eq!(lifecycle.state(), LifecycleState::Analyzing);
        assert_eq!(lifecycle.generation(), generation);
    }

    #[test]
    fn stars_above_five_are_rejected() {
        let mut stage = ConfirmationStage::new();
        stage.open(&AnalysisResult {
            detected: true,
            message: "Great".to_string(),
            stars: 3,
            bounding_box: None,
        });
        assert_eq!(stage.set_stars(6), Err(LifecycleError::InvalidStars(6)));
        assert_eq!(stage.draft().map(|draft| draft.stars), Some(3));
        assert!(stage.set_stars(0).is_ok());
    }
}
