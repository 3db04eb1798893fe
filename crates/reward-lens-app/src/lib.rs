#![warn(missing_docs)]
//! # reward-lens-app
//!
//! ## Purpose
//! Wires camera, trigger, preparation, analysis, lifecycle, and confirmation
//! into one running capture session for `reward-lens`.
//!
//! ## Responsibilities
//! - Drive timers (long press, countdown, dwell) and the analysis pipeline on
//!   tokio, publishing snapshots through a watch channel.
//! - Load configuration from the environment.
//! - Emit operator feedback cues through an owned sink.
//! - Provide log redaction and build version helpers.
//!
//! ## Data flow
//! Press/release -> [`CaptureSession`] -> capture -> prepare -> analyze ->
//! lifecycle -> draft -> commit -> history.
//!
//! ## Ownership and lifetimes
//! The session owns all mutable state behind one mutex that is never held
//! across an await. Spawned tasks hold only a weak reference plus the
//! session's cancellation token.
//!
//! ## Error model
//! Subsystem failures are wrapped in [`AppError`]. Failures inside the
//! pipeline never surface as errors; they move the lifecycle to `Error`.
//!
//! ## Security and privacy notes
//! - API keys are redacted from debug output and never logged.
//! - [`redact_sensitive`] scrubs credential markers from error strings.

mod config;
mod feedback;
mod session;

use reward_lens_analysis::{OrchestratorError, ServiceError};
use reward_lens_capture::CaptureError;
use reward_lens_lifecycle::LifecycleError;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub use config::{
    AppConfig, ENV_ANALYSIS_MODE, ENV_API_KEY, ENV_API_KEY_FALLBACK, ENV_DIFFICULTY, ENV_ENDPOINT,
    ENV_GRADE, ENV_LOG, ENV_MODEL, ENV_TASK,
};
pub use feedback::{FeedbackCue, FeedbackSink, TracingFeedback};
pub use session::{CaptureSession, SessionSettings, SessionSnapshot, SessionTiming};

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("REWARD_LENS_VERSION");

/// Log filter used when `REWARD_LENS_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Installs the global `tracing` subscriber. Later calls are no-ops.
pub fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

const SECRET_MARKERS: [&str; 7] = [
    "api_key",
    "api-key",
    "apikey",
    "key=",
    "token",
    "authorization",
    "bearer",
];

/// Redacts common secret markers in log-safe output.
///
/// Everything from the first marker onward is replaced.
pub fn redact_sensitive(input: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let first = SECRET_MARKERS
        .iter()
        .filter_map(|marker| lower.find(marker).map(|position| (position, *marker)))
        .min_by_key(|(position, _)| *position);

    match first {
        Some((position, marker)) => {
            let label = marker.trim_end_matches('=');
            format!("{}{label}=<redacted>", &input[..position])
        }
        None => input.to_string(),
    }
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
    /// Camera failure.
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    /// Illegal lifecycle or draft operation.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
    /// Service construction failure.
    #[error("analysis service error: {0}")]
    Service(#[from] ServiceError),
    /// Orchestrator construction failure.
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),
    /// Operation needs an idle session.
    #[error("session is busy")]
    Busy,
    /// Session was closed.
    #[error("session is closed")]
    Closed,
}
