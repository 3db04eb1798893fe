#![warn(missing_docs)]
//! # reward-lens-app binary
//!
//! Headless entry point: runs one tap capture against the synthetic camera
//! and commits the result.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use reward_lens_app::{
    AppConfig, CaptureSession, ENV_LOG, TracingFeedback, app_version, init_tracing,
    redact_sensitive,
};
use reward_lens_capture::SyntheticCamera;
use reward_lens_lifecycle::{InMemoryHistory, LifecycleState};
use tracing::{error, info};

const RUN_TIMEOUT: Duration = Duration::from_secs(300);

/// CLI entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log_filter);
    info!(version = app_version(), log_env = ENV_LOG, "reward_lens_starting");

    let orchestrator = match config.build_orchestrator() {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(error) => {
            error!(error = %redact_sensitive(&error.to_string()), "orchestrator_unavailable");
            return ExitCode::FAILURE;
        }
    };

    let session = CaptureSession::start(
        Arc::new(SyntheticCamera::default()),
        orchestrator,
        Box::new(InMemoryHistory::new()),
        Arc::new(TracingFeedback),
        config.session_settings(),
    );
    let mut snapshots = session.subscribe();

    if !session.press_start() {
        let failure = session.snapshot().failure;
        eprintln!(
            "capture not possible: {}",
            failure.map(|failure| failure.message).unwrap_or_default()
        );
        return ExitCode::FAILURE;
    }
    session.press_end();

    let state = tokio::time::timeout(
        RUN_TIMEOUT,
        snapshots.wait_for(|snapshot| {
            matches!(snapshot.state, LifecycleState::Success | LifecycleState::Error)
        }),
    )
    .await
    .ok()
    .and_then(Result::ok)
    .map(|snapshot| snapshot.state);

    let Some(state) = state else {
        eprintln!("analysis did not finish in time");
        session.close();
        return ExitCode::FAILURE;
    };

    let code = match state {
        LifecycleState::Success => match session.commit() {
            Ok(Some(reward)) => {
                println!("reward-lens {} | {} star(s): {}", app_version(), reward.stars, reward.message);
                ExitCode::SUCCESS
            }
            Ok(None) => ExitCode::SUCCESS,
            Err(error) => {
                eprintln!("commit failed: {error}");
                ExitCode::FAILURE
            }
        },
        _ => {
            let snapshot = session.snapshot();
            let message = snapshot
                .failure
                .map(|failure| failure.message)
                .unwrap_or_default();
            println!("no reward: {message}");
            ExitCode::FAILURE
        }
    };

    session.close();
    code
}
