//! Integration tests for retry, backoff, and degradation behavior.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    ScriptedService, detected_four_stars, fixture_request, overloaded, rate_limited, unauthorized,
};
use reward_lens_analysis::{
    AnalysisMode, AnalysisOrchestrator, AnalysisService, RATE_LIMITED_MESSAGE, ResultSource, RetryPolicy,
    Simulator, UNEXPECTED_MESSAGE, UNREACHABLE_MESSAGE,
};
use reward_lens_core::{FailureKind, TaskType};

fn orchestrator(mode: AnalysisMode, service: Arc<ScriptedService>) -> AnalysisOrchestrator {
    AnalysisOrchestrator::new(
        mode,
        RetryPolicy::default(),
        Some(service as Arc<dyn AnalysisService>),
        Simulator::with_seed(Duration::ZERO, 11),
    )
    .expect("default policy is valid")
    .with_jitter_seed(3)
}

#[tokio::test(start_paused = true)]
async fn orchestrator_retry_tests_transient_failures_stop_after_six_calls() {
    let service = Arc::new(ScriptedService::always(rate_limited));
    let orchestrator = orchestrator(AnalysisMode::RemoteWithSimulatedFallback, service.clone());
    let request = fixture_request(TaskType::General, 1, 5);

    let outcome = orchestrator.analyze_with_report(&request).await;

    assert_eq!(service.calls(), 6);
    assert_eq!(outcome.report.attempts, 6);
    assert_eq!(outcome.report.backoff_delays.len(), 5);
    assert!(
        outcome
            .report
            .backoff_delays
            .windows(2)
            .all(|pair| pair[0] <= pair[1])
    );
    assert!(outcome.report.backoff_delays[0] >= Duration::from_millis(4_000));
    assert!(outcome.report.backoff_delays[0] < Duration::from_millis(5_000));
    assert_eq!(outcome.report.source, ResultSource::Simulated);
    assert_eq!(
        outcome.report.failure,
        Some(FailureKind::TransientServiceFailure)
    );
    assert!(outcome.result.detected);
}

#[tokio::test(start_paused = true)]
async fn orchestrator_retry_tests_backoff_waits_on_the_clock() {
    let service = Arc::new(ScriptedService::new(
        vec![rate_limited(), overloaded()],
        detected_four_stars,
    ));
    let orchestrator = orchestrator(AnalysisMode::RemoteOnly, service.clone());
    let request = fixture_request(TaskType::Academic, 1, 5);

    let started = tokio::time::Instant::now();
    let outcome = orchestrator.analyze_with_report(&request).await;
    let waited = started.elapsed();

    assert_eq!(service.calls(), 3);
    let expected: Duration = outcome.report.backoff_delays.iter().sum();
    assert!(waited >= expected);
    assert!(expected >= Duration::from_millis(12_000));
    assert_eq!(outcome.report.source, ResultSource::Remote);
    assert_eq!(outcome.report.failure, None);
    assert_eq!(outcome.result.stars, 4);
    assert_eq!(outcome.result.message, "Lovely neat handwriting!");
}

#[tokio::test(start_paused = true)]
async fn orchestrator_retry_tests_permanent_failure_is_not_retried() {
    let service = Arc::new(ScriptedService::always(unauthorized));
    let orchestrator = orchestrator(AnalysisMode::RemoteOnly, service.clone());
    let request = fixture_request(TaskType::General, 2, 4);

    let outcome = orchestrator.analyze_with_report(&request).await;

    assert_eq!(service.calls(), 1);
    assert!(outcome.report.backoff_delays.is_empty());
    assert!(!outcome.result.detected);
    assert_eq!(outcome.result.message, UNEXPECTED_MESSAGE);
    assert_eq!(outcome.result.stars, 2);
    assert_eq!(outcome.report.source, ResultSource::Unavailable);
    assert_eq!(
        outcome.report.failure,
        Some(FailureKind::PermanentServiceFailure)
    );
}

#[tokio::test(start_paused = true)]
async fn orchestrator_retry_tests_remote_only_reports_busy_after_rate_limits() {
    let service = Arc::new(ScriptedService::always(rate_limited));
    let orchestrator = orchestrator(AnalysisMode::RemoteOnly, service.clone());
    let request = fixture_request(TaskType::Creative, 3, 5);

    let result = orchestrator.analyze(&request).await;

    assert_eq!(service.calls(), 6);
    assert!(!result.detected);
    assert_eq!(result.message, RATE_LIMITED_MESSAGE);
    assert_eq!(result.stars, 3);
}

#[tokio::test(start_paused = true)]
async fn orchestrator_retry_tests_remote_only_reports_unreachable_after_overload() {
    let service = Arc::new(ScriptedService::always(overloaded));
    let orchestrator = orchestrator(AnalysisMode::RemoteOnly, service.clone());
    let request = fixture_request(TaskType::General, 1, 5);

    let result = orchestrator.analyze(&request).await;

    assert_eq!(service.calls(), 6);
    assert!(!result.detected);
    assert_eq!(result.message, UNREACHABLE_MESSAGE);
}

#[tokio::test(start_paused = true)]
async fn orchestrator_retry_tests_permanent_failure_falls_back_to_simulator() {
    let service = Arc::new(ScriptedService::always(unauthorized));
    let orchestrator = orchestrator(AnalysisMode::RemoteWithSimulatedFallback, service.clone());
    let request = fixture_request(TaskType::General, 2, 4);

    let outcome = orchestrator.analyze_with_report(&request).await;

    assert_eq!(service.calls(), 1);
    assert_eq!(outcome.report.source, ResultSource::Simulated);
    assert!(outcome.result.detected);
    assert!((2..=4).contains(&outcome.result.stars));
}
