#![warn(missing_docs)]
//! # reward-lens-analysis
//!
//! ## Purpose
//! Orchestrates one image analysis: remote call, bounded retries, fallback
//! simulation, and result validation.
//!
//! ## Responsibilities
//! - Abstract the remote service behind [`AnalysisService`].
//! - Classify service failures into transient and permanent classes.
//! - Retry transient failures with exponential backoff and jitter.
//! - Degrade to the local [`Simulator`] or to an explicit `detected=false`
//!   result, as selected by [`AnalysisMode`].
//!
//! ## Data flow
//! [`AnalysisRequest`] -> [`AnalysisOrchestrator::analyze_with_report`] ->
//! service attempts (sequential) -> normalized [`AnalysisResult`] plus an
//! [`AnalysisReport`] describing how it was obtained.
//!
//! ## Error model
//! [`AnalysisOrchestrator::analyze`] never fails. Every service error ends in a
//! well-formed result; the report carries the terminal [`FailureKind`].
//!
//! ## Security and privacy notes
//! Neither image bytes nor the API key are logged. [`ApiKey`] redacts itself in
//! debug output.

mod http;
mod simulator;

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reward_lens_analysis_contract::{
    AnalysisContractError, RawAnalysisResponse, normalize_response,
};
use reward_lens_core::{AnalysisRequest, AnalysisResult, FailureKind};
use thiserror::Error;
use tracing::{info, warn};

pub use http::{
    ApiKey, DEFAULT_ENDPOINT, DEFAULT_MODEL, HttpAnalysisService, HttpServiceConfig,
    build_request_body, classify_http_status, validate_service_endpoint,
};
pub use simulator::{DEFAULT_SIMULATED_DELAY, Simulator, fallback_messages};

/// Shown when retries end on a rate-limit signal.
pub const RATE_LIMITED_MESSAGE: &str =
    "The analysis service is very busy right now (429). Please wait a moment and try again.";

/// Shown when retries end on an overload signal.
pub const UNREACHABLE_MESSAGE: &str =
    "Could not reach the analysis service. Please check the internet connection.";

/// Shown for permanent failures.
pub const UNEXPECTED_MESSAGE: &str = "Something unexpected went wrong. Please try again.";

/// Shown when remote analysis is mandatory but no service is configured.
pub const NOT_CONFIGURED_MESSAGE: &str = "The analysis service is not configured.";

/// How the orchestrator treats the remote service and the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    /// The service is mandatory; failures end in `detected=false`.
    RemoteOnly,
    /// Use the service when configured, otherwise or on failure simulate.
    #[default]
    RemoteWithSimulatedFallback,
    /// Never call the service.
    SimulatedOnly,
}

impl FromStr for AnalysisMode {
    type Err = OrchestratorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "remote-only" | "remote" => Ok(Self::RemoteOnly),
            "fallback" | "remote-with-fallback" => Ok(Self::RemoteWithSimulatedFallback),
            "simulated" | "simulated-only" => Ok(Self::SimulatedOnly),
            other => Err(OrchestratorError::InvalidMode(other.to_string())),
        }
    }
}

/// Exponential backoff settings for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
    /// Exclusive upper bound of the random jitter added to each delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 4_000,
            max_delay_ms: 120_000,
            jitter_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Checks the policy invariants.
    ///
    /// Jitter may not exceed the base delay; this keeps the delay sequence
    /// non-decreasing.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::InvalidPolicy`] when violated.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.jitter_ms > self.base_delay_ms {
            return Err(OrchestratorError::InvalidPolicy(
                "jitter_ms must not exceed base_delay_ms".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(OrchestratorError::InvalidPolicy(
                "max_delay_ms must be at least base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `retry_index` (zero-based) with `jitter_ms`
    /// of jitter already drawn.
    pub fn delay_for(&self, retry_index: u32, jitter_ms: u64) -> Duration {
        let factor = 1_u64.checked_shl(retry_index).unwrap_or(u64::MAX);
        let exponential = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(
            exponential
                .saturating_add(jitter_ms)
                .min(self.max_delay_ms),
        )
    }
}

/// Abstract remote analysis service.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Performs one analysis call. No retries.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<RawAnalysisResponse, ServiceError>;
}

/// Retry classification of a service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying after a delay.
    Transient,
    /// Retrying cannot help.
    Permanent,
}

/// Classifies a service error for retry decisions.
///
/// Only rate-limit and overload signals are transient.
pub fn classify_service_error(error: &ServiceError) -> FailureClass {
    match error {
        ServiceError::RateLimited(_) | ServiceError::Overloaded(_) => FailureClass::Transient,
        _ => FailureClass::Permanent,
    }
}

/// Where the final result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    /// Parsed from a service response.
    Remote,
    /// Generated by the local simulator.
    Simulated,
    /// No analysis possible; result is `detected=false`.
    Unavailable,
}

/// How one analysis was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    /// Service calls made.
    pub attempts: u32,
    /// Backoff waits, in order.
    pub backoff_delays: Vec<Duration>,
    /// Origin of the result.
    pub source: ResultSource,
    /// Terminal failure of the remote path, or `NotDetected` for a negative
    /// remote answer.
    pub failure: Option<FailureKind>,
}

impl AnalysisReport {
    fn new() -> Self {
        Self {
            attempts: 0,
            backoff_delays: Vec::new(),
            source: ResultSource::Remote,
            failure: None,
        }
    }
}

/// Result plus report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOutcome {
    /// Validated result.
    pub result: AnalysisResult,
    /// Provenance.
    pub report: AnalysisReport,
}

/// Capture-analysis orchestrator.
pub struct AnalysisOrchestrator {
    mode: AnalysisMode,
    policy: RetryPolicy,
    service: Option<Arc<dyn AnalysisService>>,
    simulator: Simulator,
    rng: Mutex<StdRng>,
}

impl AnalysisOrchestrator {
    /// Creates an orchestrator.
    ///
    /// `service` is `None` when no credential is configured.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::InvalidPolicy`] for an invalid retry policy.
    pub fn new(
        mode: AnalysisMode,
        policy: RetryPolicy,
        service: Option<Arc<dyn AnalysisService>>,
        simulator: Simulator,
    ) -> Result<Self, OrchestratorError> {
        policy.validate()?;
        Ok(Self {
            mode,
            policy,
            service,
            simulator,
            rng: Mutex::new(StdRng::from_os_rng()),
        })
    }

    /// Replaces the jitter source with a seeded one.
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Configured mode.
    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    /// Returns `true` when a remote service is configured.
    pub fn has_service(&self) -> bool {
        self.service.is_some()
    }

    /// Analyzes one image. Never fails.
    pub async fn analyze(&self, request: &AnalysisRequest) -> AnalysisResult {
        self.analyze_with_report(request).await.result
    }

    /// Analyzes one image and reports how the result was obtained.
    pub async fn analyze_with_report(&self, request: &AnalysisRequest) -> AnalysisOutcome {
        let mut report = AnalysisReport::new();

        let service = match (self.mode, &self.service) {
            (AnalysisMode::SimulatedOnly, _) | (AnalysisMode::RemoteWithSimulatedFallback, None) => {
                return self.simulated(request, report).await;
            }
            (AnalysisMode::RemoteOnly, None) => {
                report.source = ResultSource::Unavailable;
                report.failure = Some(FailureKind::PermanentServiceFailure);
                warn!("analysis_unconfigured");
                return AnalysisOutcome {
                    result: AnalysisResult::not_detected(
                        NOT_CONFIGURED_MESSAGE,
                        request.star_range(),
                    ),
                    report,
                };
            }
            (_, Some(service)) => Arc::clone(service),
        };

        let mut retries = 0_u32;
        loop {
            report.attempts += 1;
            match service.analyze(request).await {
                Ok(raw) => {
                    let result = normalize_response(raw, request.star_range());
                    if !result.detected {
                        report.failure = Some(FailureKind::NotDetected);
                    }
                    info!(
                        service = service.name(),
                        attempts = report.attempts,
                        detected = result.detected,
                        stars = result.stars,
                        "analysis_completed"
                    );
                    return AnalysisOutcome { result, report };
                }
                Err(error) => {
                    let class = classify_service_error(&error);
                    warn!(
                        service = service.name(),
                        attempt = report.attempts,
                        class = ?class,
                        %error,
                        "analysis_attempt_failed"
                    );

                    if class == FailureClass::Transient && retries < self.policy.max_retries {
                        let delay = self.policy.delay_for(retries, self.draw_jitter());
                        report.backoff_delays.push(delay);
                        info!(delay_ms = delay.as_millis() as u64, retry = retries + 1, "analysis_backoff");
                        tokio::time::sleep(delay).await;
                        retries += 1;
                        continue;
                    }

                    report.failure = Some(error.failure_kind());
                    return self.degrade(request, &error, report).await;
                }
            }
        }
    }

    async fn degrade(
        &self,
        request: &AnalysisRequest,
        error: &ServiceError,
        mut report: AnalysisReport,
    ) -> AnalysisOutcome {
        if self.mode == AnalysisMode::RemoteWithSimulatedFallback {
            warn!(attempts = report.attempts, "analysis_degraded_to_simulator");
            return self.simulated(request, report).await;
        }

        let message = match error {
            ServiceError::RateLimited(_) => RATE_LIMITED_MESSAGE,
            ServiceError::Overloaded(_) => UNREACHABLE_MESSAGE,
            _ => UNEXPECTED_MESSAGE,
        };
        report.source = ResultSource::Unavailable;
        AnalysisOutcome {
            result: AnalysisResult::not_detected(message, request.star_range()),
            report,
        }
    }

    async fn simulated(&self, request: &AnalysisRequest, mut report: AnalysisReport) -> AnalysisOutcome {
        report.source = ResultSource::Simulated;
        let result = self.simulator.simulate(request).await;
        info!(stars = result.stars, "analysis_simulated");
        AnalysisOutcome { result, report }
    }

    fn draw_jitter(&self) -> u64 {
        if self.policy.jitter_ms == 0 {
            return 0;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.random_range(0..self.policy.jitter_ms),
            Err(_) => 0,
        }
    }
}

/// Failure of one service call.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// HTTP 429 or quota exhaustion.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// HTTP 503 or model overload.
    #[error("service overloaded: {0}")]
    Overloaded(String),
    /// Credential rejected.
    #[error("credential rejected: {0}")]
    Unauthorized(String),
    /// Other non-success HTTP status.
    #[error("service returned status {code}: {detail}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response excerpt.
        detail: String,
    },
    /// Request timed out.
    #[error("request timed out")]
    Timeout,
    /// Connection-level failure.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Response violated the analysis contract.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// Endpoint, model, or key invalid.
    #[error("invalid service configuration: {0}")]
    InvalidConfig(String),
}

impl ServiceError {
    /// Maps the error onto the operator-facing taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match classify_service_error(self) {
            FailureClass::Transient => FailureKind::TransientServiceFailure,
            FailureClass::Permanent => FailureKind::PermanentServiceFailure,
        }
    }
}

impl From<AnalysisContractError> for ServiceError {
    fn from(error: AnalysisContractError) -> Self {
        Self::InvalidResponse(error.to_string())
    }
}

/// Orchestrator configuration errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Retry policy violates its invariants.
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),
    /// Unknown analysis mode name.
    #[error("unknown analysis mode: {0:?}")]
    InvalidMode(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for retry math and classification.

    use super::*;

    #[test]
    fn delays_double_and_respect_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 4_000,
            max_delay_ms: 20_000,
            jitter_ms: 1_000,
        };
        assert_eq!(policy.delay_for(0, 0), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(1, 999), Duration::from_millis(8_999));
        assert_eq!(policy.delay_for(2, 500), Duration::from_millis(16_500));
        assert_eq!(policy.delay_for(3, 0), Duration::from_millis(20_000));
        assert_eq!(policy.delay_for(63, 0), Duration::from_millis(20_000));
        assert_eq!(policy.delay_for(64, 0), Duration::from_millis(20_000));
    }

    #[test]
    fn jitter_larger_than_base_is_rejected() {
        let policy = RetryPolicy {
            jitter_ms: 5_000,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn only_rate_limit_and_overload_are_transient() {
        assert_eq!(
            classify_service_error(&ServiceError::RateLimited("429".into())),
            FailureClass::Transient
        );
        assert_eq!(
            classify_service_error(&ServiceError::Overloaded("503".into())),
            FailureClass::Transient
        );
        assert_eq!(
            classify_service_error(&ServiceError::Timeout),
            FailureClass::Permanent
        );
        assert_eq!(
            ServiceError::Unauthorized("bad key".into()).failure_kind(),
            FailureKind::PermanentServiceFailure
        );
    }

    #[test]
    fn mode_names_parse() {
        assert_eq!(
            "remote-only".parse::<AnalysisMode>().unwrap(),
            AnalysisMode::RemoteOnly
        );
        assert_eq!(
            "Simulated".parse::<AnalysisMode>().unwrap(),
            AnalysisMode::SimulatedOnly
        );
        assert!("sometimes".parse::<AnalysisMode>().is_err());
    }
}
