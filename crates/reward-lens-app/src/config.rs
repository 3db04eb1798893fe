//! Environment-driven configuration.

use std::str::FromStr;
use std::sync::Arc;

use reward_lens_analysis::{
    AnalysisMode, AnalysisOrchestrator, AnalysisService, ApiKey, DEFAULT_ENDPOINT, DEFAULT_MODEL,
    HttpAnalysisService, HttpServiceConfig, RetryPolicy, Simulator,
};
use reward_lens_core::{Difficulty, GradeLevel, TaskType};
use tracing::info;

use crate::{AppError, DEFAULT_LOG_FILTER, SessionSettings};

/// Service credential.
pub const ENV_API_KEY: &str = "REWARD_LENS_API_KEY";
/// Credential name checked when [`ENV_API_KEY`] is unset.
pub const ENV_API_KEY_FALLBACK: &str = "GEMINI_API_KEY";
/// HTTPS base URL of the analysis service.
pub const ENV_ENDPOINT: &str = "REWARD_LENS_ENDPOINT";
/// Model id.
pub const ENV_MODEL: &str = "REWARD_LENS_MODEL";
/// `remote-only`, `fallback`, or `simulated`.
pub const ENV_ANALYSIS_MODE: &str = "REWARD_LENS_ANALYSIS_MODE";
/// `lower` or `upper`.
pub const ENV_GRADE: &str = "REWARD_LENS_GRADE";
/// `general`, `academic`, or `creative`.
pub const ENV_TASK: &str = "REWARD_LENS_TASK";
/// `easy`, `medium`, or `hard`.
pub const ENV_DIFFICULTY: &str = "REWARD_LENS_DIFFICULTY";
/// `tracing` filter directive.
pub const ENV_LOG: &str = "REWARD_LENS_LOG";

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Credential; `None` disables the remote service.
    pub api_key: Option<ApiKey>,
    /// Service base URL.
    pub endpoint: String,
    /// Model id.
    pub model: String,
    /// Remote/simulator policy.
    pub mode: AnalysisMode,
    /// Audience grade band.
    pub grade: GradeLevel,
    /// Kind of work being rewarded.
    pub task: TaskType,
    /// Star range preset.
    pub difficulty: Difficulty,
    /// `tracing` filter directive.
    pub log_filter: String,
}

impl AppConfig {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] for invalid values.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`. Blank values count as unset.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] for invalid values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_key = get(ENV_API_KEY)
            .or_else(|| get(ENV_API_KEY_FALLBACK))
            .map(ApiKey::new)
            .transpose()?;

        Ok(Self {
            api_key,
            endpoint: get(ENV_ENDPOINT).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: get(ENV_MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            mode: parse_or_default(get(ENV_ANALYSIS_MODE))?,
            grade: parse_or(get(ENV_GRADE), GradeLevel::Lower)?,
            task: parse_or(get(ENV_TASK), TaskType::General)?,
            difficulty: parse_or(get(ENV_DIFFICULTY), Difficulty::Medium)?,
            log_filter: get(ENV_LOG).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }

    /// Session settings derived from this configuration.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            grade: self.grade,
            task: self.task,
            star_range: self.difficulty.star_range(),
            ..SessionSettings::default()
        }
    }

    /// Builds the orchestrator; the HTTP service is attached only when a
    /// credential is configured.
    ///
    /// # Errors
    /// Returns [`AppError::Service`] for an invalid endpoint or model.
    pub fn build_orchestrator(&self) -> Result<AnalysisOrchestrator, AppError> {
        let service = match &self.api_key {
            Some(api_key) if self.mode != AnalysisMode::SimulatedOnly => {
                let service = HttpAnalysisService::new(HttpServiceConfig {
                    endpoint: self.endpoint.clone(),
                    model: self.model.clone(),
                    ..HttpServiceConfig::new(api_key.clone())
                })?;
                Some(Arc::new(service) as Arc<dyn AnalysisService>)
            }
            _ => None,
        };

        info!(
            mode = ?self.mode,
            remote = service.is_some(),
            model = %self.model,
            "orchestrator_configured"
        );

        Ok(AnalysisOrchestrator::new(
            self.mode,
            RetryPolicy::default(),
            service,
            Simulator::default(),
        )?)
    }
}

fn parse_or<T>(raw: Option<String>, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .parse()
            .map_err(|error: T::Err| AppError::Config(error.to_string())),
        None => Ok(default),
    }
}

fn parse_or_default<T>(raw: Option<String>) -> Result<T, AppError>
where
    T: FromStr + Default,
    T::Err: std::fmt::Display,
{
    parse_or(raw, T::default())
}
