//! `generateContent`-style HTTP implementation of [`AnalysisService`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reward_lens_analysis_contract::{
    RawAnalysisResponse, USER_PROMPT, parse_analysis_response, response_schema, system_instruction,
};
use reward_lens_core::AnalysisRequest;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::{AnalysisService, ServiceError};

/// Public Gemini API base URL.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default multimodal model id.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const API_KEY_HEADER: &str = "x-goog-api-key";
const DETAIL_LIMIT: usize = 200;

/// Service credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wraps a non-blank key.
    ///
    /// # Errors
    /// Returns [`ServiceError::InvalidConfig`] for blank input.
    pub fn new(raw: impl Into<String>) -> Result<Self, ServiceError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::InvalidConfig("api key must be non-empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Connection settings for [`HttpAnalysisService`].
#[derive(Debug, Clone)]
pub struct HttpServiceConfig {
    /// HTTPS base URL, without the `/models/...` suffix.
    pub endpoint: String,
    /// Model id.
    pub model: String,
    /// Credential.
    pub api_key: ApiKey,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpServiceConfig {
    /// Settings for the public endpoint and default model.
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Rejects non-HTTPS or unparsable endpoints.
///
/// # Errors
/// Returns [`ServiceError::InvalidConfig`] with the reason.
pub fn validate_service_endpoint(endpoint: &str) -> Result<Url, ServiceError> {
    let parsed = Url::parse(endpoint)
        .map_err(|error| ServiceError::InvalidConfig(format!("invalid endpoint url: {error}")))?;

    if parsed.scheme() != "https" {
        return Err(ServiceError::InvalidConfig(
            "analysis endpoint must use https".to_string(),
        ));
    }

    Ok(parsed)
}

/// Builds the JSON body for one analysis call.
pub fn build_request_body(request: &AnalysisRequest) -> Value {
    let image = request.image();
    let data = base64::engine::general_purpose::STANDARD.encode(&image.bytes);

    json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "inlineData": { "mimeType": image.mime_type, "data": data } },
                { "text": USER_PROMPT }
            ]
        }],
        "systemInstruction": {
            "parts": [{
                "text": system_instruction(
                    request.grade_level(),
                    request.task_type(),
                    request.star_range(),
                )
            }]
        },
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema()
        }
    })
}

/// Maps a non-success status and its body onto a [`ServiceError`].
pub fn classify_http_status(code: u16, body: &str) -> ServiceError {
    let detail: String = body.chars().take(DETAIL_LIMIT).collect();
    let lowered = body.to_ascii_lowercase();

    if code == 429 || body.contains("RESOURCE_EXHAUSTED") || lowered.contains("quota") {
        return ServiceError::RateLimited(detail);
    }
    if code == 503 || lowered.contains("overloaded") {
        return ServiceError::Overloaded(detail);
    }
    match code {
        401 | 403 => ServiceError::Unauthorized(detail),
        _ => ServiceError::Status { code, detail },
    }
}

/// Remote analysis over HTTPS.
pub struct HttpAnalysisService {
    client: reqwest::Client,
    url: Url,
    api_key: ApiKey,
}

impl HttpAnalysisService {
    /// Validates the configuration and builds the client.
    ///
    /// # Errors
    /// Returns [`ServiceError::InvalidConfig`] for a bad endpoint or model, or
    /// when the HTTP client cannot be built.
    pub fn new(config: HttpServiceConfig) -> Result<Self, ServiceError> {
        let base = validate_service_endpoint(&config.endpoint)?;
        let model = config.model.trim();
        if model.is_empty() || model.contains('/') {
            return Err(ServiceError::InvalidConfig(format!(
                "invalid model id {model:?}"
            )));
        }

        let url = Url::parse(&format!(
            "{}/models/{model}:generateContent",
            base.as_str().trim_end_matches('/')
        ))
        .map_err(|error| ServiceError::InvalidConfig(error.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ServiceError::InvalidConfig(error.to_string()))?;

        Ok(Self {
            client,
            url,
            api_key: config.api_key,
        })
    }

    /// Full request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    fn name(&self) -> &'static str {
        "gemini-http"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<RawAnalysisResponse, ServiceError> {
        let body = build_request_body(request);
        debug!(url = %self.url, bytes = request.image().bytes.len(), "analysis_request");

        let response = self
            .client
            .post(self.url.clone())
            .header(API_KEY_HEADER, self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(classify_http_status(status.as_u16(), &text));
        }

        let envelope: Value = serde_json::from_str(&text)
            .map_err(|error| ServiceError::InvalidResponse(error.to_string()))?;
        let candidate_text = first_candidate_text(&envelope).ok_or_else(|| {
            ServiceError::InvalidResponse("no response text from service".to_string())
        })?;

        Ok(parse_analysis_response(&candidate_text)?)
    }
}

fn first_candidate_text(envelope: &Value) -> Option<String> {
    let parts = envelope
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    (!text.trim().is_empty()).then_some(text)
}

fn map_transport_error(error: reqwest::Error) -> ServiceError {
    if error.is_timeout() {
        ServiceError::Timeout
    } else {
        ServiceError::Transport(error.without_url().to_string())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for envelope extraction and key handling.

    use super::*;

    #[test]
    fn candidate_parts_are_concatenated() {
        let envelope = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"detected\":" }, { "text": "true}" }] }
            }]
        });
        assert_eq!(
            first_candidate_text(&envelope).as_deref(),
            Some("{\"detected\":true}")
        );
    }

    #[test]
    fn missing_candidates_yield_none() {
        assert_eq!(first_candidate_text(&json!({ "candidates": [] })), None);
        assert_eq!(
            first_candidate_text(&json!({
                "candidates": [{ "content": { "parts": [{ "text": "  " }] } }]
            })),
            None
        );
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("secret-value").unwrap();
        assert_eq!(format!("{key:?}"), "ApiKey(<redacted>)");
        assert!(ApiKey::new("   ").is_err());
    }

    #[test]
    fn service_url_includes_model_route() {
        let service = HttpAnalysisService::new(HttpServiceConfig::new(ApiKey::new("k").unwrap()))
            .unwrap();
        assert_eq!(
            service.url().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }
}
