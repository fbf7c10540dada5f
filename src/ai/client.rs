//! `TextGenerator` trait and the `GenerativeApiClient` implementation.
//!
//! `GenerativeApiClient` calls a `generateContent` style endpoint:
//! `POST {base_url}/v1beta/models/{model}:generateContent?key=…` with
//! `{"contents":[{"parts":[{"text": …}]}]}` and reads the reply from
//! `candidates[0].content.parts[0].text`.
//! All connection details come from [`AiConfig`]; nothing is hardcoded.

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AiConfig;

// ---------------------------------------------------------------------------
// AiError
// ---------------------------------------------------------------------------

/// Errors that can occur while asking the AI text service.
#[derive(Debug, Error)]
pub enum AiError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("AI request timed out")]
    Timeout,

    /// Non-success HTTP status.
    #[error("AI service answered {status}: {body}")]
    Status { status: u16, body: String },

    /// The HTTP response could not be parsed as expected JSON.
    #[error("failed to parse AI response: {0}")]
    Parse(String),

    /// The reply carried no usable text.
    #[error("AI returned an empty response")]
    EmptyResponse,

    /// The blocking bridge could not start its runtime.
    #[error("async runtime unavailable: {0}")]
    Runtime(String),
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AiError::Timeout
        } else {
            AiError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// TextGenerator trait
// ---------------------------------------------------------------------------

/// Async trait for turning a prompt into a reply.
///
/// Implementors must be `Send + Sync` so they can be shared as
/// `Arc<dyn TextGenerator>`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AiError>;
}

// ---------------------------------------------------------------------------
// GenerativeApiClient
// ---------------------------------------------------------------------------

pub struct GenerativeApiClient {
    client: reqwest::Client,
    config: AiConfig,
}

impl GenerativeApiClient {
    /// Build a client from application config.
    ///
    /// The HTTP client carries the per-request timeout from
    /// `config.timeout_secs`.  A default client is used if the builder
    /// fails.
    pub fn from_config(config: &AiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }

    /// `{base}/v1beta/models/{model}:generateContent` without the key.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// Transcript with the configured prefix applied.
    pub fn prompt_for(&self, text: &str) -> String {
        match self.config.prompt_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}{text}"),
            _ => text.to_string(),
        }
    }
}

/// Request body for a single-turn prompt.
pub fn request_body(prompt: &str) -> serde_json::Value {
    serde_json::json!({
        "contents": [
            { "parts": [ { "text": prompt } ] }
        ]
    })
}

/// Pull `candidates[0].content.parts[0].text` out of a reply.
pub fn parse_reply(json: &serde_json::Value) -> Result<String, AiError> {
    if let Some(message) = json["error"]["message"].as_str() {
        return Err(AiError::Parse(format!("service error: {message}")));
    }
    let text = json["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or(AiError::EmptyResponse)?
        .trim()
        .to_string();

    if text.is_empty() {
        return Err(AiError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for GenerativeApiClient {
    /// The `key` query parameter is attached only when `config.api_key` is
    /// non-empty.
    async fn generate(&self, prompt: &str) -> Result<String, AiError> {
        let body = request_body(&self.prompt_for(prompt));

        let mut req = self.client.post(self.endpoint()).json(&body);
        if !self.config.api_key.is_empty() {
            req = req.query(&[("key", self.config.api_key.as_str())]);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;

        parse_reply(&json)
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Generator that returns canned replies and records prompts.
#[cfg(test)]
pub struct MockGenerator {
    reply: Result<String, String>,
    pub prompts: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, AiError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().map_err(AiError::Request)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(prefix: Option<&str>) -> AiConfig {
        AiConfig {
            base_url: "https://ai.test/".into(),
            model: "flash".into(),
            api_key: "k".into(),
            prompt_prefix: prefix.map(str::to_string),
            ..AiConfig::default()
        }
    }

    #[test]
    fn endpoint_joins_base_and_model() {
        let client = GenerativeApiClient::from_config(&make_config(None));
        assert_eq!(
            client.endpoint(),
            "https://ai.test/v1beta/models/flash:generateContent"
        );
    }

    #[test]
    fn prefix_is_prepended() {
        let client = GenerativeApiClient::from_config(&make_config(Some("Be brief. ")));
        assert_eq!(client.prompt_for("what time is it"), "Be brief. what time is it");
        let plain = GenerativeApiClient::from_config(&make_config(Some("")));
        assert_eq!(plain.prompt_for("hi"), "hi");
    }

    #[test]
    fn request_body_shape() {
        let body = request_body("hello");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body.to_string(), r#"{"contents":[{"parts":[{"text":"hello"}]}]}"#);
    }

    #[test]
    fn parses_nested_reply() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"  It is sunny, with a light breeze.\n"}],"role":"model"},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(parse_reply(&json).unwrap(), "It is sunny, with a light breeze.");
    }

    #[test]
    fn missing_or_blank_reply_is_empty_response() {
        let none: serde_json::Value = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(parse_reply(&none), Err(AiError::EmptyResponse)));
        let blank: serde_json::Value =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#).unwrap();
        assert!(matches!(parse_reply(&blank), Err(AiError::EmptyResponse)));
    }

    #[test]
    fn service_error_is_reported() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"error":{"code":400,"message":"API key not valid"}}"#).unwrap();
        match parse_reply(&json) {
            Err(AiError::Parse(msg)) => assert!(msg.contains("API key not valid")),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn generator_is_object_safe() {
        let generator: Box<dyn TextGenerator> =
            Box::new(GenerativeApiClient::from_config(&make_config(None)));
        drop(generator);
    }

    #[tokio::test]
    async fn mock_records_prompts() {
        let mock = MockGenerator::replying("Sure.");
        assert_eq!(mock.generate("tell me a joke").await.unwrap(), "Sure.");
        assert_eq!(*mock.prompts.lock().unwrap(), vec!["tell me a joke".to_string()]);
        let failing = MockGenerator::failing("down");
        assert!(matches!(failing.generate("x").await, Err(AiError::Request(_))));
    }
}
