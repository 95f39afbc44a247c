use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Duration;

use super::{PromptRequest, ReasoningService};
use crate::{enricher_config::ClassifyConfig, error::ReasoningError, HttpClient};

/// Chat completions client for the reasoning service.
pub struct OpenAiReasoner {
    http_client: HttpClient,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f64,
    timeout: Duration,
}

impl OpenAiReasoner {
    pub fn new(http_client: HttpClient, api_key: String, config: &ClassifyConfig) -> Self {
        Self {
            http_client,
            api_key,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl ReasoningService for OpenAiReasoner {
    async fn complete(&self, request: &PromptRequest) -> Result<String, ReasoningError> {
        let resp = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&json!(
              {
                "model": &self.model,
                "temperature": self.temperature,
                "messages": [
                  { "role": "system", "content": &request.system },
                  { "role": "user", "content": &request.user }
                ],
                "response_format": { "type": "json_object" }
              }
            ))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        let parsed = serde_json::from_str::<ChatApiResponseOrError>(&body).map_err(|e| {
            if status.is_success() {
                ReasoningError::Malformed(format!("Could not parse chat response: {}", e))
            } else {
                error_for_status(status, &body)
            }
        })?;

        let parsed = match parsed {
            ChatApiResponseOrError::Error(ChatApiErrorBody { error }) => {
                return Err(error_for_api_error(status, &error));
            }
            ChatApiResponseOrError::Response(parsed) => parsed,
        };

        if let Some(usage) = parsed.usage {
            tracing::debug!("Reasoning call used {} tokens", usage.total_tokens);
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ReasoningError::Malformed("No choices in response".to_string()))
    }
}

fn error_for_status(status: StatusCode, body: &str) -> ReasoningError {
    let message = format!("{}: {}", status, body.chars().take(200).collect::<String>());
    match status {
        StatusCode::TOO_MANY_REQUESTS => ReasoningError::RateLimited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ReasoningError::Unauthorized(message),
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => ReasoningError::Rejected(message),
        _ => ReasoningError::Request(message),
    }
}

fn error_for_api_error(status: StatusCode, error: &ChatApiError) -> ReasoningError {
    let code = error.code.as_deref().or(error.error_type.as_deref());
    if code == Some("insufficient_quota") {
        return ReasoningError::QuotaExhausted(error.message.clone());
    }
    if status.is_success() {
        return ReasoningError::Request(error.message.clone());
    }
    error_for_status(status, &error.message)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: i32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<PromptUsage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiErrorBody {
    pub error: ChatApiError,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Response(ChatApiResponse),
    Error(ChatApiErrorBody),
}
