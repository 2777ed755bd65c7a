//! OpenAI-compatible chat completion client backing the intent parser.

use crate::config::ParserConfig;
use crate::domain::errors::CapabilityError;
use crate::domain::repositories::completion_client::{
    CompletionClient, CompletionRequest, ResponseFormat,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

/// Response body excerpt kept in errors
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Clone)]
pub struct ChatCompletionClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    timeout_ms: u64,
}

impl ChatCompletionClient {
    /// Returns `NotConfigured` when AI parsing is disabled or has no key
    pub fn from_config(config: &ParserConfig) -> Result<Self, CapabilityError> {
        let api_key = match (&config.ai_api_key, config.ai_enabled) {
            (Some(key), true) if !key.trim().is_empty() => key.clone(),
            _ => return Err(CapabilityError::NotConfigured),
        };

        let client = Client::builder()
            .timeout(config.ai_timeout())
            .build()
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.ai_api_url.clone(),
            api_key,
            model: config.ai_model.clone(),
            timeout_ms: config.ai_timeout_ms,
        })
    }

    fn payload(&self, request: &CompletionRequest) -> serde_json::Value {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: request.system_prompt.clone(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: request.user_prompt.clone(),
            },
        ];

        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "stream": false
        });
        if request.response_format == ResponseFormat::JsonObject {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        payload
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CapabilityError> {
        debug!("Sending completion request (model: {})", self.model);

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.payload(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Timeout(self.timeout_ms)
                } else {
                    CapabilityError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(
                body.char_indices()
                    .nth(MAX_ERROR_BODY)
                    .map_or(body.len(), |(i, _)| i),
            );
            error!("Completion API error ({}): {}", status, body);
            return Err(CapabilityError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Schema(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| CapabilityError::Schema("completion has no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> ParserConfig {
        ParserConfig {
            ai_enabled: true,
            ai_api_key: Some("sk-test".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_config_requires_key_and_flag() {
        assert!(matches!(
            ChatCompletionClient::from_config(&ParserConfig::default()),
            Err(CapabilityError::NotConfigured)
        ));

        let no_key = ParserConfig {
            ai_enabled: true,
            ..Default::default()
        };
        assert!(ChatCompletionClient::from_config(&no_key).is_err());
        assert!(ChatCompletionClient::from_config(&enabled_config()).is_ok());
    }

    #[test]
    fn test_payload_requests_json_object() {
        let client = ChatCompletionClient::from_config(&enabled_config()).unwrap();
        let payload = client.payload(&CompletionRequest::json("system", "BTC long", 0.0));

        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "BTC long");
        assert_eq!(payload["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_completion_response_decodes() {
        let raw = r#"{"id":"x","model":"m","choices":[{"message":{"role":"assistant","content":"{}"},"finish_reason":"stop"}]}"#;
        let response: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.choices[0].message.content, "{}");
    }
}
