//! AI completion capability used by the intent parser.

use crate::domain::errors::CapabilityError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub response_format: ResponseFormat,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn json(system_prompt: impl Into<String>, user_prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            response_format: ResponseFormat::JsonObject,
            temperature,
        }
    }
}

/// `complete(system_prompt, user_prompt, response_format, temperature) -> text`
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CapabilityError>;
}
