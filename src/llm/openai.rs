//! OpenAI-compatible chat completions backend.
//!
//! Both OpenAI and Gemini (through its OpenAI-compatible endpoint) speak
//! this protocol, so one client covers every configured provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{GenerateOptions, LlmClient, Message, Response};
use crate::error::LlmError;
use crate::retry::is_retryable_status;

const LLM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: usize,
}

/// Client for any `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiCompatClient {
    base_url: String,
    api_key: String,
    agent: ureq::Agent,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(LLM_TIMEOUT))
            .build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            agent: config.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn send(&self, body: &ChatRequest<'_>) -> Result<Response, LlmError> {
        let response = self
            .agent
            .post(self.endpoint().as_str())
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .send_json(body);

        match response {
            Ok(mut resp) => {
                let data: ChatResponse = resp.body_mut().read_json().map_err(|e| LlmError {
                    status: None,
                    message: format!("unreadable completion: {}", e),
                    transient: false,
                })?;
                let text = data
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| LlmError {
                        status: None,
                        message: "completion had no content".to_string(),
                        transient: true,
                    })?;
                Ok(Response {
                    text,
                    tokens_used: data.usage.map(|u| u.total_tokens),
                })
            }
            Err(ureq::Error::StatusCode(code)) => Err(LlmError {
                status: Some(code),
                message: format!("HTTP error {}", code),
                transient: is_retryable_status(code),
            }),
            Err(e @ (ureq::Error::Timeout(_) | ureq::Error::Io(_))) => Err(LlmError {
                status: None,
                message: format!("request failed: {}", e),
                transient: true,
            }),
            Err(e) => Err(LlmError {
                status: None,
                message: format!("request error: {}", e),
                transient: false,
            }),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn generate(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<Response, LlmError> {
        let client = self.clone();
        let model = model.to_string();
        let messages = messages.to_vec();
        let options = options.clone();

        tokio::task::spawn_blocking(move || {
            let body = ChatRequest {
                model: &model,
                messages: &messages,
                temperature: options.temperature,
                max_tokens: options.max_tokens,
            };
            client.send(&body)
        })
        .await
        .map_err(|e| LlmError {
            status: None,
            message: format!("LLM worker panicked: {}", e),
            transient: false,
        })?
    }
}
