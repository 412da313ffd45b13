//! Client for an OpenAI-style chat completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AiError;

pub const DEFAULT_MODEL: &str = "meta-llama/llama-4-maverick-17b-128e-instruct";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.7;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const EMPTY_REPLY: &str = "No response from AI";

#[derive(Debug, Clone, Default)]
pub struct AiRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub cache: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiReply {
    pub text: String,
    pub model: String,
    pub usage: Usage,
}

/// Produces a complete answer for one prompt.
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn complete(&self, request: &AiRequest) -> Result<AiReply, AiError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<bool>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

pub struct ChatCompletionsClient {
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn new(api_url: &str, api_key: &str) -> Result<Self, AiError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            api_url: api_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            client,
        })
    }
}

#[async_trait]
impl AiProvider for ChatCompletionsClient {
    async fn complete(&self, request: &AiRequest) -> Result<AiReply, AiError> {
        if self.api_url.is_empty() {
            return Err(AiError::NotConfigured("missing API URL"));
        }
        if self.api_key.is_empty() {
            return Err(AiError::NotConfigured("missing API key"));
        }

        let model = request.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let body = CompletionRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: TEMPERATURE,
            stream: false,
            cache: request.cache,
        };

        let url = format!("{}/v1/chat/completions", self.api_url);
        debug!(%url, %model, "calling chat completions");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| EMPTY_REPLY.to_string());

        Ok(AiReply {
            text,
            model: if parsed.model.is_empty() {
                model.to_string()
            } else {
                parsed.model
            },
            usage: parsed.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_fails_fast() {
        let client = ChatCompletionsClient::new("", "key").unwrap();
        let req = AiRequest {
            prompt: "hi".into(),
            ..Default::default()
        };
        assert!(matches!(
            client.complete(&req).await,
            Err(AiError::NotConfigured(_))
        ));

        let client = ChatCompletionsClient::new("http://localhost:1", "  ").unwrap();
        assert!(matches!(
            client.complete(&req).await,
            Err(AiError::NotConfigured(_))
        ));
    }

    #[test]
    fn request_body_shape() {
        let body = CompletionRequest {
            model: DEFAULT_MODEL,
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: TEMPERATURE,
            stream: false,
            cache: None,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["max_tokens"], 1000);
        assert!(v.get("cache").is_none());
    }
}
