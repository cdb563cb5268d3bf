//! Chat-completion client. OpenRouter speaks the common
//! `choices[0].message.content` dialect, so the wire types stay small.

use crate::error::{truncate_body, ResearchError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const COMPLETIONS_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Seam for the language-model endpoint; the pipeline only ever needs
/// "prompt in, completion text out".
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f32, timeout: Duration) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

pub struct OpenRouterChat {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenRouterChat {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ResearchError::Transport(e.to_string()))?;
        Ok(Self { client, api_key, model })
    }
}

#[async_trait]
impl ChatApi for OpenRouterChat {
    async fn complete(&self, prompt: &str, temperature: f32, timeout: Duration) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature,
        };

        let response = self
            .client
            .post(COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| ResearchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResearchError::HttpStatus {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ResearchError::MalformedResponse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ResearchError::MalformedResponse("completion had no choices".into()))?;

        Ok(choice.message.content.trim().to_string())
    }
}
