use std::time::Duration;

use mca_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::Llm;
use crate::ollama::OllamaClient;

#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
    model: String,
    timeout: Duration,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

impl Llm for OllamaLlm {
    fn generate(&self, system: &str, user: &str) -> Result<String, AppError> {
        let url = format!("{}/api/chat", self.client.base_url());
        let req = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: false,
        };

        tracing::debug!(model = %self.model, user_chars = user.chars().count(), "calling ollama chat");
        let resp = ureq::post(&url)
            .timeout(self.timeout)
            .send_json(serde_json::to_value(req).map_err(|e| {
                AppError::new("AI_GENERATE_FAILED", "Failed to encode chat request")
                    .with_details(e.to_string())
            })?);

        match resp {
            Ok(r) if r.status() == 200 => {
                let v: ChatResponse = r.into_json().map_err(|e| {
                    AppError::new("AI_GENERATE_FAILED", "Failed to decode chat response")
                        .with_details(e.to_string())
                })?;
                if v.message.content.trim().is_empty() {
                    return Err(AppError::new("AI_GENERATE_FAILED", "Model response was empty"));
                }
                Ok(v.message.content)
            }
            Ok(r) => Err(
                AppError::new("AI_GENERATE_FAILED", "Chat request failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(ureq::Error::Status(code, _)) => Err(
                AppError::new("AI_GENERATE_FAILED", "Chat request failed")
                    .with_details(format!("status={code}; model={}", self.model)),
            ),
            Err(e) => Err(
                AppError::new("AI_GENERATE_FAILED", "Failed to call chat endpoint")
                    .with_details(e.to_string())
                    .with_retryable(true),
            ),
        }
    }
}
