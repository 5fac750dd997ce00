//! External vision collaborator
//!
//! Image attachments are never OCR'd locally; a vision-capable model
//! produces a textual description that becomes the image's single
//! document chunk. The trait keeps the collaborator swappable and
//! mockable.

use async_trait::async_trait;
use convoforge_common::config::AppConfig;
use convoforge_common::errors::{AppError, Result};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const DESCRIBE_PROMPT: &str =
    "Describe this image in detail so the description can stand in for the image in search results. \
     Include any visible text.";

#[async_trait]
pub trait VisionDescriber: Send + Sync {
    /// Produce a textual description for an image at a URL.
    async fn describe_image(&self, url: &str, mime: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completions vision client
pub struct OpenAiVision {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiVision {
    pub fn new(api_key: String, base_url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AppError::HttpClient)?;
        Ok(Self {
            client,
            api_key,
            model: "gpt-4o-mini".to_string(),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }
}

#[async_trait]
impl VisionDescriber for OpenAiVision {
    async fn describe_image(&self, url: &str, _mime: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": 512,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": DESCRIBE_PROMPT},
                    {"type": "image_url", "image_url": {"url": url}}
                ]
            }]
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                return Err(AppError::InvalidFormat {
                    message: format!("Vision API rejected request ({}): {}", status, text),
                });
            }
            return Err(AppError::ServiceUnavailable {
                message: format!("Vision API error {}: {}", status, text),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| AppError::Internal {
            message: format!("Undecodable vision response: {}", e),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::Internal {
                message: "Vision API returned no description".into(),
            })
    }
}

/// Deterministic stand-in for tests and offline development.
pub struct MockVision;

#[async_trait]
impl VisionDescriber for MockVision {
    async fn describe_image(&self, url: &str, mime: &str) -> Result<String> {
        Ok(format!("Image attachment ({}) at {}", mime, url))
    }
}

/// Select a vision collaborator matching the embedding provider choice.
pub fn create_vision(config: &AppConfig) -> Result<Arc<dyn VisionDescriber>> {
    match config.embedding.provider.as_str() {
        "mock" => Ok(Arc::new(MockVision)),
        _ => {
            let api_key = config
                .embedding
                .api_key
                .clone()
                .ok_or_else(|| AppError::Configuration {
                    message: "embedding.api_key required for the vision collaborator".into(),
                })?;
            Ok(Arc::new(OpenAiVision::new(
                api_key,
                config.embedding.api_base.clone(),
                Duration::from_secs(config.attachments.vision_timeout_secs),
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_vision_describes() {
        let vision = MockVision;
        let desc = vision
            .describe_image("https://cdn.example.com/cat.png", "image/png")
            .await
            .unwrap();
        assert!(desc.contains("image/png"));
        assert!(desc.contains("cat.png"));
    }
}
