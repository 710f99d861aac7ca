//! OpenRouter chat completions, sending the slides as a data URL.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{notes_prompt, question_prompt, NotesProvider, NotesRequest, RetryPolicy, UpstreamError};
use crate::admission::Provider;
use crate::config::OpenRouterConfig;
use crate::files::is_supported;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Value,
}

pub struct OpenRouterProvider {
    http: reqwest::Client,
    api_key: Option<SecretString>,
    model: String,
    base_url: String,
    site_url: String,
    site_name: String,
    retry: RetryPolicy,
}

impl OpenRouterProvider {
    pub fn new(http: reqwest::Client, config: &OpenRouterConfig, retry: RetryPolicy) -> Self {
        let api_key = config
            .api_key
            .as_ref()
            .filter(|key| !key.expose_secret().trim().is_empty())
            .cloned();

        Self {
            http,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            site_url: config.site_url.clone(),
            site_name: config.site_name.clone(),
            retry,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String, UpstreamError> {
        let key = self.api_key.as_ref().ok_or(UpstreamError::NotConfigured {
            provider: Provider::OpenRouter,
        })?;
        let url = self.endpoint();
        let url = url.as_str();

        self.retry
            .run("openrouter", move || async move {
                let res = self
                    .http
                    .post(url)
                    .bearer_auth(key.expose_secret())
                    .header("HTTP-Referer", &self.site_url)
                    .header("X-Title", &self.site_name)
                    .json(request)
                    .send()
                    .await?;

                let status = res.status();
                let raw = res.text().await?;
                debug!(status = status.as_u16(), "OpenRouter responded");
                if !status.is_success() {
                    return Err(UpstreamError::from_response(
                        Provider::OpenRouter,
                        status,
                        &raw,
                    ));
                }
                extract_content(&raw)
            })
            .await
    }
}

/// Text of the first choice. Some models return an array of content parts
/// rather than a plain string.
fn extract_content(raw: &str) -> Result<String, UpstreamError> {
    let response: ChatResponse = serde_json::from_str(raw)
        .map_err(|e| UpstreamError::InvalidResponse(format!("OpenRouter response: {e}")))?;

    let content = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| UpstreamError::InvalidResponse("OpenRouter returned no choices".to_string()))?;

    let text = match content {
        Value::String(text) => text,
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.as_str()),
                other => other.get("text").and_then(Value::as_str),
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(UpstreamError::InvalidResponse(
            "OpenRouter returned empty content".to_string(),
        ));
    }
    Ok(text.to_string())
}

#[async_trait]
impl NotesProvider for OpenRouterProvider {
    fn kind(&self) -> Provider {
        Provider::OpenRouter
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate_notes(&self, request: &NotesRequest) -> Result<String, UpstreamError> {
        let file = &request.file;
        if !is_supported(&file.mime_type) {
            return Err(UpstreamError::UnsupportedFileType(file.mime_type.clone()));
        }

        let model = request.model.as_deref().unwrap_or(&self.model);
        info!(file_id = %file.id, name = %file.original_name, mime = %file.mime_type, model, "Generating notes with OpenRouter");

        let data_url = format!("data:{};base64,{}", file.mime_type, STANDARD.encode(&file.bytes));
        let chat = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: notes_prompt(&file.original_name),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
        };
        self.complete(&chat).await
    }

    async fn answer(&self, notes: &str, question: &str) -> Result<String, UpstreamError> {
        let chat = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![ContentPart::Text {
                    text: question_prompt(notes, question),
                }],
            }],
        };
        self.complete(&chat).await
    }
}
