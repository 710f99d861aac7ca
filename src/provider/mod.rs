//! Generative-AI backends that turn slides into notes and answer questions.

mod gemini;
mod openrouter;
mod retry;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::admission::Provider;
use crate::config::ProvidersConfig;
use crate::files::UploadedFile;

pub use gemini::GeminiProvider;
pub use openrouter::OpenRouterProvider;
pub use retry::RetryPolicy;

/// Instructions sent alongside every slide deck.
pub(crate) const NOTES_PROMPT: &str = "You are an expert note-taker for academic lectures. \
I'm providing lecture slides that I need you to convert into comprehensive, well-structured notes. Please:

1. Extract all key concepts, definitions, and formulas.
2. Organize the content logically with clear Markdown headings (#, ##, ###).
3. Use bullet points for lists, steps and key takeaways.
4. Format mathematical formulas using LaTeX syntax (e.g. $E=mc^2$).
5. Highlight important terms in **bold** and put code in fenced code blocks.
6. Ignore copyright footers, slide numbers and irrelevant metadata.
7. Start with a brief summary.

The output should be clean Markdown ready for rendering.";

pub(crate) fn notes_prompt(file_name: &str) -> String {
    format!("{NOTES_PROMPT}\n\nThe slides are from the file: {file_name}.")
}

pub(crate) fn question_prompt(notes: &str, question: &str) -> String {
    format!(
        "You are a helpful teaching assistant. Answer the student's question using the lecture \
notes below. If the notes do not cover it, say so briefly before answering from general \
knowledge. Reply in Markdown.\n\n--- LECTURE NOTES ---\n{notes}\n--- END NOTES ---\n\nQuestion: {question}"
    )
}

/// A request to turn an uploaded file into notes.
#[derive(Debug, Clone)]
pub struct NotesRequest {
    pub file: Arc<UploadedFile>,
    /// Per-request model override
    pub model: Option<String>,
}

/// Failure talking to an upstream provider.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{provider} API key is not configured")]
    NotConfigured { provider: Provider },

    #[error("Unsupported file type: {0}. Please upload a PDF, PowerPoint, Word, image or text file.")]
    UnsupportedFileType(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("{provider} is rate limiting requests: {message}")]
    RateLimited { provider: Provider, message: String },

    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: Provider,
        status: u16,
        message: String,
    },

    #[error("request to provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),
}

impl UpstreamError {
    /// Whether the provider is throttling us. Such errors are retried.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, UpstreamError::RateLimited { .. })
    }

    /// Classify a non-success response.
    ///
    /// HTTP 429, a `rate-limited` marker in the message or raw upstream
    /// detail, or a `RESOURCE_EXHAUSTED` status all count as throttling.
    pub fn from_response(provider: Provider, status: StatusCode, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let error = parsed.as_ref().and_then(|v| v.get("error"));

        let message = error
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    status.to_string()
                } else {
                    trimmed.chars().take(512).collect()
                }
            });
        let raw = error
            .and_then(|e| e.pointer("/metadata/raw"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let upstream_status = error
            .and_then(|e| e.get("status"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
            || message.contains("rate-limited")
            || raw.contains("rate-limited")
            || upstream_status == "RESOURCE_EXHAUSTED";

        if rate_limited {
            UpstreamError::RateLimited { provider, message }
        } else {
            UpstreamError::Api {
                provider,
                status: status.as_u16(),
                message,
            }
        }
    }
}

/// A backend able to produce notes and answer questions about them.
#[async_trait]
pub trait NotesProvider: Send + Sync {
    /// Which provider this is, for admission and logging.
    fn kind(&self) -> Provider;

    /// Whether credentials are present.
    fn is_configured(&self) -> bool;

    /// Generate Markdown notes from an uploaded file.
    async fn generate_notes(&self, request: &NotesRequest) -> Result<String, UpstreamError>;

    /// Answer a question about previously generated notes.
    async fn answer(&self, notes: &str, question: &str) -> Result<String, UpstreamError>;
}

/// The providers available to request handlers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, Arc<dyn NotesProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the Gemini and OpenRouter clients from configuration.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("slidenotes/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let retry = RetryPolicy::from_config(&config.retry);

        let mut registry = Self::new();
        registry.register(Arc::new(GeminiProvider::new(
            http.clone(),
            &config.gemini,
            retry.clone(),
        )));
        registry.register(Arc::new(OpenRouterProvider::new(
            http,
            &config.openrouter,
            retry,
        )));
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn NotesProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, provider: &Provider) -> Option<Arc<dyn NotesProvider>> {
        self.providers.get(provider).cloned()
    }

    pub fn is_configured(&self, provider: &Provider) -> bool {
        self.providers
            .get(provider)
            .is_some_and(|p| p.is_configured())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_429_is_rate_limited() {
        let err = UpstreamError::from_response(
            Provider::OpenRouter,
            StatusCode::TOO_MANY_REQUESTS,
            "",
        );
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_rate_limited_marker_in_raw_metadata() {
        let body = r#"{"error":{"message":"Provider returned error","code":502,
            "metadata":{"raw":"google/gemini-2.0-flash-exp:free is temporarily rate-limited upstream"}}}"#;
        let err = UpstreamError::from_response(Provider::OpenRouter, StatusCode::BAD_GATEWAY, body);
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_resource_exhausted_is_rate_limited() {
        let body = r#"{"error":{"code":400,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = UpstreamError::from_response(Provider::Gemini, StatusCode::BAD_REQUEST, body);
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_other_errors_keep_status_and_message() {
        let body = r#"{"error":{"message":"API key not valid"}}"#;
        let err = UpstreamError::from_response(Provider::Gemini, StatusCode::FORBIDDEN, body);

        match err {
            UpstreamError::Api { status, message, .. } => {
                assert_eq!(status, 403);
                assert_eq!(message, "API key not valid");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_question_prompt_embeds_notes() {
        let prompt = question_prompt("# Week 1", "What is a monad?");
        assert!(prompt.contains("# Week 1"));
        assert!(prompt.ends_with("Question: What is a monad?"));
    }
}
