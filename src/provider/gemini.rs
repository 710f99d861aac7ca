//! Google Gemini via the `generateContent` REST endpoint.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{notes_prompt, question_prompt, NotesProvider, NotesRequest, RetryPolicy, UpstreamError};
use crate::admission::Provider;
use crate::config::GeminiConfig;
use crate::files::{is_supported, normalize_for_gemini};

/// Value shipped in the sample environment file; treated as no key at all.
const PLACEHOLDER_KEY: &str = "your_gemini_api_key_here";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: [SafetySetting; 2],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    Text(String),
    InlineData {
        #[serde(rename = "mimeType")]
        mime_type: &'a str,
        data: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

const SAFETY_SETTINGS: [SafetySetting; 2] = [
    SafetySetting {
        category: "HARM_CATEGORY_HATE_SPEECH",
        threshold: "BLOCK_MEDIUM_AND_ABOVE",
    },
    SafetySetting {
        category: "HARM_CATEGORY_HARASSMENT",
        threshold: "BLOCK_MEDIUM_AND_ABOVE",
    },
];

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: Option<SecretString>,
    model: String,
    base_url: String,
    temperature: f32,
    max_output_tokens: u32,
    retry: RetryPolicy,
}

impl GeminiProvider {
    pub fn new(http: reqwest::Client, config: &GeminiConfig, retry: RetryPolicy) -> Self {
        let api_key = config
            .api_key
            .as_ref()
            .filter(|key| {
                let key = key.expose_secret().trim();
                !key.is_empty() && key != PLACEHOLDER_KEY
            })
            .cloned();

        Self {
            http,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            retry,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    fn request_body<'a>(&self, parts: Vec<Part<'a>>) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: vec![Content { role: "user", parts }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
            safety_settings: SAFETY_SETTINGS,
        }
    }

    async fn generate(&self, model: &str, body: &GenerateContentRequest<'_>) -> Result<String, UpstreamError> {
        let key = self.api_key.as_ref().ok_or(UpstreamError::NotConfigured {
            provider: Provider::Gemini,
        })?;
        let url = self.endpoint(model);
        let url = url.as_str();

        self.retry
            .run("gemini", move || async move {
                let res = self
                    .http
                    .post(url)
                    .header("x-goog-api-key", key.expose_secret())
                    .json(body)
                    .send()
                    .await?;

                let status = res.status();
                let raw = res.text().await?;
                if !status.is_success() {
                    return Err(UpstreamError::from_response(Provider::Gemini, status, &raw));
                }
                extract_text(&raw)
            })
            .await
    }
}

/// Join the text parts of the first candidate.
fn extract_text(raw: &str) -> Result<String, UpstreamError> {
    let response: GenerateContentResponse = serde_json::from_str(raw)
        .map_err(|e| UpstreamError::InvalidResponse(format!("Gemini response: {e}")))?;

    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(UpstreamError::InvalidResponse(
            "Gemini returned no text".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl NotesProvider for GeminiProvider {
    fn kind(&self) -> Provider {
        Provider::Gemini
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
        info!(file_id = %file.id, name = %file.original_name, mime = %file.mime_type, model, "Generating notes with Gemini");

        let body = self.request_body(vec![
            Part::Text(notes_prompt(&file.original_name)),
            Part::InlineData {
                mime_type: normalize_for_gemini(&file.mime_type),
                data: STANDARD.encode(&file.bytes),
            },
        ]);
        let notes = self.generate(model, &body).await?;

        debug!(file_id = %file.id, chars = notes.len(), "Gemini returned notes");
        Ok(notes)
    }

    async fn answer(&self, notes: &str, question: &str) -> Result<String, UpstreamError> {
        let body = self.request_body(vec![Part::Text(question_prompt(notes, question))]);
        self.generate(&self.model, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(api_key: Option<&str>) -> GeminiProvider {
        let config = GeminiConfig {
            api_key: api_key.map(SecretString::from),
            ..GeminiConfig::default()
        };
        GeminiProvider::new(reqwest::Client::new(), &config, RetryPolicy::none())
    }

    #[test]
    fn test_placeholder_key_is_not_configured() {
        assert!(!provider(None).is_configured());
        assert!(!provider(Some("your_gemini_api_key_here")).is_configured());
        assert!(!provider(Some("  ")).is_configured());
        assert!(provider(Some("AIza-real")).is_configured());
    }

    #[test]
    fn test_request_body_shape() {
        let p = provider(Some("k"));
        let body = p.request_body(vec![
            Part::Text("prompt".to_string()),
            Part::InlineData {
                mime_type: "application/pdf",
                data: "AAAA".to_string(),
            },
        ]);

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"text": "prompt"},
                        {"inlineData": {"mimeType": "application/pdf", "data": "AAAA"}}
                    ]
                }],
                "generationConfig": {"temperature": 0.2f32, "maxOutputTokens": 8192},
                "safetySettings": [
                    {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                    {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"}
                ]
            })
        );
    }

    #[test]
    fn test_endpoint_uses_model() {
        let p = provider(Some("k"));
        assert_eq!(
            p.endpoint("gemini-1.5-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let raw = r##"{"candidates":[{"content":{"parts":[{"text":"# Notes\n"},{"text":"- point"}]}}]}"##;
        assert_eq!(extract_text(raw).unwrap(), "# Notes\n- point");
    }

    #[test]
    fn test_extract_text_rejects_empty_candidates() {
        assert!(matches!(
            extract_text(r#"{"candidates":[]}"#),
            Err(UpstreamError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let p = provider(None);
        let err = p.answer("notes", "q").await.unwrap_err();
        assert!(matches!(err, UpstreamError::NotConfigured { .. }));
    }
}
