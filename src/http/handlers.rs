//! HTTP handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use tracing::info;

use super::dto::{
    ChatRequest, ChatResponse, ConfigResponse, DailyCapView, ExportRequest, HealthResponse,
    NotesResponse, UploadResponse, UsageQuery, UsageResponse,
};
use super::error::{ApiError, ApiResult};
use super::identity::ClientHints;
use crate::admission::{AdmissionPipeline, Provider};
use crate::files::{is_supported, FileBuffer};
use crate::provider::{NotesProvider, NotesRequest, ProviderRegistry, UpstreamError};
use crate::store::NotesStore;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AdmissionPipeline>,
    pub providers: ProviderRegistry,
    pub files: Arc<FileBuffer>,
    pub notes: Arc<NotesStore>,
}

impl AppState {
    fn provider(&self, provider: &Provider) -> ApiResult<Arc<dyn NotesProvider>> {
        let backend = self
            .providers
            .get(provider)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown provider: {provider}")))?;
        if !backend.is_configured() {
            return Err(UpstreamError::NotConfigured {
                provider: provider.clone(),
            }
            .into());
        }
        Ok(backend)
    }
}

#[derive(Default)]
struct UploadForm {
    file: Option<(String, String, Bytes)>,
    provider: Option<Provider>,
    model: Option<String>,
    client_id: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart) -> ApiResult<UploadForm> {
    let bad_request = |e: axum::extract::multipart::MultipartError| ApiError::BadRequest(e.body_text());
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(bad_request)?;
                form.file = Some((file_name, mime_type, bytes));
            }
            Some("provider") => {
                let value = field.text().await.map_err(bad_request)?;
                if !value.trim().is_empty() {
                    form.provider = Some(Provider::from(value.as_str()));
                }
            }
            Some("model") => {
                let value = field.text().await.map_err(bad_request)?;
                form.model = Some(value.trim().to_string()).filter(|m| !m.is_empty());
            }
            Some("clientId") => {
                form.client_id = Some(field.text().await.map_err(bad_request)?);
            }
            _ => {}
        }
    }

    Ok(form)
}

/// POST /api/upload
pub async fn upload(
    State(state): State<AppState>,
    hints: ClientHints,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let form = read_upload_form(multipart).await?;
    let Some((file_name, mime_type, bytes)) = form.file else {
        return Err(ApiError::BadRequest("No file uploaded.".to_string()));
    };
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("The uploaded file is empty.".to_string()));
    }
    if !is_supported(&mime_type) {
        return Err(UpstreamError::UnsupportedFileType(mime_type).into());
    }

    let provider = form.provider.unwrap_or_default();
    let backend = state.provider(&provider)?;
    let client = hints.resolve(form.client_id.as_deref());

    let file_id = state.files.insert(file_name.clone(), mime_type, bytes).id.clone();
    info!(client = %client, provider = %provider, file_id = %file_id, name = %file_name, "Upload received");

    let job = {
        let files = Arc::clone(&state.files);
        let notes = Arc::clone(&state.notes);
        let file_id = file_id.clone();
        let model = form.model;
        move || async move { generate_for_upload(&*backend, &files, &notes, &file_id, model).await }
    };
    let result = state.pipeline.run(&client, &provider, job).await;

    // A rejected request never reached the job
    state.files.remove(&file_id);

    let notes = result?;
    Ok(Json(UploadResponse {
        notes,
        file_id,
        file_name,
    }))
}

/// Generate notes for a buffered upload and store them under its id.
///
/// The upload leaves the buffer whether or not generation succeeds.
async fn generate_for_upload(
    backend: &dyn NotesProvider,
    files: &FileBuffer,
    notes: &NotesStore,
    file_id: &str,
    model: Option<String>,
) -> Result<String, UpstreamError> {
    let file = files
        .get(file_id)
        .ok_or_else(|| UpstreamError::FileNotFound(file_id.to_string()))?;

    let generated = backend.generate_notes(&NotesRequest { file, model }).await;
    files.remove(file_id);

    let generated = generated?;
    notes.set(file_id, generated.clone()).await;
    Ok(generated)
}

/// POST /api/chat
pub async fn chat(
    State(state): State<AppState>,
    hints: ClientHints,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let question = req.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::BadRequest("A question is required.".to_string()));
    }

    let notes = state
        .notes
        .get(&req.file_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No notes found for file {}", req.file_id)))?;

    let provider = req.provider.unwrap_or(Provider::OpenRouter);
    let backend = state.provider(&provider)?;
    let client = hints.resolve(req.client_id.as_deref());

    let answer = state
        .pipeline
        .run(&client, &provider, move || async move {
            backend.answer(&notes, &question).await
        })
        .await?;

    Ok(Json(ChatResponse { answer }))
}

/// GET /api/usage
pub async fn usage(
    State(state): State<AppState>,
    hints: ClientHints,
    Query(query): Query<UsageQuery>,
) -> Json<UsageResponse> {
    let client = hints.resolve(query.client_id.as_deref());
    let provider = query.provider.unwrap_or_default();
    Json(state.pipeline.usage(&client, &provider).await)
}

/// GET /api/config
pub async fn config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let cap = state.pipeline.quota().cap_for(&Provider::Gemini);
    Json(ConfigResponse {
        gemini_configured: state.providers.is_configured(&Provider::Gemini),
        openrouter_configured: state.providers.is_configured(&Provider::OpenRouter),
        gemini_total: DailyCapView {
            enabled: cap.is_some(),
            max: cap,
        },
    })
}

/// GET /api/notes/{id}
pub async fn get_notes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<NotesResponse>> {
    let notes = state
        .notes
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No notes found for file {id}")))?;
    Ok(Json(NotesResponse { file_id: id, notes }))
}

/// DELETE /api/notes/{id}
pub async fn delete_notes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.notes.delete(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("No notes found for file {id}")))
    }
}

/// POST /api/notes/export
pub async fn export_notes(Json(req): Json<ExportRequest>) -> ApiResult<impl IntoResponse> {
    if req.markdown.trim().is_empty() {
        return Err(ApiError::BadRequest("No markdown content provided.".to_string()));
    }

    let file_name = export_file_name(req.file_name.as_deref());
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        req.markdown,
    ))
}

/// Attachment name derived from the uploaded file name.
fn export_file_name(source: Option<&str>) -> String {
    let stem = source
        .map(|name| name.rsplit_once('.').map_or(name, |(stem, _)| stem))
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let cleaned = cleaned.trim_matches('-');

    if cleaned.is_empty() {
        "lecture-notes.md".to_string()
    } else {
        format!("{cleaned}-notes.md")
    }
}

/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}
