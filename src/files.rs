//! In-memory buffer for uploaded slide decks.
//!
//! Uploads never touch disk. A file lives here only while its notes are
//! being generated and is removed once the job finishes.

use std::sync::Arc;

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// MIME types accepted for note generation.
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/bmp",
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.ms-powerpoint",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
];

pub fn is_supported(mime_type: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime_type)
}

/// Office documents are sent to Gemini as PDF; everything else is unchanged.
pub fn normalize_for_gemini(mime_type: &str) -> &str {
    if mime_type.contains("officedocument")
        || mime_type.contains("msword")
        || mime_type.contains("ms-powerpoint")
    {
        "application/pdf"
    } else {
        mime_type
    }
}

/// An uploaded file and its metadata.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub id: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: usize,
    pub bytes: Bytes,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct FileBuffer {
    files: DashMap<String, Arc<UploadedFile>>,
}

impl FileBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an upload under a fresh id.
    pub fn insert(&self, original_name: String, mime_type: String, bytes: Bytes) -> Arc<UploadedFile> {
        let uploaded_at = Utc::now();
        let id = format!(
            "{}-{}",
            uploaded_at.timestamp_millis(),
            Uuid::new_v4().simple()
        );
        let file = Arc::new(UploadedFile {
            id: id.clone(),
            original_name,
            mime_type,
            size: bytes.len(),
            bytes,
            uploaded_at,
        });

        debug!(file_id = %id, name = %file.original_name, size = file.size, "Buffered upload");
        self.files.insert(id, Arc::clone(&file));
        file
    }

    pub fn get(&self, id: &str) -> Option<Arc<UploadedFile>> {
        self.files.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: &str) -> bool {
        self.files.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
