use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::DocumentStatus;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Blob {blob_ref} is unavailable: {message}")]
    BlobUnavailable { blob_ref: String, message: String },

    #[error("Blob {blob_ref} does not match its recorded hash (expected {expected}, got {actual})")]
    ContentHashMismatch {
        blob_ref: String,
        expected: String,
        actual: String,
    },

    #[error("Text extraction failed")]
    Processing(#[from] ProcessingError),

    #[error("No indexable text in document {document_id}")]
    NoChunks { document_id: String },

    #[error("Embedding service returned {embeddings} vectors for {chunks} chunks")]
    EmbeddingMismatch { chunks: usize, embeddings: usize },

    #[error("Failed to write to vector collection {collection}")]
    IndexWriteFailed {
        collection: String,
        #[source]
        source: DatabaseError,
    },

    #[error("Document {document_id} is not owned by {owner_id}")]
    OwnershipMismatch {
        document_id: String,
        owner_id: String,
    },

    #[error("Document {document_id} cannot move from {from} to {to}")]
    InvalidTransition {
        document_id: String,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Embedding error")]
    Embedding(#[from] EmbeddingError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Document processing errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Failed to load PDFium: {message}")]
    PdfiumUnavailable { message: String },

    #[error("Failed to open PDF: {message}")]
    PdfLoad { message: String },

    #[error("Failed to extract text from page {page}: {message}")]
    TextExtraction { page: u32, message: String },

    #[error("Failed to rasterize page {page} at {dpi} DPI: {message}")]
    Rasterization { page: u32, dpi: u32, message: String },

    #[error("OCR failed for {image}: {message}")]
    Ocr { image: String, message: String },

    #[error("IO error")]
    Io(#[source] std::io::Error),
}

/// Embedding errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Connection failed to embedding service at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Embedding request failed (status {status}): {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response from embedding service: {message}")]
    InvalidResponse { message: String },
}

impl ServiceError {
    /// Whether the job queue should schedule another attempt for this failure.
    ///
    /// Terminal failures (missing rows, empty documents, embedding count
    /// mismatches, ownership violations) will not change on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::BlobUnavailable { .. }
            | ServiceError::Processing(_)
            | ServiceError::IndexWriteFailed { .. }
            | ServiceError::Database(_)
            | ServiceError::Embedding(_)
            | ServiceError::Internal { .. } => true,
            ServiceError::DocumentNotFound { .. }
            | ServiceError::ContentHashMismatch { .. }
            | ServiceError::NoChunks { .. }
            | ServiceError::EmbeddingMismatch { .. }
            | ServiceError::OwnershipMismatch { .. }
            | ServiceError::InvalidTransition { .. }
            | ServiceError::InvalidRequest { .. }
            | ServiceError::Config { .. } => false,
        }
    }

    /// Short machine-readable code, used for metrics labels and log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "not_found",
            ServiceError::BlobUnavailable { .. } => "blob_unavailable",
            ServiceError::ContentHashMismatch { .. } => "content_hash_mismatch",
            ServiceError::Processing(_) => "extraction_failed",
            ServiceError::NoChunks { .. } => "no_chunks",
            ServiceError::EmbeddingMismatch { .. } => "embedding_mismatch",
            ServiceError::IndexWriteFailed { .. } => "index_write_failed",
            ServiceError::OwnershipMismatch { .. } => "ownership_mismatch",
            ServiceError::InvalidTransition { .. } => "invalid_transition",
            ServiceError::Database(_) => "database_error",
            ServiceError::Embedding(_) => "embedding_error",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::OwnershipMismatch { .. } => StatusCode::FORBIDDEN,
            ServiceError::InvalidTransition { .. } => StatusCode::CONFLICT,
            ServiceError::BlobUnavailable { .. } | ServiceError::Embedding(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let response = ErrorResponse {
            message: format_error_chain(&self),
            code: Some(self.error_code().to_string()),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Render an error and its sources as `outer: inner: root`.
pub fn format_error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
