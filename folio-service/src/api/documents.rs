//! Document API endpoints.
//!
//! Uploads take the raw PDF as the request body; owner and file name come
//! from the query string.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{Document, DocumentStatus};
use crate::error::ServiceError;

use super::AppState;

/// Owner-scoped query parameters
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerParams {
    pub owner_id: String,
}

/// Upload query parameters
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    pub owner_id: String,
    pub name: String,
}

/// Delete query parameters
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteParams {
    pub owner_id: String,
    #[serde(default)]
    pub hard: bool,
}

/// Response for delete operations
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub doc_id: String,
    pub status: DocumentStatus,
    /// Cleanup job, for hard deletes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// List the owner's documents
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<OwnerParams>,
) -> Result<Json<Vec<Document>>, ServiceError> {
    let documents = state.service.list_documents(&params.owner_id).await?;
    Ok(Json(documents))
}

/// Upload a new document
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<Document>), ServiceError> {
    let document = state
        .service
        .accept_upload(&params.owner_id, &params.name, &body)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(document)))
}

/// Get a single document
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<OwnerParams>,
) -> Result<Json<Document>, ServiceError> {
    let document = state.service.get_document(&params.owner_id, &id)?;
    Ok(Json(document))
}

/// Soft delete, or hard delete with `hard=true`
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<(StatusCode, Json<DeleteResponse>), ServiceError> {
    if params.hard {
        let job_id = state.service.request_hard_delete(&params.owner_id, &id)?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(DeleteResponse {
                doc_id: id,
                status: DocumentStatus::Deleting,
                job_id: Some(job_id),
            }),
        ));
    }

    let document = state.service.soft_delete(&params.owner_id, &id)?;
    Ok((
        StatusCode::OK,
        Json(DeleteResponse {
            doc_id: document.id,
            status: document.status,
            job_id: None,
        }),
    ))
}
