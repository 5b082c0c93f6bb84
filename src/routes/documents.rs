//! Document registration endpoints
//!
//! - `POST /documents`: multipart upload (`file` or `pdf` field)
//! - `POST /documents/path`: register a file already on the server
//! - `GET /documents`: list registered documents
//! - `DELETE /documents/:id`: unregister and purge everything derived from it

use std::path::PathBuf;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, DeliveryResult};
use crate::registry::RegisteredDocument;
use crate::state::AppState;

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/documents",
            get(list_documents)
                .post(upload_document)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/documents/path", post(register_path))
        .route("/documents/:id", delete(unregister_document))
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<RegisteredDocument>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPathRequest {
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnregisterResponse {
    pub id: String,
    /// Memory-tier renders dropped
    pub purged_pages: usize,
    pub closed_handle: bool,
    pub ended_sessions: usize,
}

async fn list_documents(State(state): State<AppState>) -> Json<DocumentListResponse> {
    let documents = state.registry().list();
    Json(DocumentListResponse {
        total: documents.len(),
        documents,
    })
}

async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> DeliveryResult<(StatusCode, Json<RegisteredDocument>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DeliveryError::BadRequest(format!("Failed to read upload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name != "file" && name != "pdf" {
            continue;
        }

        let filename = field.file_name().map(|s| s.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| DeliveryError::BadRequest(format!("Failed to read file data: {}", e)))?;

        tracing::debug!(filename = ?filename, bytes = data.len(), "Received upload");

        let document = state.registry().register_bytes(&data, filename).await?;
        return Ok((StatusCode::CREATED, Json(document)));
    }

    Err(DeliveryError::BadRequest(
        "Multipart body has no 'file' field".to_string(),
    ))
}

async fn register_path(
    State(state): State<AppState>,
    Json(request): Json<RegisterPathRequest>,
) -> DeliveryResult<(StatusCode, Json<RegisteredDocument>)> {
    let document = state.registry().register_path(&request.path).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn unregister_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DeliveryResult<Json<UnregisterResponse>> {
    let document = state.registry().unregister(&id).await?;

    let purged_pages = state.cache().purge_document(&document.path).await;
    let closed_handle = state.pool().close(&document.path);
    let ended_sessions = state.sessions().remove_for_document(&id).await;

    tracing::info!(
        doc_id = %id,
        purged_pages = purged_pages,
        closed_handle = closed_handle,
        ended_sessions = ended_sessions,
        "Purged document"
    );

    Ok(Json(UnregisterResponse {
        id,
        purged_pages,
        closed_handle,
        ended_sessions,
    }))
}
