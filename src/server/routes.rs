//! HTTP routes
//!
//! Thin handlers over the storage engine. Filesystem work runs on the blocking pool;
//! only body streaming stays on the async side.

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router, middleware};
use chrono::Utc;
use log::info;
use serde::Deserialize;

use crate::error::{ApiError, StorageError};
use crate::middleware::log_request;
use crate::server::core::AppState;
use crate::server::responses::{
    DeleteResponse, PathResponse, RestoreManyResponse, attachment_header,
};
use crate::storage::FileEntry;
use crate::transfer::{open_download, receive_upload, stream_archive};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/files", get(list_files).delete(delete_entry))
        .route("/api/files/recent", get(recent_files))
        .route("/api/files/trash", get(list_trash))
        .route("/api/files/download", get(download_file))
        .route("/api/files/download-many", post(download_many))
        .route("/api/files/mkdir", post(create_directory))
        .route("/api/files/restore", post(restore_entry))
        .route("/api/files/restore-many", post(restore_many))
        .route("/api/files/rename", patch(rename_entry))
        .route(
            "/api/files/upload",
            post(upload_file).layer(DefaultBodyLimit::disable()),
        )
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct PathQuery {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadManyRequest {
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MkdirRequest {
    #[serde(default)]
    path: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreRequest {
    file_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreManyRequest {
    file_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameRequest {
    path: String,
    new_name: String,
}

/// Runs a storage call on the blocking pool.
async fn blocking<T, F>(task: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(task).await??)
}

async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let storage = state.storage.clone();
    let entries = blocking(move || storage.list(&query.path)).await?;
    Ok(Json(entries))
}

async fn recent_files(State(state): State<AppState>) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let limit = state.runtime.read().await.recent_limit;
    let storage = state.storage.clone();
    let entries = blocking(move || Ok(storage.recent(limit))).await?;
    Ok(Json(entries))
}

async fn list_trash(State(state): State<AppState>) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let storage = state.storage.clone();
    let entries = blocking(move || storage.list_trash()).await?;
    Ok(Json(entries))
}

async fn download_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let storage = state.storage.clone();
    let ticket = blocking(move || storage.prepare_download(&query.path)).await?;
    let body = open_download(&ticket).await?;

    let headers = [
        (CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
        (CONTENT_DISPOSITION, attachment_header(&ticket.file_name)),
        (CONTENT_LENGTH, HeaderValue::from(ticket.size)),
    ];
    Ok((headers, Body::from_stream(body)).into_response())
}

async fn download_many(
    State(state): State<AppState>,
    Json(request): Json<DownloadManyRequest>,
) -> Result<Response, ApiError> {
    if request.paths.is_empty() {
        return Err(ApiError::BadRequest("no paths selected".into()));
    }

    let storage = state.storage.clone();
    let ticket = blocking(move || storage.prepare_archive(&request.paths)).await?;
    info!(
        "Streaming archive {} with {} top-level entries",
        ticket.archive_name,
        ticket.sources.len()
    );

    let excluded = state.storage.sandbox().trash_root().to_path_buf();
    let body = stream_archive(ticket.sources, excluded, state.archive);

    let headers = [
        (CONTENT_TYPE, HeaderValue::from_static("application/zip")),
        (CONTENT_DISPOSITION, attachment_header(&ticket.archive_name)),
    ];
    Ok((headers, Body::from_stream(body)).into_response())
}

async fn create_directory(
    State(state): State<AppState>,
    Json(request): Json<MkdirRequest>,
) -> Result<StatusCode, ApiError> {
    let storage = state.storage.clone();
    blocking(move || storage.create_directory(&request.path, &request.name)).await?;
    Ok(StatusCode::CREATED)
}

async fn delete_entry(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let storage = state.storage.clone();
    let outcome = blocking(move || storage.delete(&query.path)).await?;
    Ok(Json(outcome.into()))
}

async fn restore_entry(
    State(state): State<AppState>,
    Json(request): Json<RestoreRequest>,
) -> Result<Json<PathResponse>, ApiError> {
    let storage = state.storage.clone();
    let path = blocking(move || storage.restore(&request.file_name)).await?;
    Ok(Json(PathResponse { path }))
}

async fn restore_many(
    State(state): State<AppState>,
    Json(request): Json<RestoreManyRequest>,
) -> Result<Json<RestoreManyResponse>, ApiError> {
    let storage = state.storage.clone();
    let outcomes = blocking(move || Ok(storage.restore_many(&request.file_names))).await?;
    Ok(Json(outcomes.into()))
}

async fn rename_entry(
    State(state): State<AppState>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<PathResponse>, ApiError> {
    let storage = state.storage.clone();
    let path = blocking(move || storage.rename(&request.path, &request.new_name)).await?;
    Ok(Json(PathResponse { path }))
}

/// Accepts one `file` part. The target directory comes from `?path=` or from
/// a `path` field sent before the file.
async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<PathResponse>, ApiError> {
    let limit = state.runtime.read().await.max_upload_size_bytes();
    let from_query = query.path.is_some();
    let mut target_dir = query.path.unwrap_or_default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("path") if !from_query => {
                target_dir = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("unreadable path field: {e}")))?;
            }
            Some("file") => {
                let original_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("upload-{}", Utc::now().format("%Y%m%d-%H%M%S")));

                let storage = state.storage.clone();
                let dir = target_dir.clone();
                let target = blocking(move || storage.create_upload(&dir, &original_name)).await?;
                let file_path = target.file_path.clone();

                receive_upload(target, field, limit).await?;
                return Ok(Json(PathResponse {
                    path: state.storage.sandbox().relative(&file_path),
                }));
            }
            _ => {}
        }
    }

    Err(ApiError::BadRequest("missing file part".into()))
}
