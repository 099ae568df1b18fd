use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use crate::dsde::Service;
use crate::error::{Result, ServiceError};
use crate::storage::ObjectStore;

/// Application state shared across handlers. Only immutable handles live
/// here; per-request state stays on the request task.
pub struct AppState {
    pub service: Service,
    pub store: Arc<dyn ObjectStore>,
}

fn header_value(headers: &HeaderMap, name: &str) -> Result<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::Input(format!("missing {} header", name)))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Serialize)]
pub struct UploadResponse {
    #[serde(rename = "fileID")]
    pub file_id: String,
    #[serde(rename = "feaHash")]
    pub fea_hash: String,
    #[serde(rename = "dekShared")]
    pub dek_shared: String,
    #[serde(rename = "dekUser")]
    pub dek_user: String,
}

/// POST /files — body is the raw file, identity comes from headers.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>> {
    let owner = header_value(&headers, "X-Owner-ID")?;
    let filename = header_value(&headers, "X-Filename")?;

    tracing::debug!(owner = %owner, filename = %filename, size = body.len(), "upload");
    let receipt = state.service.upload(&owner, &filename, body).await?;

    Ok(Json(UploadResponse {
        file_id: receipt.file_id.to_string(),
        fea_hash: receipt.feature.to_hex(),
        dek_shared: to_hex(&receipt.dek_shared),
        dek_user: to_hex(&receipt.dek_user),
    }))
}

/// GET /files/:file_id — streams the reconstructed bytes back.
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let owner = header_value(&headers, "X-Owner-ID")?;
    let file_id = Uuid::parse_str(&file_id)
        .map_err(|_| ServiceError::Input(format!("malformed file id: {}", file_id)))?;

    let data = state.service.download(&owner, file_id).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(data))
        .map_err(|e| ServiceError::Storage(e.to_string()))
}

/// GET /admin/s3-list — every object key in the bucket.
pub async fn list_objects(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.store.list().await?))
}
