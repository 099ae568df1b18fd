pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

pub use handlers::AppState;
use handlers::{download_file, health, list_objects, upload_file};

/// Build the HTTP router over the shared application state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/files", post(upload_file))
        .route("/files/:file_id", get(download_file))
        .route("/admin/s3-list", get(list_objects))
        .with_state(state)
}
