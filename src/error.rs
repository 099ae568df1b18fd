use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Input(String),

    // Covers both "no such file" and "file owned by someone else" so the
    // response never reveals whether a foreign file id exists.
    #[error("file not found")]
    NotFound,

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("storage failure: {0}")]
    Storage(String),

    // Wraps a failure worth retrying, e.g. a blob-store timeout. Nothing
    // in the pipeline retries on its own; retries are caller policy.
    #[error("transient failure: {0}")]
    Transient(Box<ServiceError>),
}

impl From<sea_orm::DbErr> for ServiceError {
    fn from(e: sea_orm::DbErr) -> Self {
        ServiceError::Storage(e.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::Input(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
