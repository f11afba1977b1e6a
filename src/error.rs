//! Service-wide error type and its HTTP mapping.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::cache::CacheError;
use crate::identity::IdentityError;
use crate::provider::ProviderError;
use crate::storage::StorageError;
use crate::store::StoreError;
use crate::tasks::QueueError;

/// Every failure a handler can surface. Task-queue handlers rely on the
/// status mapping: 2xx drops a task, anything else redelivers it.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("no available servers")]
    NoServer,
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
    #[error("task queue: {0}")]
    Queue(#[from] QueueError),
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Internal(String),
}

impl ResponseError for CoordError {
    fn status_code(&self) -> StatusCode {
        match self {
            CoordError::NotFound(_) | CoordError::Store(StoreError::NotFound) => {
                StatusCode::NOT_FOUND
            }
            CoordError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CoordError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CoordError::Conflict(_) => StatusCode::NOT_ACCEPTABLE,
            CoordError::NoServer => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}
