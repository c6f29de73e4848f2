use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("failed to read directory '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<zip::result::ZipError> for StoreError {
    fn from(err: zip::result::ZipError) -> Self {
        StoreError::Archive(err.to_string())
    }
}

impl From<walkdir::Error> for StoreError {
    fn from(err: walkdir::Error) -> Self {
        StoreError::Archive(err.to_string())
    }
}

impl From<actix_web::error::BlockingError> for StoreError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        StoreError::Io(io::Error::other(err.to_string()))
    }
}

impl ResponseError for StoreError {
    fn status_code(&self) -> StatusCode {
        match self {
            StoreError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            StoreError::NotADirectory(_) => StatusCode::BAD_REQUEST,
            StoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Read { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            StoreError::Archive(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StoreError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.to_string()
        }))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            StoreError::InvalidPath("../x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            StoreError::NotFound("a".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            StoreError::NotADirectory("a".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        let read = StoreError::Read {
            path: "a".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(read.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
