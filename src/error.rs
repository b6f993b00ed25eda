use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(String),

    #[error("store operation timed out after {0:?}")]
    StoreTimeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid policy: {0}")]
    Policy(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Store(err.to_string())
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let error = match &self {
            Error::Store(_) | Error::StoreTimeout(_) => "store_error",
            Error::Config(_) => "configuration_error",
            Error::Policy(_) => "policy_error",
            Error::Serialization(_) => "serialization_error",
        };

        let body = ErrorBody {
            error,
            message: self.to_string(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}
