use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Reasons a presented API key is refused, in the order they are checked.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("API key is required")]
    Missing,

    #[error("Invalid API key")]
    Invalid,

    #[error("API key has been revoked")]
    Revoked,

    #[error("API key expired")]
    Expired,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Missing => "missing_api_key",
            AuthError::Invalid => "invalid_api_key",
            AuthError::Revoked => "revoked_api_key",
            AuthError::Expired => "expired_api_key",
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Rate limit exceeded, retry in {}s", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API key not found")]
    KeyNotFound,

    #[error("Invalid admin credentials")]
    AdminUnauthorized,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Auth(reason) => reason.code(),
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Storage(_) => "storage_error",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Config(_) => "config_error",
            ApiError::KeyNotFound => "key_not_found",
            ApiError::AdminUnauthorized => "admin_unauthorized",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(_) | ApiError::AdminUnauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::KeyNotFound => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Storage(_) | ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));

        let mut response = (status, body).into_response();
        match &self {
            ApiError::RateLimited { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            ApiError::AdminUnauthorized => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"gateway-admin\""),
                );
            }
            _ => {}
        }
        response
    }
}
