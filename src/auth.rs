//! Request extractors for API-key and administrator authentication.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use subtle::ConstantTimeEq;

use crate::config::AdminCredentials;
use crate::errors::ApiError;
use crate::models::KeyRecord;
use crate::routes::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// The caller's token from `x-api-key`, or from `Authorization: Bearer` when
/// that header is absent or blank.
pub fn presented_token(headers: &HeaderMap) -> Option<&str> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if api_key.is_some() {
        return api_key;
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// A request whose token resolved to a usable key.
#[derive(Debug, Clone)]
pub struct AuthorizedKey(pub KeyRecord);

#[async_trait]
impl FromRequestParts<AppState> for AuthorizedKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = presented_token(&parts.headers);
        state.keys.authorize(token).map(AuthorizedKey)
    }
}

/// HTTP Basic administrator login. Holds the username that passed.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub String);

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let (username, password) =
            basic_credentials(&parts.headers).ok_or(ApiError::AdminUnauthorized)?;

        if !credentials_match(&state.admin, &username, &password) {
            tracing::warn!(username = %username, "rejected admin login");
            return Err(ApiError::AdminUnauthorized);
        }

        Ok(RequireAdmin(username))
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Both halves are always compared so timing does not reveal which was wrong.
pub fn credentials_match(expected: &AdminCredentials, username: &str, password: &str) -> bool {
    let user_ok = expected.username.as_bytes().ct_eq(username.as_bytes());
    let pass_ok = expected.password.as_bytes().ct_eq(password.as_bytes());
    bool::from(user_ok & pass_ok)
}
