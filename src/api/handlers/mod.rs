mod internal;
mod tokens;

use axum::http::HeaderMap;

use crate::api::response::ApiError;

pub use internal::{health, peer_refresh, reindex};
pub use tokens::{delete_token, get_token, list_tokens, post_token, token_owners};

/// Header carrying the authenticated user identity, set by the upstream
/// authentication proxy. Mutations without it are refused.
pub const AUTH_USER_HEADER: &str = "x-registry-user";

fn authenticated_user(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(AUTH_USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::forbidden("Requests must carry an authenticated user"))
}

fn request_host(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
}

fn if_match_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::IF_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}
