use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use super::{authenticated_user, if_match_header, request_host};
use crate::api::response::{ApiError, AppJson, AppQuery};
use crate::cluster::refresh::{self, RefreshPayload};
use crate::registry::index::OwnerDirectory;
use crate::registry::list::ListOptions;
use crate::registry::record::{is_token_data_key, TokenRecord};
use crate::registry::{UpdateMode, WriteRequest};
use crate::AppState;

/// Metadata keys withheld from GET responses unless `include=metadata`.
const SYSTEM_VIEW_KEYS: &[&str] = &["cluster", "last-update-time", "last-update-user", "root"];

// ============================================================================
// Handlers
// ============================================================================

pub async fn get_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AppQuery(params): AppQuery<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let mut token = None;
    let mut include = BTreeSet::new();
    for (key, value) in &params {
        match key.as_str() {
            "include" => {
                include.insert(value.clone());
            }
            "token" => token = Some(value.clone()),
            other => {
                return Err(ApiError::bad_request(format!(
                    "Unsupported query parameter {other}"
                )))
            }
        }
    }
    validate_includes(&include)?;

    let token = match token {
        Some(token) => token,
        None => resolve_host_token(&state, &headers).ok_or_else(|| {
            ApiError::bad_request("A token query parameter or a token-resolving host is required")
        })?,
    };

    let (record, etag) = state
        .registry
        .get_token(&token)?
        .ok_or_else(|| ApiError::not_found(format!("Couldn't find token {token}")))?;
    if record.is_deleted() && !include.contains("deleted") {
        return Err(ApiError::not_found(format!("Couldn't find token {token}")));
    }

    let body = token_view(&record, include.contains("metadata"))?;
    Ok(([(header::ETAG, etag)], Json(body)).into_response())
}

pub async fn post_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AppQuery(params): AppQuery<Vec<(String, String)>>,
    AppJson(body): AppJson<Value>,
) -> Result<Response, ApiError> {
    let auth_user = authenticated_user(&headers)?;

    let mut mode = UpdateMode::Normal;
    let mut query_token = None;
    for (key, value) in &params {
        match key.as_str() {
            "token" => query_token = Some(value.clone()),
            "update-mode" => mode = parse_update_mode(value)?,
            other => {
                return Err(ApiError::bad_request(format!(
                    "Unsupported query parameter {other}"
                )))
            }
        }
    }

    let body_token = body
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_string);
    let token = match (query_token, body_token) {
        (Some(query), Some(body)) if query != body => {
            return Err(ApiError::bad_request(
                "The token in the body conflicts with the token query parameter",
            ))
        }
        (query, body) => body
            .or(query)
            .ok_or_else(|| ApiError::bad_request("Token name is required"))?,
    };

    let record = TokenRecord::from_value(&body)?;
    let cluster = state.clusters.calculate(request_host(&headers));

    let outcome = state
        .registry
        .create_or_update(WriteRequest {
            auth_user,
            cluster,
            if_match: if_match_header(&headers),
            mode,
            record,
            token: token.clone(),
        })
        .await?;

    if outcome.changed {
        refresh::broadcast(
            &state,
            RefreshPayload::for_token(token, Some(outcome.owner.clone())),
        )
        .await;
    }

    Ok((
        [(header::ETAG, outcome.etag)],
        Json(json!({
            "message": outcome.message,
            "service-description": outcome.description,
        })),
    )
        .into_response())
}

pub async fn delete_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AppQuery(params): AppQuery<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let auth_user = authenticated_user(&headers)?;

    let mut hard = false;
    let mut token = None;
    for (key, value) in &params {
        match key.as_str() {
            "hard-delete" => hard = parse_bool("hard-delete", value)?,
            "token" => token = Some(value.clone()),
            other => {
                return Err(ApiError::bad_request(format!(
                    "Unsupported query parameter {other}"
                )))
            }
        }
    }
    let token =
        token.ok_or_else(|| ApiError::bad_request("A token query parameter is required"))?;

    let outcome = state
        .registry
        .delete_token(&auth_user, &token, if_match_header(&headers), hard)
        .await?;

    refresh::broadcast(
        &state,
        RefreshPayload::for_token(outcome.token.clone(), outcome.owner.clone()),
    )
    .await;

    Ok(Json(json!({
        "delete": outcome.token,
        "hard-delete": outcome.hard,
        "success": true,
    })))
}

pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<Vec<(String, String)>>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let mut include = BTreeSet::new();
    let mut options = ListOptions::default();
    let mut owners = BTreeSet::new();
    for (key, value) in &params {
        match key.as_str() {
            "can-manage-as-user" => options.can_manage_as = Some(value.clone()),
            "include" => {
                include.insert(value.clone());
            }
            "owner" => {
                owners.insert(value.clone());
            }
            other if is_token_data_key(other) => {
                options
                    .param_filters
                    .entry(other.to_string())
                    .or_default()
                    .insert(value.clone());
            }
            other => {
                return Err(ApiError::bad_request(format!(
                    "Unsupported query parameter {other}"
                )))
            }
        }
    }
    validate_includes(&include)?;
    options.include_deleted = include.contains("deleted");
    options.show_metadata = include.contains("metadata");
    if !owners.is_empty() {
        options.owners = Some(owners);
    }

    Ok(Json(state.registry.list_tokens(&options)?))
}

pub async fn token_owners(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OwnerDirectory>, ApiError> {
    Ok(Json(state.registry.owners_map()?))
}

// ============================================================================
// Helpers
// ============================================================================

fn resolve_host_token(state: &AppState, headers: &HeaderMap) -> Option<String> {
    let host = request_host(headers)?;
    let host = host.split(':').next().unwrap_or(host);
    state.config.tokens.host_tokens.get(host).cloned()
}

fn token_view(record: &TokenRecord, include_metadata: bool) -> Result<Value, ApiError> {
    let mut value = record.to_value()?;
    if let Some(map) = value.as_object_mut() {
        map.remove("previous");
        if !include_metadata {
            for key in SYSTEM_VIEW_KEYS {
                map.remove(*key);
            }
            map.remove("deleted");
        }
    }
    Ok(value)
}

fn validate_includes(include: &BTreeSet<String>) -> Result<(), ApiError> {
    for value in include {
        if value != "deleted" && value != "metadata" {
            return Err(ApiError::bad_request(format!(
                "Unsupported include value {value}"
            )));
        }
    }
    Ok(())
}

fn parse_update_mode(value: &str) -> Result<UpdateMode, ApiError> {
    match value {
        "admin" => Ok(UpdateMode::Admin),
        "normal" => Ok(UpdateMode::Normal),
        other => Err(ApiError::bad_request(format!(
            "Unsupported update-mode {other}"
        ))),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ApiError> {
    match value {
        "false" => Ok(false),
        "true" => Ok(true),
        other => Err(ApiError::bad_request(format!(
            "{name} must be true or false, got {other}"
        ))),
    }
}
