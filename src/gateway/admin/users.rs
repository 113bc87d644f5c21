//! Usage: Admin-only user management handlers.

use super::super::errors::{domain_error, error_response};
use super::super::GatewayState;
use super::{guard_admin, parse_json};
use crate::users;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct UserCreateRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    role: String,
}

#[derive(Debug, Deserialize)]
struct UserUpdateRequest {
    password: Option<String>,
    role: Option<String>,
    disabled: Option<bool>,
}

pub(crate) async fn list(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    match users::list_all(&state.db) {
        Ok(items) => Json(items).into_response(),
        Err(err) => domain_error(&err),
    }
}

pub(crate) async fn create(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    let req: UserCreateRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if req.email.trim().is_empty() || req.password.is_empty() || req.role.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_payload");
    }

    match users::create(&state.db, &req.email, &req.password, req.role.trim(), false) {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => domain_error(&err),
    }
}

pub(crate) async fn update(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
    body: Bytes,
) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    let req: UserUpdateRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    match users::admin_update(
        &state.db,
        user_id,
        req.password.as_deref(),
        req.role.as_deref(),
        req.disabled,
    ) {
        Ok(updated) => Json(updated).into_response(),
        Err(err) => domain_error(&err),
    }
}

pub(crate) async fn remove(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    match users::delete(&state.db, user_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => domain_error(&err),
    }
}
