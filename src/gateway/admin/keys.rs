//! Usage: API key lifecycle handlers (self-service + admin listing).

use super::super::errors::domain_error;
use super::super::GatewayState;
use super::{guard_admin, guard_session, parse_json};
use crate::api_keys;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct KeyCreateRequest {
    #[serde(default)]
    name: String,
}

pub(crate) async fn list(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    let user = match guard_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match api_keys::list_for_user(&state.db, user.user_id) {
        Ok(items) => Json(items).into_response(),
        Err(err) => domain_error(&err),
    }
}

pub(crate) async fn create(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user = match guard_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let req: KeyCreateRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    // The plaintext value appears in this response and nowhere else.
    match api_keys::create(&state.db, user.user_id, &req.name) {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => domain_error(&err),
    }
}

pub(crate) async fn remove(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(key_id): Path<i64>,
) -> Response {
    let user = match guard_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match api_keys::delete_owned(&state.db, user.user_id, key_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => domain_error(&err),
    }
}

pub(crate) async fn admin_list_for_user(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    match api_keys::list_for_user(&state.db, user_id) {
        Ok(items) => Json(items).into_response(),
        Err(err) => domain_error(&err),
    }
}
