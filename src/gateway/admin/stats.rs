//! Usage: Usage aggregate handlers (per-user request/latency/token totals).

use super::super::errors::domain_error;
use super::super::GatewayState;
use super::{guard_admin, guard_session};
use crate::usage_logs;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};

pub(crate) async fn me(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    let user = match guard_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match usage_logs::summary_for_user(&state.db, user.user_id) {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => domain_error(&err),
    }
}

pub(crate) async fn admin_for_user(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    match usage_logs::summary_for_user(&state.db, user_id) {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => domain_error(&err),
    }
}
