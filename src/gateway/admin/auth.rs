//! Usage: Login/logout/session identity + self-service account handlers.

use super::super::auth::{authenticate_session, session_token, SESSION_COOKIE};
use super::super::errors::{domain_error, error_response};
use super::super::GatewayState;
use super::parse_json;
use crate::{sessions, users};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
struct AccountUpdateRequest {
    email: Option<String>,
    current_password: Option<String>,
    new_password: Option<String>,
}

fn session_cookie_header(token: &str, max_age_seconds: i64) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    ))
    .ok()
}

pub(crate) async fn login(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Response {
    let req: LoginRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let email = req.email.trim().to_ascii_lowercase();
    let record = match users::get_record_by_email(&state.db, &email) {
        Ok(record) => record,
        Err(err) => return domain_error(&err),
    };

    let Some(record) = record else {
        return error_response(StatusCode::UNAUTHORIZED, "invalid_credentials");
    };
    if record.disabled || !record.check_password(&req.password) {
        return error_response(StatusCode::UNAUTHORIZED, "invalid_credentials");
    }

    let token = match sessions::issue(&state.db, record.id, state.settings.session_ttl_hours) {
        Ok(token) => token,
        Err(err) => return domain_error(&err),
    };

    let mut resp = Json(serde_json::json!({ "ok": true })).into_response();
    let max_age = i64::from(state.settings.session_ttl_hours) * 3600;
    if let Some(cookie) = session_cookie_header(&token, max_age) {
        resp.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    resp
}

pub(crate) async fn logout(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        if let Err(err) = sessions::revoke(&state.db, &token) {
            tracing::warn!(error = %err, "session revocation failed");
        }
    }

    let mut resp = Json(serde_json::json!({ "ok": true })).into_response();
    if let Some(cookie) = session_cookie_header("", 0) {
        resp.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    resp
}

pub(crate) async fn me(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    let user = match authenticate_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match users::get_summary(&state.db, user.user_id) {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => domain_error(&err),
    }
}

pub(crate) async fn account_get(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    me(State(state), headers).await
}

pub(crate) async fn account_update(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user = match authenticate_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let req: AccountUpdateRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let record = match users::get_record(&state.db, user.user_id) {
        Ok(Some(record)) => record,
        Ok(None) => return error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
        Err(err) => return domain_error(&err),
    };

    let mut changed = false;

    if let Some(email) = req.email.as_deref() {
        let email = email.trim();
        if !email.is_empty() && !email.eq_ignore_ascii_case(&record.email) {
            if let Err(err) = users::set_own_email(&state.db, user.user_id, email) {
                return domain_error(&err);
            }
            changed = true;
        }
    }

    if let Some(new_password) = req.new_password.as_deref() {
        let current_ok = req
            .current_password
            .as_deref()
            .map(|pw| record.check_password(pw))
            .unwrap_or(false);
        if !current_ok {
            return error_response(StatusCode::BAD_REQUEST, "current_password_incorrect");
        }
        if users::validate_password(new_password).is_err() {
            return error_response(StatusCode::BAD_REQUEST, "new_password_too_short");
        }
        if let Err(err) = users::set_own_password(&state.db, user.user_id, new_password) {
            return domain_error(&err);
        }
        changed = true;
    }

    if !changed {
        return error_response(StatusCode::BAD_REQUEST, "no_changes");
    }

    match users::get_summary(&state.db, user.user_id) {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => domain_error(&err),
    }
}
