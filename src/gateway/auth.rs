//! Usage: Request authentication (bearer API keys + session cookies).

use super::errors::error_response;
use super::AppContext;
use crate::{api_keys, sessions, users};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;

pub(crate) const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone)]
pub(crate) struct AuthedUser {
    pub user_id: i64,
    pub role: String,
    pub must_change_password: bool,
    // Present when the request authenticated with an API key.
    pub api_key_id: Option<i64>,
}

impl AuthedUser {
    pub(crate) fn is_admin(&self) -> bool {
        self.role == users::ROLE_ADMIN
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

pub(crate) fn session_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        if name.trim() == SESSION_COOKIE {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn user_from_id(
    state: &AppContext,
    user_id: i64,
    api_key_id: Option<i64>,
) -> Result<AuthedUser, Response> {
    let record = users::get_record(&state.db, user_id)
        .map_err(|err| super::errors::domain_error(&err))?;
    let Some(record) = record else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "unauthorized"));
    };
    if record.disabled {
        return Err(error_response(StatusCode::FORBIDDEN, "forbidden"));
    }
    Ok(AuthedUser {
        user_id: record.id,
        role: record.role,
        must_change_password: record.must_change_password,
        api_key_id,
    })
}

/// Auth gate for the OpenAI-compatible surface: a bearer API key when one is
/// presented, otherwise the session cookie. Runs before any routing.
pub(crate) fn authenticate_api(
    state: &AppContext,
    headers: &HeaderMap,
) -> Result<AuthedUser, Response> {
    if let Some(token) = bearer_token(headers) {
        let validated = api_keys::validate(&state.db, &token)
            .map_err(|err| super::errors::domain_error(&err))?;
        let Some(validated) = validated else {
            return Err(error_response(StatusCode::UNAUTHORIZED, "unauthorized"));
        };
        return user_from_id(state, validated.user_id, Some(validated.key_id));
    }

    authenticate_session(state, headers)
}

/// Session-cookie-only gate for the administrative surface.
pub(crate) fn authenticate_session(
    state: &AppContext,
    headers: &HeaderMap,
) -> Result<AuthedUser, Response> {
    let Some(token) = session_token(headers) else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "unauthorized"));
    };
    let user_id = sessions::validate(&state.db, &token)
        .map_err(|err| super::errors::domain_error(&err))?;
    let Some(user_id) = user_id else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "unauthorized"));
    };
    user_from_id(state, user_id, None)
}

pub(crate) fn require_admin(user: &AuthedUser) -> Result<(), Response> {
    if !user.is_admin() {
        return Err(error_response(StatusCode::FORBIDDEN, "forbidden"));
    }
    Ok(())
}

/// An admin whose seeded password is unchanged is locked out of everything
/// except the auth/account endpoints.
pub(crate) fn ensure_password_changed(user: &AuthedUser) -> Result<(), Response> {
    if user.is_admin() && user.must_change_password {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            "must_change_password",
        ));
    }
    Ok(())
}
