//! Usage: Administrative JSON API (session-authenticated CRUD surface).

pub(crate) mod auth;
pub(crate) mod fallbacks;
pub(crate) mod keys;
pub(crate) mod providers;
pub(crate) mod stats;
pub(crate) mod users;

use super::auth::{authenticate_session, ensure_password_changed, require_admin, AuthedUser};
use super::errors::error_response;
use super::AppContext;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::de::DeserializeOwned;

pub(super) fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid_payload"))
}

/// Session auth + the seeded-admin password gate.
pub(super) fn guard_session(
    state: &AppContext,
    headers: &HeaderMap,
) -> Result<AuthedUser, Response> {
    let user = authenticate_session(state, headers)?;
    ensure_password_changed(&user)?;
    Ok(user)
}

pub(super) fn guard_admin(state: &AppContext, headers: &HeaderMap) -> Result<AuthedUser, Response> {
    let user = authenticate_session(state, headers)?;
    require_admin(&user)?;
    ensure_password_changed(&user)?;
    Ok(user)
}
