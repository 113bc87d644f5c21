//! Usage: Fallback route administration handlers.

use super::super::errors::{domain_error, error_response};
use super::super::resolver;
use super::super::GatewayState;
use super::{guard_admin, parse_json};
use crate::fallbacks;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FallbackUpsertRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    enabled: bool,
    // Qualified `provider/model` identifiers in priority order. None leaves
    // the stored target list untouched; Some replaces it wholesale.
    targets: Option<Vec<String>>,
}

/// Resolves submitted qualified identifiers into (provider_id, raw model)
/// pairs; any identifier that does not resolve rejects the whole request.
fn resolve_targets(
    state: &GatewayState,
    qualified: &[String],
) -> Result<Vec<(i64, String)>, Response> {
    let mut out = Vec::with_capacity(qualified.len());
    for identifier in qualified {
        let resolved = resolver::resolve(&state.db, &state.catalog, identifier)
            .map_err(|err| domain_error(&err))?;
        let Some(resolved) = resolved else {
            return Err(error_response(StatusCode::BAD_REQUEST, "unknown_model"));
        };
        out.push((resolved.provider.id, resolved.model));
    }
    Ok(out)
}

pub(crate) async fn list(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    match fallbacks::list_all(&state.db) {
        Ok(routes) => Json(routes).into_response(),
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

    let req: FallbackUpsertRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if req.name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_payload");
    }

    let route = match fallbacks::create(&state.db, &req.name, req.enabled) {
        Ok(route) => route,
        Err(err) => return domain_error(&err),
    };

    if let Some(targets) = req.targets.as_deref() {
        let resolved = match resolve_targets(&state, targets) {
            Ok(resolved) => resolved,
            Err(resp) => return resp,
        };
        if let Err(err) = fallbacks::replace_targets(&state.db, route.id, &resolved) {
            return domain_error(&err);
        }
    }

    match fallbacks::get(&state.db, route.id) {
        Ok(route) => (StatusCode::CREATED, Json(route)).into_response(),
        Err(err) => domain_error(&err),
    }
}

pub(crate) async fn get_one(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(route_id): Path<i64>,
) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    match fallbacks::get(&state.db, route_id) {
        Ok(route) => Json(route).into_response(),
        Err(err) => domain_error(&err),
    }
}

pub(crate) async fn update(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(route_id): Path<i64>,
    body: Bytes,
) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    let req: FallbackUpsertRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let name = Some(req.name.as_str()).filter(|v| !v.trim().is_empty());
    if let Err(err) = fallbacks::update(&state.db, route_id, name, req.enabled) {
        return domain_error(&err);
    }

    if let Some(targets) = req.targets.as_deref() {
        let resolved = match resolve_targets(&state, targets) {
            Ok(resolved) => resolved,
            Err(resp) => return resp,
        };
        if let Err(err) = fallbacks::replace_targets(&state.db, route_id, &resolved) {
            return domain_error(&err);
        }
    }

    match fallbacks::get(&state.db, route_id) {
        Ok(route) => Json(route).into_response(),
        Err(err) => domain_error(&err),
    }
}

pub(crate) async fn remove(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(route_id): Path<i64>,
) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    match fallbacks::delete(&state.db, route_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => domain_error(&err),
    }
}
