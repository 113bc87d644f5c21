//! Usage: Provider administration + runtime model listing handlers.

use super::super::catalog;
use super::super::errors::{domain_error, error_response};
use super::super::GatewayState;
use super::{guard_admin, guard_session, parse_json};
use crate::providers::{self, ProviderSummary, ProviderUpsertRequest};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

fn attach_runtime_models(state: &GatewayState, summary: &mut ProviderSummary) {
    summary.runtime_models = state.catalog.get(summary.id);
}

pub(crate) async fn list(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if let Err(resp) = guard_session(&state, &headers) {
        return resp;
    }

    match providers::list_all(&state.db) {
        Ok(mut items) => {
            for item in &mut items {
                attach_runtime_models(&state, item);
            }
            Json(items).into_response()
        }
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

    let req: ProviderUpsertRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if req.name.trim().is_empty() || req.ptype.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_payload");
    }

    let mut created = match providers::create(&state.db, req) {
        Ok(created) => created,
        Err(err) => return domain_error(&err),
    };

    // Best-effort initial poll; the provider record stands even if it fails.
    match providers::get_for_gateway(&state.db, created.id) {
        Ok(provider) => {
            if let Err(err) = catalog::refresh_provider(&state.catalog, &state.http, &provider).await
            {
                tracing::warn!(provider = %provider.name, error = %err, "initial model poll failed");
            }
        }
        Err(err) => tracing::warn!(error = %err, "provider reload for poll failed"),
    }

    attach_runtime_models(&state, &mut created);
    (StatusCode::CREATED, Json(created)).into_response()
}

pub(crate) async fn get_one(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(provider_id): Path<i64>,
) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    match providers::get(&state.db, provider_id) {
        Ok(mut summary) => {
            attach_runtime_models(&state, &mut summary);
            Json(summary).into_response()
        }
        Err(err) => domain_error(&err),
    }
}

pub(crate) async fn update(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(provider_id): Path<i64>,
    body: Bytes,
) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    let req: ProviderUpsertRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let (mut updated, was_enabled) = match providers::update(&state.db, provider_id, req) {
        Ok(result) => result,
        Err(err) => return domain_error(&err),
    };

    if updated.enabled {
        match providers::get_for_gateway(&state.db, provider_id) {
            Ok(provider) => {
                if let Err(err) =
                    catalog::refresh_provider(&state.catalog, &state.http, &provider).await
                {
                    tracing::warn!(provider = %provider.name, error = %err, "model poll after update failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "provider reload for poll failed"),
        }
    } else if was_enabled {
        // Disable clears rather than refreshes.
        state.catalog.clear(provider_id);
    }

    attach_runtime_models(&state, &mut updated);
    Json(updated).into_response()
}

pub(crate) async fn remove(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(provider_id): Path<i64>,
) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    if let Err(err) = providers::delete(&state.db, provider_id) {
        return domain_error(&err);
    }
    state.catalog.clear(provider_id);
    StatusCode::NO_CONTENT.into_response()
}

/// Explicit refresh: unlike create/update, a poll failure is surfaced.
pub(crate) async fn refresh_models(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(provider_id): Path<i64>,
) -> Response {
    if let Err(resp) = guard_admin(&state, &headers) {
        return resp;
    }

    let provider = match providers::get_for_gateway(&state.db, provider_id) {
        Ok(provider) => provider,
        Err(err) => return domain_error(&err),
    };

    if let Err(err) = catalog::refresh_provider(&state.catalog, &state.http, &provider).await {
        tracing::warn!(provider = %provider.name, error = %err, "explicit model refresh failed");
        return error_response(StatusCode::BAD_GATEWAY, "refresh_failed");
    }

    match providers::get(&state.db, provider_id) {
        Ok(mut summary) => {
            attach_runtime_models(&state, &mut summary);
            Json(summary).into_response()
        }
        Err(err) => domain_error(&err),
    }
}

#[derive(Debug, Serialize)]
struct RuntimeModel {
    provider_id: i64,
    provider_name: String,
    name: String,
}

/// Flat listing of the live catalog across enabled providers.
pub(crate) async fn runtime_models(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = guard_session(&state, &headers) {
        return resp;
    }

    let enabled = match providers::list_enabled(&state.db) {
        Ok(v) => v,
        Err(err) => return domain_error(&err),
    };

    let mut out = Vec::new();
    for provider in &enabled {
        for name in state.catalog.get(provider.id) {
            out.push(RuntimeModel {
                provider_id: provider.id,
                provider_name: provider.name.clone(),
                name,
            });
        }
    }

    Json(out).into_response()
}
