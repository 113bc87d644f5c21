//! Usage: OpenAI-compatible endpoints (model listing + proxy entry points).

use super::auth;
use super::errors::{domain_error, error_response};
use super::failover;
use super::forwarder::{forward_attempt, mirror_response, AttemptOutcome, AttemptResult, UsageIdentity};
use super::payload::ChatPayload;
use super::resolver;
use super::GatewayState;
use crate::{fallbacks, providers};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

const CHAT_COMPLETIONS_ENDPOINT: &str = "/chat/completions";
const COMPLETIONS_ENDPOINT: &str = "/completions";
const EMBEDDINGS_ENDPOINT: &str = "/embeddings";

#[derive(Debug, Serialize)]
struct ModelObject {
    id: String,
    object: &'static str,
    owned_by: String,
}

#[derive(Debug, Serialize)]
struct ModelListResponse {
    object: &'static str,
    data: Vec<ModelObject>,
}

/// One entry per (enabled provider x cataloged model), plus one synthetic
/// entry per enabled fallback route. Providers with an empty catalog entry
/// contribute nothing.
pub(super) async fn list_models(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if let Err(resp) = auth::authenticate_api(&state, &headers) {
        return resp;
    }

    let enabled = match providers::list_enabled(&state.db) {
        Ok(v) => v,
        Err(err) => return domain_error(&err),
    };

    let mut data = Vec::new();
    for provider in &enabled {
        for name in state.catalog.get(provider.id) {
            data.push(ModelObject {
                id: format!("{}/{}", provider.name.to_ascii_lowercase(), name),
                object: "model",
                owned_by: provider.name.clone(),
            });
        }
    }

    match fallbacks::list_enabled_names(&state.db) {
        Ok(names) => {
            for name in names {
                data.push(ModelObject {
                    id: format!("{}{name}", resolver::ROUTER_PREFIX),
                    object: "model",
                    owned_by: "router".to_string(),
                });
            }
        }
        Err(err) => return domain_error(&err),
    }

    Json(ModelListResponse {
        object: "list",
        data,
    })
    .into_response()
}

pub(super) async fn chat_completions(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy_openai(state, headers, body, CHAT_COMPLETIONS_ENDPOINT, true).await
}

pub(super) async fn completions(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy_openai(state, headers, body, COMPLETIONS_ENDPOINT, false).await
}

pub(super) async fn embeddings(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy_openai(state, headers, body, EMBEDDINGS_ENDPOINT, false).await
}

/// Session-only chat variant: same pipeline as chat/completions but always
/// buffered, with `stream:false` written into the forwarded body.
pub(super) async fn session_chat(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user = match auth::authenticate_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if let Err(resp) = auth::ensure_password_changed(&user) {
        return resp;
    }

    let mut payload = match ChatPayload::parse(&body) {
        Ok(payload) => payload,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid_json"),
    };
    let Some(client_model) = payload.client_model().map(str::to_string) else {
        return error_response(StatusCode::BAD_REQUEST, "model_required");
    };

    let identity = UsageIdentity {
        user_id: user.user_id,
        api_key_id: None,
    };

    if resolver::is_router_identifier(&client_model) {
        return failover::run_route(
            &state,
            &identity,
            &client_model,
            &mut payload,
            CHAT_COMPLETIONS_ENDPOINT,
            false,
        )
        .await;
    }

    payload.force_non_streaming();
    forward_single_target(
        &state,
        &identity,
        &client_model,
        payload,
        CHAT_COMPLETIONS_ENDPOINT,
        false,
    )
    .await
}

async fn proxy_openai(
    state: GatewayState,
    headers: HeaderMap,
    body: Bytes,
    endpoint: &str,
    allow_stream: bool,
) -> Response {
    let user = match auth::authenticate_api(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let mut payload = match ChatPayload::parse(&body) {
        Ok(payload) => payload,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid_json"),
    };
    let Some(client_model) = payload.client_model().map(str::to_string) else {
        return error_response(StatusCode::BAD_REQUEST, "model_required");
    };

    let identity = UsageIdentity {
        user_id: user.user_id,
        api_key_id: user.api_key_id,
    };
    let stream_requested = allow_stream && payload.wants_stream();

    if resolver::is_router_identifier(&client_model) {
        return failover::run_route(
            &state,
            &identity,
            &client_model,
            &mut payload,
            endpoint,
            stream_requested,
        )
        .await;
    }

    forward_single_target(
        &state,
        &identity,
        &client_model,
        payload,
        endpoint,
        stream_requested,
    )
    .await
}

async fn forward_single_target(
    state: &GatewayState,
    identity: &UsageIdentity,
    client_model: &str,
    mut payload: ChatPayload,
    endpoint: &str,
    stream_requested: bool,
) -> Response {
    let resolved = match resolver::resolve(&state.db, &state.catalog, client_model) {
        Ok(Some(resolved)) => resolved,
        Ok(None) => return error_response(StatusCode::BAD_REQUEST, "unknown_model"),
        Err(err) => return domain_error(&err),
    };

    payload.set_model(&resolved.model);
    let body = match payload.to_bytes() {
        Ok(body) => body,
        Err(err) => return domain_error(&err),
    };

    let result = forward_attempt(
        state,
        identity,
        &resolved.provider,
        client_model,
        endpoint,
        body,
        stream_requested,
    )
    .await;

    match result {
        AttemptResult::Committed(resp) => resp,
        AttemptResult::Completed(AttemptOutcome::TransportFailure) => {
            error_response(StatusCode::BAD_GATEWAY, "provider_error")
        }
        // A single explicit target mirrors whatever the upstream said,
        // success or failure; there is nothing to fall back to.
        AttemptResult::Completed(
            AttemptOutcome::Success { status, body }
            | AttemptOutcome::ClientError { status, body }
            | AttemptOutcome::RetryableFailure { status, body },
        ) => mirror_response(status, body),
    }
}
