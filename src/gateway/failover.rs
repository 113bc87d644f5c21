//! Usage: Fallback route iteration (skip / continue / stop / commit policy).

use super::errors::{domain_error, error_response};
use super::forwarder::{
    forward_attempt, mirror_response, AttemptOutcome, AttemptResult, UsageIdentity,
};
use super::payload::ChatPayload;
use super::resolver;
use super::AppContext;
use crate::{fallbacks, providers};
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::Response;

/// What the iteration does after one classified attempt.
#[derive(Debug)]
pub(crate) enum RouteStep {
    // Mirror this response to the client and stop.
    Respond { status: u16, body: Bytes },
    // Remember this as the latest retryable failure and try the next target.
    Remember { status: u16, body: Bytes },
    // Try the next target without remembering anything.
    Continue,
}

pub(crate) fn step_for_outcome(outcome: AttemptOutcome) -> RouteStep {
    match outcome {
        AttemptOutcome::Success { status, body } => RouteStep::Respond { status, body },
        // Client errors are not retryable; they pass through verbatim.
        AttemptOutcome::ClientError { status, body } => RouteStep::Respond { status, body },
        AttemptOutcome::RetryableFailure { status, body } => RouteStep::Remember { status, body },
        AttemptOutcome::TransportFailure => RouteStep::Continue,
    }
}

/// Walks a route's targets in position order until one responds, commits to a
/// stream, or the chain is exhausted. Usage rows are emitted per attempt by
/// the forwarder; skipped targets do not count as attempts.
pub(crate) async fn run_route(
    state: &AppContext,
    identity: &UsageIdentity,
    client_model: &str,
    payload: &mut ChatPayload,
    endpoint: &str,
    stream_requested: bool,
) -> Response {
    let name = resolver::route_name(client_model);
    let route = match fallbacks::get_enabled_by_name(&state.db, &name) {
        Ok(Some(route)) => route,
        Ok(None) => return error_response(StatusCode::BAD_REQUEST, "unknown_model"),
        Err(err) => return domain_error(&err),
    };

    let mut last_failure: Option<(u16, Bytes)> = None;

    for target in &route.targets {
        let provider = match providers::get_enabled_by_id(&state.db, target.provider_id) {
            Ok(Some(provider)) => provider,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(route = %route.name, provider_id = target.provider_id, error = %err, "target provider lookup failed");
                continue;
            }
        };

        payload.set_model(&target.model);
        let body = match payload.to_bytes() {
            Ok(body) => body,
            Err(err) => return domain_error(&err),
        };

        let result = forward_attempt(
            state,
            identity,
            &provider,
            client_model,
            endpoint,
            body,
            stream_requested,
        )
        .await;

        let outcome = match result {
            // Streaming has begun; the route is committed to this target.
            AttemptResult::Committed(resp) => return resp,
            AttemptResult::Completed(outcome) => outcome,
        };

        match step_for_outcome(outcome) {
            RouteStep::Respond { status, body } => return mirror_response(status, body),
            RouteStep::Remember { status, body } => last_failure = Some((status, body)),
            RouteStep::Continue => {}
        }
    }

    match last_failure {
        Some((status, body)) => mirror_response(status, body),
        None => error_response(StatusCode::BAD_GATEWAY, "no_available_target"),
    }
}
