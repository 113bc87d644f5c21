//! Usage: Upstream request forwarding (buffered mirror + committed streaming).

use super::errors::error_response;
use super::streams::{StreamUsageCtx, UsageTeeStream};
use super::AppContext;
use crate::providers::ProviderForGateway;
use crate::usage_logs::{self, UsageLogInsert};
use axum::{
    body::{Body, Bytes},
    http::{header, StatusCode},
    response::Response,
};
use serde::Deserialize;
use std::borrow::Cow;
use std::io::Read;
use std::time::{Duration, Instant};

const INTROSPECTION_MAX_BYTES: usize = 8 * 1024 * 1024;

/// Per-attempt outcome consumed by the failover iteration. Exactly four
/// variants: the decision tree is the whole contract.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Success { status: u16, body: Bytes },
    ClientError { status: u16, body: Bytes },
    RetryableFailure { status: u16, body: Bytes },
    TransportFailure,
}

pub(crate) enum AttemptResult {
    // Streaming to the client has begun; the route is committed to this
    // target and cannot fall back.
    Committed(Response),
    Completed(AttemptOutcome),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct UsageIdentity {
    pub user_id: i64,
    pub api_key_id: Option<i64>,
}

pub(crate) fn classify_status(status: u16, body: Bytes) -> AttemptOutcome {
    match status {
        200..=299 => AttemptOutcome::Success { status, body },
        500..=599 => AttemptOutcome::RetryableFailure { status, body },
        _ => AttemptOutcome::ClientError { status, body },
    }
}

#[derive(Debug, Default, Deserialize)]
struct UsageTokens {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
}

#[derive(Debug, Default, Deserialize)]
struct UsageEnvelope {
    #[serde(default)]
    usage: UsageTokens,
}

fn has_gzip_content_encoding(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get(reqwest::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|enc| !enc.is_empty())
                .any(|enc| enc.eq_ignore_ascii_case("gzip"))
        })
        .unwrap_or(false)
}

/// Inflates a gzip body for token parsing only; the raw bytes are still what
/// gets mirrored to the client. Falls back to the original bytes on any
/// decode problem or oversized output.
fn body_for_introspection<'a>(
    headers: &reqwest::header::HeaderMap,
    body: &'a [u8],
) -> Cow<'a, [u8]> {
    if !has_gzip_content_encoding(headers) || body.is_empty() {
        return Cow::Borrowed(body);
    }

    let mut decoder = flate2::read::GzDecoder::new(body);
    let mut out: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if out.len().saturating_add(n) > INTROSPECTION_MAX_BYTES {
                    return Cow::Borrowed(body);
                }
                out.extend_from_slice(&buf[..n]);
            }
            Err(_) => return Cow::Borrowed(body),
        }
    }
    Cow::Owned(out)
}

/// Absent or unparseable usage blocks read as zero; that is not an error.
fn parse_usage_tokens(headers: &reqwest::header::HeaderMap, body: &[u8]) -> (i64, i64) {
    let introspection = body_for_introspection(headers, body);
    match serde_json::from_slice::<UsageEnvelope>(introspection.as_ref()) {
        Ok(envelope) => (
            envelope.usage.prompt_tokens,
            envelope.usage.completion_tokens,
        ),
        Err(_) => (0, 0),
    }
}

fn record_usage(
    state: &AppContext,
    identity: &UsageIdentity,
    provider_id: i64,
    client_model: &str,
    status: u16,
    started: Instant,
    tokens_in: i64,
    tokens_out: i64,
) {
    usage_logs::enqueue(
        &state.usage_tx,
        &state.db,
        UsageLogInsert {
            user_id: identity.user_id,
            api_key_id: identity.api_key_id,
            provider_id,
            model: client_model.to_string(),
            status,
            latency_ms: started.elapsed().as_millis().min(i64::MAX as u128) as i64,
            tokens_in,
            tokens_out,
        },
    );
}

/// Mirrors an upstream status and raw body verbatim to the client.
pub(crate) fn mirror_response(status: u16, body: Bytes) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    match Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
    {
        Ok(resp) => resp,
        Err(_) => error_response(StatusCode::BAD_GATEWAY, "provider_error"),
    }
}

/// One upstream attempt against one (provider, model) target. Emits exactly
/// one usage record per attempt: immediately for buffered/transport outcomes,
/// at stream end for committed streaming responses.
pub(crate) async fn forward_attempt(
    state: &AppContext,
    identity: &UsageIdentity,
    provider: &ProviderForGateway,
    client_model: &str,
    endpoint: &str,
    body: Vec<u8>,
    stream_requested: bool,
) -> AttemptResult {
    let started = Instant::now();
    let url = format!("{}{}", provider.base_url.trim_end_matches('/'), endpoint);

    let mut req = state
        .http
        .post(&url)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body);
    if !provider.api_key_plaintext.is_empty() {
        req = req.bearer_auth(&provider.api_key_plaintext);
    }
    if !stream_requested && state.settings.upstream_request_timeout_non_streaming_seconds > 0 {
        req = req.timeout(Duration::from_secs(u64::from(
            state.settings.upstream_request_timeout_non_streaming_seconds,
        )));
    }

    let resp = match req.send().await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(provider = %provider.name, url = %url, error = %err, "upstream request failed");
            record_usage(state, identity, provider.id, client_model, 0, started, 0, 0);
            return AttemptResult::Completed(AttemptOutcome::TransportFailure);
        }
    };

    let status = resp.status().as_u16();

    if stream_requested && (200..300).contains(&status) {
        let ctx = StreamUsageCtx {
            usage_tx: state.usage_tx.clone(),
            db: state.db.clone(),
            record: UsageLogInsert {
                user_id: identity.user_id,
                api_key_id: identity.api_key_id,
                provider_id: provider.id,
                model: client_model.to_string(),
                status,
                latency_ms: 0,
                // Token counts are unknowable without parsing every chunk.
                tokens_in: 0,
                tokens_out: 0,
            },
            started,
        };
        let tee = UsageTeeStream::new(Box::pin(resp.bytes_stream()), ctx);

        let response = Response::builder()
            .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK))
            .header(header::CONTENT_TYPE, "text/event-stream")
            .body(Body::from_stream(tee));
        return match response {
            Ok(resp) => AttemptResult::Committed(resp),
            Err(_) => AttemptResult::Committed(error_response(
                StatusCode::BAD_GATEWAY,
                "provider_error",
            )),
        };
    }

    let resp_headers = resp.headers().clone();
    let body = match resp.bytes().await {
        Ok(body) => body,
        Err(err) => {
            // Headers arrived but the body did not: the response was never
            // completely received, so this counts as a transport failure.
            tracing::warn!(provider = %provider.name, url = %url, error = %err, "upstream body read failed");
            record_usage(state, identity, provider.id, client_model, 0, started, 0, 0);
            return AttemptResult::Completed(AttemptOutcome::TransportFailure);
        }
    };

    let (tokens_in, tokens_out) = parse_usage_tokens(&resp_headers, &body);
    record_usage(
        state, identity, provider.id, client_model, status, started, tokens_in, tokens_out,
    );

    AttemptResult::Completed(classify_status(status, body))
}
