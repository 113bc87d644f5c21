//! Usage: End-to-end failover tests against in-process stub upstreams.

use super::failover::run_route;
use super::forwarder::{forward_attempt, AttemptOutcome, AttemptResult, UsageIdentity};
use super::openai;
use super::payload::ChatPayload;
use super::test_context;
use crate::usage_logs::UsageLogInsert;
use crate::{api_keys, fallbacks, providers, users};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const BODY_LIMIT: usize = 1024 * 1024;
const OK_BODY: &str = r#"{"id":"cmpl-1","usage":{"prompt_tokens":3,"completion_tokens":5}}"#;
const FAIL_BODY: &str = r#"{"error":{"message":"upstream exploded"}}"#;

const IDENTITY: UsageIdentity = UsageIdentity {
    user_id: 1,
    api_key_id: None,
};

async fn spawn_upstream(status: u16, body: &'static str, hits: Arc<AtomicUsize>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub upstream");
    let addr = listener.local_addr().expect("stub addr");

    let app = axum::Router::new().fallback(move || {
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            (
                StatusCode::from_u16(status).expect("stub status"),
                body,
            )
        }
    });

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{addr}")
}

fn add_provider(db: &crate::db::Db, name: &str, base_url: &str, enabled: bool) -> i64 {
    providers::create(
        db,
        providers::ProviderUpsertRequest {
            name: name.to_string(),
            ptype: "openai".to_string(),
            base_url: base_url.to_string(),
            api_key: "sk-test".to_string(),
            enabled,
        },
    )
    .expect("create provider")
    .id
}

fn add_route(db: &crate::db::Db, name: &str, targets: &[(i64, &str)]) {
    let route = fallbacks::create(db, name, true).expect("create route");
    let targets: Vec<(i64, String)> = targets
        .iter()
        .map(|(id, model)| (*id, model.to_string()))
        .collect();
    fallbacks::replace_targets(db, route.id, &targets).expect("replace targets");
}

fn chat_payload() -> ChatPayload {
    ChatPayload::parse(br#"{"model":"router/primary","messages":[{"role":"user","content":"hi"}]}"#)
        .expect("parse payload")
}

fn drain_usage(rx: &mut mpsc::Receiver<UsageLogInsert>) -> Vec<UsageLogInsert> {
    let mut out = Vec::new();
    while let Ok(record) = rx.try_recv() {
        out.push(record);
    }
    out
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

#[tokio::test]
async fn failover_advances_past_a_500_and_stops_at_the_first_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = crate::db::init_for_tests(dir.path());

    let a_hits = Arc::new(AtomicUsize::new(0));
    let b_hits = Arc::new(AtomicUsize::new(0));
    let c_hits = Arc::new(AtomicUsize::new(0));
    let a = spawn_upstream(500, FAIL_BODY, a_hits.clone()).await;
    let b = spawn_upstream(200, OK_BODY, b_hits.clone()).await;
    let c = spawn_upstream(200, OK_BODY, c_hits.clone()).await;

    let a_id = add_provider(&db, "prov-a", &a, true);
    let b_id = add_provider(&db, "prov-b", &b, true);
    let c_id = add_provider(&db, "prov-c", &c, true);
    add_route(&db, "primary", &[(a_id, "m-a"), (b_id, "m-b"), (c_id, "m-c")]);

    let (state, mut usage_rx) = test_context(db);
    let mut payload = chat_payload();
    let resp = run_route(
        &state,
        &IDENTITY,
        "router/primary",
        &mut payload,
        "/chat/completions",
        false,
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, OK_BODY);

    let usage = drain_usage(&mut usage_rx);
    assert_eq!(usage.len(), 2);
    assert_eq!((usage[0].provider_id, usage[0].status), (a_id, 500));
    assert_eq!((usage[1].provider_id, usage[1].status), (b_id, 200));
    assert_eq!((usage[1].tokens_in, usage[1].tokens_out), (3, 5));
    assert_eq!(usage[0].model, "router/primary");

    assert_eq!(c_hits.load(Ordering::SeqCst), 0, "C must never be invoked");
}

#[tokio::test]
async fn a_4xx_short_circuits_the_route() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = crate::db::init_for_tests(dir.path());

    let a_hits = Arc::new(AtomicUsize::new(0));
    let b_hits = Arc::new(AtomicUsize::new(0));
    let a = spawn_upstream(429, FAIL_BODY, a_hits.clone()).await;
    let b = spawn_upstream(200, OK_BODY, b_hits.clone()).await;

    let a_id = add_provider(&db, "prov-a", &a, true);
    let b_id = add_provider(&db, "prov-b", &b, true);
    add_route(&db, "primary", &[(a_id, "m-a"), (b_id, "m-b")]);

    let (state, mut usage_rx) = test_context(db);
    let mut payload = chat_payload();
    let resp = run_route(
        &state,
        &IDENTITY,
        "router/primary",
        &mut payload,
        "/chat/completions",
        false,
    )
    .await;

    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_string(resp).await, FAIL_BODY);

    let usage = drain_usage(&mut usage_rx);
    assert_eq!(usage.len(), 1, "exactly one usage record");
    assert_eq!((usage[0].provider_id, usage[0].status), (a_id, 429));
    assert_eq!(b_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exhausted_route_mirrors_the_last_5xx() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = crate::db::init_for_tests(dir.path());

    let hits = Arc::new(AtomicUsize::new(0));
    let a = spawn_upstream(500, FAIL_BODY, hits.clone()).await;
    let b = spawn_upstream(502, FAIL_BODY, hits.clone()).await;
    let c = spawn_upstream(503, FAIL_BODY, hits.clone()).await;

    let a_id = add_provider(&db, "prov-a", &a, true);
    let b_id = add_provider(&db, "prov-b", &b, true);
    let c_id = add_provider(&db, "prov-c", &c, true);
    add_route(&db, "primary", &[(a_id, "m-a"), (b_id, "m-b"), (c_id, "m-c")]);

    let (state, mut usage_rx) = test_context(db);
    let mut payload = chat_payload();
    let resp = run_route(
        &state,
        &IDENTITY,
        "router/primary",
        &mut payload,
        "/chat/completions",
        false,
    )
    .await;

    // The last attempted target's status and body are what the client sees.
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(resp).await, FAIL_BODY);

    let usage = drain_usage(&mut usage_rx);
    assert_eq!(usage.len(), 3);
    let statuses: Vec<u16> = usage.iter().map(|u| u.status).collect();
    assert_eq!(statuses, vec![500, 502, 503]);
}

#[tokio::test]
async fn disabled_providers_are_skipped_without_counting_as_attempts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = crate::db::init_for_tests(dir.path());

    let a_hits = Arc::new(AtomicUsize::new(0));
    let b_hits = Arc::new(AtomicUsize::new(0));
    let a = spawn_upstream(200, OK_BODY, a_hits.clone()).await;
    let b = spawn_upstream(200, OK_BODY, b_hits.clone()).await;

    let a_id = add_provider(&db, "prov-a", &a, false);
    let b_id = add_provider(&db, "prov-b", &b, true);
    add_route(&db, "primary", &[(a_id, "m-a"), (b_id, "m-b")]);

    let (state, mut usage_rx) = test_context(db);
    let mut payload = chat_payload();
    let resp = run_route(
        &state,
        &IDENTITY,
        "router/primary",
        &mut payload,
        "/chat/completions",
        false,
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let usage = drain_usage(&mut usage_rx);
    assert_eq!(usage.len(), 1, "skipped targets do not record usage");
    assert_eq!(usage[0].provider_id, b_id);
    assert_eq!(a_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transport_failures_record_status_zero_and_advance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = crate::db::init_for_tests(dir.path());

    let b_hits = Arc::new(AtomicUsize::new(0));
    let b = spawn_upstream(200, OK_BODY, b_hits.clone()).await;

    // Nothing listens on port 1; the connection is refused.
    let a_id = add_provider(&db, "prov-a", "http://127.0.0.1:1", true);
    let b_id = add_provider(&db, "prov-b", &b, true);
    add_route(&db, "primary", &[(a_id, "m-a"), (b_id, "m-b")]);

    let (state, mut usage_rx) = test_context(db);
    let mut payload = chat_payload();
    let resp = run_route(
        &state,
        &IDENTITY,
        "router/primary",
        &mut payload,
        "/chat/completions",
        false,
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let usage = drain_usage(&mut usage_rx);
    assert_eq!(usage.len(), 2);
    assert_eq!((usage[0].provider_id, usage[0].status), (a_id, 0));
    assert_eq!((usage[1].provider_id, usage[1].status), (b_id, 200));
}

#[tokio::test]
async fn unknown_or_disabled_routes_fail_before_any_upstream_call() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = crate::db::init_for_tests(dir.path());

    fallbacks::create(&db, "dormant", false).expect("create route");

    let (state, mut usage_rx) = test_context(db);

    for model in ["router/missing", "router/dormant", "Router/Dormant"] {
        let mut payload = chat_payload();
        let resp = run_route(
            &state,
            &IDENTITY,
            model,
            &mut payload,
            "/chat/completions",
            false,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{model}");
        assert_eq!(body_string(resp).await, r#"{"error":"unknown_model"}"#);
    }

    assert!(drain_usage(&mut usage_rx).is_empty());
}

#[tokio::test]
async fn route_with_only_unusable_targets_reports_exhaustion() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = crate::db::init_for_tests(dir.path());

    let a_id = add_provider(&db, "prov-a", "http://127.0.0.1:1", false);
    add_route(&db, "primary", &[(a_id, "m-a"), (9999, "m-ghost")]);

    let (state, mut usage_rx) = test_context(db);
    let mut payload = chat_payload();
    let resp = run_route(
        &state,
        &IDENTITY,
        "router/primary",
        &mut payload,
        "/chat/completions",
        false,
    )
    .await;

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_string(resp).await, r#"{"error":"no_available_target"}"#);
    assert!(drain_usage(&mut usage_rx).is_empty());
}

#[tokio::test]
async fn single_attempt_parses_usage_and_mirrors_the_body() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = crate::db::init_for_tests(dir.path());

    let hits = Arc::new(AtomicUsize::new(0));
    let addr = spawn_upstream(200, OK_BODY, hits.clone()).await;
    let id = add_provider(&db, "acme", &addr, true);

    let (state, mut usage_rx) = test_context(db);
    let provider = providers::get_for_gateway(&state.db, id).expect("provider");

    let result = forward_attempt(
        &state,
        &IDENTITY,
        &provider,
        "acme/m-x",
        "/chat/completions",
        br#"{"model":"m-x"}"#.to_vec(),
        false,
    )
    .await;

    match result {
        AttemptResult::Completed(AttemptOutcome::Success { status, body }) => {
            assert_eq!(status, 200);
            assert_eq!(body.as_ref(), OK_BODY.as_bytes());
        }
        _ => panic!("expected a buffered success"),
    }

    let usage = drain_usage(&mut usage_rx);
    assert_eq!(usage.len(), 1);
    assert_eq!((usage[0].tokens_in, usage[0].tokens_out), (3, 5));
    assert_eq!(usage[0].model, "acme/m-x");
}

#[tokio::test]
async fn model_listing_covers_enabled_providers_and_routes_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = crate::db::init_for_tests(dir.path());

    let acme_id = add_provider(&db, "Acme", "http://127.0.0.1:1", true);
    let beta_id = add_provider(&db, "beta", "http://127.0.0.1:1", false);
    fallbacks::create(&db, "primary", true).expect("create route");
    fallbacks::create(&db, "dormant", false).expect("create route");

    let user = users::create(&db, "a@b.c", "secret1", users::ROLE_USER, false).expect("user");
    let key = api_keys::create(&db, user.id, "ci").expect("key");

    let (state, _usage_rx) = test_context(db);
    state.catalog.set(acme_id, vec!["gpt-x".to_string(), "gpt-y".to_string()]);
    // A disabled provider's entry is ignored even if it is still populated.
    state.catalog.set(beta_id, vec!["ghost".to_string()]);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", key.value)).expect("header"),
    );

    let resp = openai::list_models(State(state.clone()), headers).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_string(resp).await;
    let value: serde_json::Value = serde_json::from_str(&body).expect("json");
    assert_eq!(value["object"], "list");

    let ids: Vec<&str> = value["data"]
        .as_array()
        .expect("data array")
        .iter()
        .map(|m| m["id"].as_str().expect("id"))
        .collect();
    assert_eq!(ids, vec!["acme/gpt-x", "acme/gpt-y", "router/primary"]);

    let owners: Vec<&str> = value["data"]
        .as_array()
        .expect("data array")
        .iter()
        .map(|m| m["owned_by"].as_str().expect("owned_by"))
        .collect();
    assert_eq!(owners, vec!["Acme", "Acme", "router"]);

    // Without credentials the listing is rejected before any work happens.
    let resp = openai::list_models(State(state), HeaderMap::new()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn a_streaming_success_commits_and_records_usage_at_stream_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = crate::db::init_for_tests(dir.path());

    let hits = Arc::new(AtomicUsize::new(0));
    let addr = spawn_upstream(200, "data: chunk\n\ndata: [DONE]\n\n", hits.clone()).await;
    let id = add_provider(&db, "acme", &addr, true);

    let (state, mut usage_rx) = test_context(db);
    let provider = providers::get_for_gateway(&state.db, id).expect("provider");

    let result = forward_attempt(
        &state,
        &IDENTITY,
        &provider,
        "acme/m-x",
        "/chat/completions",
        br#"{"model":"m-x","stream":true}"#.to_vec(),
        true,
    )
    .await;

    let resp = match result {
        AttemptResult::Committed(resp) => resp,
        _ => panic!("expected a committed stream"),
    };
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    // No usage row until the stream has been consumed.
    assert!(usage_rx.try_recv().is_err());

    let body = body_string(resp).await;
    assert_eq!(body, "data: chunk\n\ndata: [DONE]\n\n");

    let usage = drain_usage(&mut usage_rx);
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].status, 200);
    assert_eq!((usage[0].tokens_in, usage[0].tokens_out), (0, 0));
}
