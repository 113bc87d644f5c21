//! Usage: Gateway state, route table, and the routing/failover core.

pub(crate) mod admin;
pub(crate) mod auth;
pub(crate) mod catalog;
pub(crate) mod errors;
pub(crate) mod failover;
pub(crate) mod forwarder;
pub(crate) mod openai;
pub(crate) mod payload;
pub(crate) mod resolver;
pub(crate) mod streams;

#[cfg(test)]
mod tests;

use crate::db::Db;
use crate::settings::AppSettings;
use crate::usage_logs::UsageLogInsert;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use catalog::ModelCatalog;
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) struct AppContext {
    pub db: Db,
    pub settings: AppSettings,
    pub catalog: ModelCatalog,
    pub http: reqwest::Client,
    pub usage_tx: mpsc::Sender<UsageLogInsert>,
}

pub(crate) type GatewayState = Arc<AppContext>;

pub(crate) fn build_http_client(settings: &AppSettings) -> Result<reqwest::Client, String> {
    let mut builder = reqwest::Client::builder();
    if settings.upstream_connect_timeout_seconds > 0 {
        builder = builder.connect_timeout(std::time::Duration::from_secs(u64::from(
            settings.upstream_connect_timeout_seconds,
        )));
    }
    builder
        .build()
        .map_err(|e| format!("SYSTEM_ERROR: failed to build http client: {e}"))
}

pub(crate) fn router(state: GatewayState) -> Router {
    // The OpenAI-compatible surface answers both under /api/v1 (the
    // canonical mount) and /v1 for clients that omit the /api prefix.
    let openai_routes = Router::new()
        .route("/models", get(openai::list_models))
        .route("/chat/completions", post(openai::chat_completions))
        .route("/completions", post(openai::completions))
        .route("/embeddings", post(openai::embeddings));

    Router::new()
        .route("/healthz", get(health))
        // Session-authenticated administrative surface.
        .route("/api/auth/login", post(admin::auth::login))
        .route("/api/auth/logout", post(admin::auth::logout))
        .route("/api/auth/me", get(admin::auth::me))
        .route(
            "/api/account",
            get(admin::auth::account_get).put(admin::auth::account_update),
        )
        .route(
            "/api/users",
            get(admin::users::list).post(admin::users::create),
        )
        .route(
            "/api/users/:id",
            put(admin::users::update).delete(admin::users::remove),
        )
        .route("/api/keys", get(admin::keys::list).post(admin::keys::create))
        .route("/api/keys/:id", delete(admin::keys::remove))
        .route("/api/admin/users/:id/keys", get(admin::keys::admin_list_for_user))
        .route(
            "/api/providers",
            get(admin::providers::list).post(admin::providers::create),
        )
        .route(
            "/api/providers/:id",
            get(admin::providers::get_one)
                .put(admin::providers::update)
                .delete(admin::providers::remove),
        )
        .route(
            "/api/providers/:id/refresh_models",
            post(admin::providers::refresh_models),
        )
        .route("/api/models", get(admin::providers::runtime_models))
        .route(
            "/api/fallbacks",
            get(admin::fallbacks::list).post(admin::fallbacks::create),
        )
        .route(
            "/api/fallbacks/:id",
            get(admin::fallbacks::get_one)
                .put(admin::fallbacks::update)
                .delete(admin::fallbacks::remove),
        )
        .route("/api/stats/me", get(admin::stats::me))
        .route("/api/admin/stats/user/:id", get(admin::stats::admin_for_user))
        .route("/api/chat", post(openai::session_chat))
        .route("/chat", post(openai::session_chat))
        .nest("/api/v1", openai_routes.clone())
        .nest("/v1", openai_routes)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
pub(crate) fn test_context(
    db: Db,
) -> (
    GatewayState,
    tokio::sync::mpsc::Receiver<UsageLogInsert>,
) {
    let (usage_tx, usage_rx) = tokio::sync::mpsc::channel(64);
    let state = Arc::new(AppContext {
        db,
        settings: AppSettings::default(),
        catalog: ModelCatalog::new(),
        http: reqwest::Client::new(),
        usage_tx,
    });
    (state, usage_rx)
}
