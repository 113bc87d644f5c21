//! Usage: Process bootstrap (settings, logging, db, catalog warm start, server loop).

pub(crate) mod logging;

use crate::gateway::{self, catalog, AppContext};
use crate::{db, settings, usage_logs, users};
use std::sync::Arc;

pub async fn run() -> Result<(), String> {
    let settings = settings::load()?;
    let _log_guard = logging::init(&settings);

    let db = db::init(&settings.db_path())?;

    match users::seed_admin(&db, &settings.admin_seed_email, &settings.admin_seed_password) {
        Ok(true) => {
            tracing::info!(email = %settings.admin_seed_email, "seeded initial admin account");
        }
        Ok(false) => {}
        Err(err) => return Err(err),
    }

    let http = gateway::build_http_client(&settings)?;
    let catalog = catalog::ModelCatalog::new();

    // One poll per enabled provider; individual failures are logged and boot
    // continues regardless.
    catalog::warm_start(&db, &catalog, &http).await;

    let (usage_tx, _usage_writer) = usage_logs::start_buffered_writer(db.clone());

    let state = Arc::new(AppContext {
        db,
        settings: settings.clone(),
        catalog,
        http,
        usage_tx,
    });
    let router = gateway::router(state);

    let addr = format!("{}:{}", settings.bind_address, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("SYSTEM_ERROR: failed to bind {addr}: {e}"))?;
    tracing::info!(addr = %addr, "modelgate listening");

    axum::serve(listener, router)
        .await
        .map_err(|e| format!("SYSTEM_ERROR: server error: {e}"))
}
