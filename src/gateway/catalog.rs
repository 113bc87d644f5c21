//! Usage: Live model catalog (per-provider name lists pulled from upstreams).

use crate::providers::{self, ProviderForGateway};
use crate::shared::lock_ext::RwLockExt;
use crate::db::Db;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;

/// Process-local map of provider id -> model names currently offered by that
/// provider. Never persisted; rebuilt from upstream polls. Entries are
/// replaced wholesale so readers always observe one poll generation.
pub(crate) struct ModelCatalog {
    entries: RwLock<HashMap<i64, Vec<String>>>,
}

impl ModelCatalog {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn set(&self, provider_id: i64, names: Vec<String>) {
        self.entries.write_or_recover().insert(provider_id, names);
    }

    /// Defensive copy; absent providers read as an empty list, never an error.
    pub(crate) fn get(&self, provider_id: i64) -> Vec<String> {
        self.entries
            .read_or_recover()
            .get(&provider_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn clear(&self, provider_id: i64) {
        self.entries.write_or_recover().remove(&provider_id);
    }

    pub(crate) fn contains(&self, provider_id: i64, model: &str) -> bool {
        self.entries
            .read_or_recover()
            .get(&provider_id)
            .map(|names| names.iter().any(|name| name == model))
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct ModelListPayload {
    #[serde(default)]
    data: Vec<ModelListEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelListEntry {
    id: String,
}

/// `GET {base_url}/models` with bearer auth when configured. Any non-2xx
/// status or decode failure is a poll failure; the caller decides whether to
/// surface or swallow it. The catalog is left untouched on failure.
pub(crate) async fn pull_models(
    http: &reqwest::Client,
    provider: &ProviderForGateway,
) -> Result<Vec<String>, String> {
    let url = format!("{}/models", provider.base_url.trim_end_matches('/'));
    let mut req = http.get(&url);
    if !provider.api_key_plaintext.is_empty() {
        req = req.bearer_auth(&provider.api_key_plaintext);
    }

    let resp = req.send().await.map_err(|e| {
        format!(
            "UPSTREAM_ERROR: provider {} model listing failed: {e}",
            provider.name
        )
    })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(format!(
            "UPSTREAM_ERROR: provider {} model listing returned status {status}",
            provider.name
        ));
    }

    let body = resp.bytes().await.map_err(|e| {
        format!(
            "UPSTREAM_ERROR: provider {} model listing body read failed: {e}",
            provider.name
        )
    })?;

    let payload: ModelListPayload = serde_json::from_slice(&body).map_err(|e| {
        format!(
            "UPSTREAM_ERROR: provider {} model listing decode failed: {e}",
            provider.name
        )
    })?;

    Ok(payload.data.into_iter().map(|m| m.id).collect())
}

/// Polls one provider and replaces its catalog entry. Providers that are not
/// OpenAI-compatible are skipped; stale data is preferred over empty data, so
/// a failed poll leaves the previous entry in place.
pub(crate) async fn refresh_provider(
    catalog: &ModelCatalog,
    http: &reqwest::Client,
    provider: &ProviderForGateway,
) -> Result<usize, String> {
    if provider.ptype != providers::OPENAI_PROVIDER_TYPE {
        return Ok(0);
    }

    let names = pull_models(http, provider).await?;
    let count = names.len();
    catalog.set(provider.id, names);
    Ok(count)
}

/// Boot-time warm start: polls every enabled provider once, logging failures
/// without failing startup.
pub(crate) async fn warm_start(db: &Db, catalog: &ModelCatalog, http: &reqwest::Client) {
    let enabled = match providers::list_enabled(db) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(error = %err, "catalog warm start skipped: provider listing failed");
            return;
        }
    };

    for provider in &enabled {
        match refresh_provider(catalog, http, provider).await {
            Ok(count) => {
                tracing::info!(provider = %provider.name, models = count, "catalog warmed");
            }
            Err(err) => {
                tracing::warn!(provider = %provider.name, error = %err, "catalog warm start poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn get_returns_defensive_copy_and_empty_default() {
        let catalog = ModelCatalog::new();
        assert!(catalog.get(1).is_empty());

        catalog.set(1, vec!["a".to_string(), "b".to_string()]);
        let mut copy = catalog.get(1);
        copy.push("c".to_string());
        assert_eq!(catalog.get(1), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn set_replaces_and_clear_removes() {
        let catalog = ModelCatalog::new();
        catalog.set(1, vec!["a".to_string()]);
        catalog.set(1, vec!["b".to_string()]);
        assert_eq!(catalog.get(1), vec!["b".to_string()]);
        assert!(catalog.contains(1, "b"));
        assert!(!catalog.contains(1, "a"));

        catalog.clear(1);
        assert!(catalog.get(1).is_empty());
    }

    #[test]
    fn concurrent_readers_never_observe_mixed_generations() {
        let catalog = Arc::new(ModelCatalog::new());
        let gen_a: Vec<String> = (0..32).map(|i| format!("a-{i}")).collect();
        let gen_b: Vec<String> = (0..32).map(|i| format!("b-{i}")).collect();
        catalog.set(7, gen_a.clone());

        let mut readers = Vec::new();
        for _ in 0..4 {
            let catalog = Arc::clone(&catalog);
            let gen_a = gen_a.clone();
            let gen_b = gen_b.clone();
            readers.push(std::thread::spawn(move || {
                for _ in 0..2000 {
                    let seen = catalog.get(7);
                    assert!(
                        seen == gen_a || seen == gen_b,
                        "observed a torn catalog entry: {seen:?}"
                    );
                }
            }));
        }

        let writer = {
            let catalog = Arc::clone(&catalog);
            std::thread::spawn(move || {
                for i in 0..2000 {
                    if i % 2 == 0 {
                        catalog.set(7, gen_b.clone());
                    } else {
                        catalog.set(7, gen_a.clone());
                    }
                }
            })
        };

        for reader in readers {
            reader.join().expect("reader thread");
        }
        writer.join().expect("writer thread");
    }
}
