//! Usage: Qualified model identifier resolution against the live catalog.

use super::catalog::ModelCatalog;
use crate::db::Db;
use crate::providers::{self, ProviderForGateway};

pub(crate) const ROUTER_PREFIX: &str = "router/";

#[derive(Debug, Clone)]
pub(crate) struct ResolvedTarget {
    pub provider: ProviderForGateway,
    // Raw upstream model name, without the provider prefix.
    pub model: String,
}

pub(crate) fn is_router_identifier(qualified: &str) -> bool {
    qualified.to_ascii_lowercase().starts_with(ROUTER_PREFIX)
}

pub(crate) fn route_name(qualified: &str) -> String {
    qualified
        .to_ascii_lowercase()
        .trim_start_matches(ROUTER_PREFIX)
        .to_string()
}

/// Splits `provider/model` at the first slash and matches the provider
/// segment case-insensitively against enabled providers. The first name match
/// is authoritative: if the model is not in that provider's catalog entry,
/// resolution fails outright rather than trying another provider.
pub(crate) fn resolve_against(
    enabled_providers: &[ProviderForGateway],
    catalog: &ModelCatalog,
    qualified: &str,
) -> Option<ResolvedTarget> {
    let (provider_segment, model_segment) = qualified.split_once('/')?;
    let provider_segment = provider_segment.trim();
    let model_segment = model_segment.trim();
    if provider_segment.is_empty() || model_segment.is_empty() {
        return None;
    }

    let wanted = provider_segment.to_ascii_lowercase();
    for candidate in enabled_providers {
        if candidate.name.to_ascii_lowercase() != wanted {
            continue;
        }
        if catalog.contains(candidate.id, model_segment) {
            return Some(ResolvedTarget {
                provider: candidate.clone(),
                model: model_segment.to_string(),
            });
        }
        // Provider matched but model not found under it.
        return None;
    }
    None
}

pub(crate) fn resolve(
    db: &Db,
    catalog: &ModelCatalog,
    qualified: &str,
) -> Result<Option<ResolvedTarget>, String> {
    let enabled = providers::list_enabled(db)?;
    Ok(resolve_against(&enabled, catalog, qualified))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(id: i64, name: &str) -> ProviderForGateway {
        ProviderForGateway {
            id,
            name: name.to_string(),
            ptype: providers::OPENAI_PROVIDER_TYPE.to_string(),
            base_url: "https://upstream.example/v1".to_string(),
            api_key_plaintext: String::new(),
        }
    }

    fn catalog_with(id: i64, names: &[&str]) -> ModelCatalog {
        let catalog = ModelCatalog::new();
        catalog.set(id, names.iter().map(|s| s.to_string()).collect());
        catalog
    }

    #[test]
    fn malformed_identifiers_never_resolve() {
        let providers = vec![provider(1, "acme")];
        let catalog = catalog_with(1, &["gpt-x"]);

        for qualified in ["", "gpt-x", "/gpt-x", "acme/", "  /  ", "/"] {
            assert!(
                resolve_against(&providers, &catalog, qualified).is_none(),
                "{qualified:?} should not resolve"
            );
        }
    }

    #[test]
    fn provider_segment_is_case_insensitive() {
        let providers = vec![provider(1, "Acme")];
        let catalog = catalog_with(1, &["gpt-x"]);

        for qualified in ["acme/gpt-x", "Acme/gpt-x", "ACME/gpt-x"] {
            let resolved = resolve_against(&providers, &catalog, qualified).expect("resolve");
            assert_eq!(resolved.provider.id, 1);
            assert_eq!(resolved.model, "gpt-x");
        }
    }

    #[test]
    fn model_segment_is_verbatim_and_may_contain_slashes() {
        let providers = vec![provider(1, "acme")];
        let catalog = catalog_with(1, &["org/gpt-x"]);

        let resolved =
            resolve_against(&providers, &catalog, "acme/org/gpt-x").expect("resolve");
        assert_eq!(resolved.model, "org/gpt-x");

        assert!(resolve_against(&providers, &catalog, "acme/GPT-X").is_none());
    }

    #[test]
    fn provider_match_is_authoritative_even_on_model_miss() {
        // Two providers share a lowercased name; the first match decides.
        let providers = vec![provider(1, "acme"), provider(2, "ACME")];
        let catalog = ModelCatalog::new();
        catalog.set(2, vec!["gpt-x".to_string()]);

        assert!(resolve_against(&providers, &catalog, "acme/gpt-x").is_none());
    }

    #[test]
    fn cleared_catalog_entry_fails_resolution() {
        let providers = vec![provider(1, "acme")];
        let catalog = catalog_with(1, &["gpt-x"]);
        assert!(resolve_against(&providers, &catalog, "acme/gpt-x").is_some());

        catalog.clear(1);
        assert!(resolve_against(&providers, &catalog, "acme/gpt-x").is_none());
    }

    #[test]
    fn router_identifier_helpers() {
        assert!(is_router_identifier("router/primary"));
        assert!(is_router_identifier("Router/primary"));
        assert!(!is_router_identifier("acme/router"));
        assert_eq!(route_name("Router/Primary"), "primary");
    }
}
