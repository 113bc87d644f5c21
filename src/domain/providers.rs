//! Usage: Provider configuration persistence and gateway lookup helpers.

use crate::db::Db;
use crate::shared::time::now_unix_seconds;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

pub(crate) const OPENAI_PROVIDER_TYPE: &str = "openai";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Outward-facing provider view. The upstream API key is deliberately absent.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProviderSummary {
    pub id: i64,
    pub name: String,
    pub ptype: String,
    pub base_url: String,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub runtime_models: Vec<String>,
}

/// Internal view used by the forwarding path; carries the upstream secret.
/// Enabled-ness is enforced by the queries that produce it.
#[derive(Debug, Clone)]
pub(crate) struct ProviderForGateway {
    pub id: i64,
    pub name: String,
    pub ptype: String,
    pub base_url: String,
    pub api_key_plaintext: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ProviderUpsertRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub ptype: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub enabled: bool,
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> Result<ProviderSummary, rusqlite::Error> {
    Ok(ProviderSummary {
        id: row.get("id")?,
        name: row.get("name")?,
        ptype: row.get("ptype")?,
        base_url: row.get("base_url")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        runtime_models: Vec::new(),
    })
}

fn row_to_gateway(row: &rusqlite::Row<'_>) -> Result<ProviderForGateway, rusqlite::Error> {
    Ok(ProviderForGateway {
        id: row.get("id")?,
        name: row.get("name")?,
        ptype: row.get("ptype")?,
        base_url: row.get("base_url")?,
        api_key_plaintext: row.get("api_key_plaintext")?,
    })
}

const SUMMARY_COLUMNS: &str = "id, name, ptype, base_url, enabled, created_at, updated_at";
const GATEWAY_COLUMNS: &str = "id, name, ptype, base_url, api_key_plaintext";

pub(crate) fn list_all(db: &Db) -> Result<Vec<ProviderSummary>, String> {
    let conn = db.open_connection()?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM providers ORDER BY id ASC"
        ))
        .map_err(|e| format!("DB_ERROR: failed to prepare provider query: {e}"))?;

    let rows = stmt
        .query_map([], row_to_summary)
        .map_err(|e| format!("DB_ERROR: failed to list providers: {e}"))?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(|e| format!("DB_ERROR: failed to read provider row: {e}"))?);
    }
    Ok(items)
}

pub(crate) fn get(db: &Db, provider_id: i64) -> Result<ProviderSummary, String> {
    let conn = db.open_connection()?;
    conn.query_row(
        &format!("SELECT {SUMMARY_COLUMNS} FROM providers WHERE id = ?1"),
        params![provider_id],
        row_to_summary,
    )
    .optional()
    .map_err(|e| format!("DB_ERROR: failed to query provider: {e}"))?
    .ok_or_else(|| "DB_NOT_FOUND: provider not found".to_string())
}

pub(crate) fn create(db: &Db, req: ProviderUpsertRequest) -> Result<ProviderSummary, String> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err("SEC_INVALID_INPUT: provider name is required".to_string());
    }
    let ptype = req.ptype.trim().to_ascii_lowercase();
    if ptype.is_empty() {
        return Err("SEC_INVALID_INPUT: provider type is required".to_string());
    }
    let base_url = normalize_base_url(&req.base_url);

    let conn = db.open_connection()?;
    let now = now_unix_seconds();
    conn.execute(
        r#"
INSERT INTO providers(name, ptype, base_url, api_key_plaintext, enabled, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
"#,
        params![
            name,
            ptype,
            base_url,
            req.api_key.trim(),
            enabled_to_int(req.enabled),
            now
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            format!("DB_CONSTRAINT: provider already exists: name={name}")
        }
        other => format!("DB_ERROR: failed to insert provider: {other}"),
    })?;

    let id = conn.last_insert_rowid();
    drop(conn);
    get(db, id)
}

/// Partial update in the manner of the original API: empty strings leave the
/// stored value untouched, `enabled` is always applied. Returns the previous
/// enabled flag so the caller can clear the catalog on disable.
pub(crate) fn update(
    db: &Db,
    provider_id: i64,
    req: ProviderUpsertRequest,
) -> Result<(ProviderSummary, bool), String> {
    let conn = db.open_connection()?;

    let existing: Option<(String, String, String, String, i64)> = conn
        .query_row(
            "SELECT name, ptype, base_url, api_key_plaintext, enabled FROM providers WHERE id = ?1",
            params![provider_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )
        .optional()
        .map_err(|e| format!("DB_ERROR: failed to query provider: {e}"))?;

    let Some((name, ptype, base_url, api_key, enabled)) = existing else {
        return Err("DB_NOT_FOUND: provider not found".to_string());
    };
    let was_enabled = enabled != 0;

    let next_name = non_empty_or(&req.name, &name);
    let next_ptype = if req.ptype.trim().is_empty() {
        ptype
    } else {
        req.ptype.trim().to_ascii_lowercase()
    };
    let next_base_url = non_empty_or(&req.base_url, &base_url);
    let next_api_key = non_empty_or(&req.api_key, &api_key);

    let now = now_unix_seconds();
    conn.execute(
        r#"
UPDATE providers
SET name = ?1, ptype = ?2, base_url = ?3, api_key_plaintext = ?4, enabled = ?5, updated_at = ?6
WHERE id = ?7
"#,
        params![
            next_name,
            next_ptype,
            next_base_url,
            next_api_key,
            enabled_to_int(req.enabled),
            now,
            provider_id
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            format!("DB_CONSTRAINT: provider already exists: name={next_name}")
        }
        other => format!("DB_ERROR: failed to update provider: {other}"),
    })?;

    drop(conn);
    Ok((get(db, provider_id)?, was_enabled))
}

pub(crate) fn delete(db: &Db, provider_id: i64) -> Result<(), String> {
    let conn = db.open_connection()?;
    let changed = conn
        .execute("DELETE FROM providers WHERE id = ?1", params![provider_id])
        .map_err(|e| format!("DB_ERROR: failed to delete provider: {e}"))?;

    if changed == 0 {
        return Err("DB_NOT_FOUND: provider not found".to_string());
    }
    Ok(())
}

pub(crate) fn list_enabled(db: &Db) -> Result<Vec<ProviderForGateway>, String> {
    let conn = db.open_connection()?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {GATEWAY_COLUMNS} FROM providers WHERE enabled = 1 ORDER BY id ASC"
        ))
        .map_err(|e| format!("DB_ERROR: failed to prepare gateway provider query: {e}"))?;

    let rows = stmt
        .query_map([], row_to_gateway)
        .map_err(|e| format!("DB_ERROR: failed to list gateway providers: {e}"))?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(|e| format!("DB_ERROR: failed to read gateway provider row: {e}"))?);
    }
    Ok(items)
}

/// Enabled-only lookup for fallback targets: disabled or deleted providers
/// resolve to None and are skipped without counting as an attempt.
pub(crate) fn get_enabled_by_id(
    db: &Db,
    provider_id: i64,
) -> Result<Option<ProviderForGateway>, String> {
    let conn = db.open_connection()?;
    conn.query_row(
        &format!("SELECT {GATEWAY_COLUMNS} FROM providers WHERE id = ?1 AND enabled = 1"),
        params![provider_id],
        row_to_gateway,
    )
    .optional()
    .map_err(|e| format!("DB_ERROR: failed to query gateway provider: {e}"))
}

pub(crate) fn get_for_gateway(db: &Db, provider_id: i64) -> Result<ProviderForGateway, String> {
    let conn = db.open_connection()?;
    conn.query_row(
        &format!("SELECT {GATEWAY_COLUMNS} FROM providers WHERE id = ?1"),
        params![provider_id],
        row_to_gateway,
    )
    .optional()
    .map_err(|e| format!("DB_ERROR: failed to query gateway provider: {e}"))?
    .ok_or_else(|| "DB_NOT_FOUND: provider not found".to_string())
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_OPENAI_BASE_URL.to_string();
    }
    trimmed.to_string()
}

fn non_empty_or(candidate: &str, fallback: &str) -> String {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

fn enabled_to_int(enabled: bool) -> i64 {
    if enabled {
        1
    } else {
        0
    }
}
