//! Usage: Fallback route persistence (ordered targets, all-or-nothing replacement).

use crate::db::Db;
use crate::shared::time::now_unix_seconds;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct FallbackTargetView {
    pub provider_id: i64,
    pub model: String,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct FallbackRouteSummary {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub targets: Vec<FallbackTargetView>,
}

/// Gateway-side view: just the ordered (provider, model) pairs.
#[derive(Debug, Clone)]
pub(crate) struct RouteForGateway {
    pub name: String,
    pub targets: Vec<RouteTarget>,
}

#[derive(Debug, Clone)]
pub(crate) struct RouteTarget {
    pub provider_id: i64,
    pub model: String,
}

fn load_targets(conn: &Connection, route_id: i64) -> Result<Vec<FallbackTargetView>, String> {
    let mut stmt = conn
        .prepare(
            r#"
SELECT provider_id, model, position
FROM fallback_targets
WHERE route_id = ?1
ORDER BY position ASC, id ASC
"#,
        )
        .map_err(|e| format!("DB_ERROR: failed to prepare target query: {e}"))?;

    let rows = stmt
        .query_map(params![route_id], |row| {
            Ok(FallbackTargetView {
                provider_id: row.get(0)?,
                model: row.get(1)?,
                position: row.get(2)?,
            })
        })
        .map_err(|e| format!("DB_ERROR: failed to query targets: {e}"))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| format!("DB_ERROR: failed to read target row: {e}"))?);
    }
    Ok(out)
}

fn row_to_route(row: &rusqlite::Row<'_>) -> Result<FallbackRouteSummary, rusqlite::Error> {
    Ok(FallbackRouteSummary {
        id: row.get("id")?,
        name: row.get("name")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        targets: Vec::new(),
    })
}

pub(crate) fn list_all(db: &Db) -> Result<Vec<FallbackRouteSummary>, String> {
    let conn = db.open_connection()?;
    let mut stmt = conn
        .prepare("SELECT id, name, enabled, created_at, updated_at FROM fallback_routes ORDER BY id ASC")
        .map_err(|e| format!("DB_ERROR: failed to prepare route query: {e}"))?;

    let rows = stmt
        .query_map([], row_to_route)
        .map_err(|e| format!("DB_ERROR: failed to list routes: {e}"))?;

    let mut routes = Vec::new();
    for row in rows {
        routes.push(row.map_err(|e| format!("DB_ERROR: failed to read route row: {e}"))?);
    }
    for route in &mut routes {
        route.targets = load_targets(&conn, route.id)?;
    }
    Ok(routes)
}

pub(crate) fn get(db: &Db, route_id: i64) -> Result<FallbackRouteSummary, String> {
    let conn = db.open_connection()?;
    let mut route = conn
        .query_row(
            "SELECT id, name, enabled, created_at, updated_at FROM fallback_routes WHERE id = ?1",
            params![route_id],
            row_to_route,
        )
        .optional()
        .map_err(|e| format!("DB_ERROR: failed to query route: {e}"))?
        .ok_or_else(|| "DB_NOT_FOUND: route not found".to_string())?;

    route.targets = load_targets(&conn, route.id)?;
    Ok(route)
}

pub(crate) fn create(db: &Db, name: &str, enabled: bool) -> Result<FallbackRouteSummary, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("SEC_INVALID_INPUT: route name is required".to_string());
    }

    let conn = db.open_connection()?;
    let now = now_unix_seconds();
    conn.execute(
        "INSERT INTO fallback_routes(name, enabled, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![name, if enabled { 1i64 } else { 0i64 }, now],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            format!("DB_CONSTRAINT: route already exists: name={name}")
        }
        other => format!("DB_ERROR: failed to insert route: {other}"),
    })?;

    let id = conn.last_insert_rowid();
    drop(conn);
    get(db, id)
}

pub(crate) fn update(
    db: &Db,
    route_id: i64,
    name: Option<&str>,
    enabled: bool,
) -> Result<FallbackRouteSummary, String> {
    let conn = db.open_connection()?;
    let existing_name: Option<String> = conn
        .query_row(
            "SELECT name FROM fallback_routes WHERE id = ?1",
            params![route_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| format!("DB_ERROR: failed to query route: {e}"))?;

    let Some(existing_name) = existing_name else {
        return Err("DB_NOT_FOUND: route not found".to_string());
    };

    let next_name = match name.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v.to_string(),
        None => existing_name,
    };

    let now = now_unix_seconds();
    conn.execute(
        "UPDATE fallback_routes SET name = ?1, enabled = ?2, updated_at = ?3 WHERE id = ?4",
        params![next_name, if enabled { 1i64 } else { 0i64 }, now, route_id],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            format!("DB_CONSTRAINT: route already exists: name={next_name}")
        }
        other => format!("DB_ERROR: failed to update route: {other}"),
    })?;

    drop(conn);
    get(db, route_id)
}

pub(crate) fn delete(db: &Db, route_id: i64) -> Result<(), String> {
    let conn = db.open_connection()?;
    let changed = conn
        .execute(
            "DELETE FROM fallback_routes WHERE id = ?1",
            params![route_id],
        )
        .map_err(|e| format!("DB_ERROR: failed to delete route: {e}"))?;

    if changed == 0 {
        return Err("DB_NOT_FOUND: route not found".to_string());
    }
    Ok(())
}

/// Replaces a route's target list in one transaction so a reader never sees a
/// partially-updated chain. Positions are assigned from the slice order.
pub(crate) fn replace_targets(
    db: &Db,
    route_id: i64,
    targets: &[(i64, String)],
) -> Result<(), String> {
    let mut conn = db.open_connection()?;
    let tx = conn
        .transaction()
        .map_err(|e| format!("DB_ERROR: failed to start transaction: {e}"))?;

    tx.execute(
        "DELETE FROM fallback_targets WHERE route_id = ?1",
        params![route_id],
    )
    .map_err(|e| format!("DB_ERROR: failed to clear targets: {e}"))?;

    for (position, (provider_id, model)) in targets.iter().enumerate() {
        tx.execute(
            "INSERT INTO fallback_targets(route_id, provider_id, model, position) VALUES (?1, ?2, ?3, ?4)",
            params![route_id, provider_id, model, position as i64],
        )
        .map_err(|e| format!("DB_ERROR: failed to insert target: {e}"))?;
    }

    tx.commit()
        .map_err(|e| format!("DB_ERROR: failed to commit transaction: {e}"))?;

    Ok(())
}

/// Exact-name lookup over enabled routes; the caller lowercases and strips
/// the `router/` prefix first.
pub(crate) fn get_enabled_by_name(db: &Db, name: &str) -> Result<Option<RouteForGateway>, String> {
    let conn = db.open_connection()?;
    let route: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, name FROM fallback_routes WHERE enabled = 1 AND name = ?1",
            params![name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| format!("DB_ERROR: failed to query route: {e}"))?;

    let Some((id, name)) = route else {
        return Ok(None);
    };

    let targets = load_targets(&conn, id)?
        .into_iter()
        .map(|t| RouteTarget {
            provider_id: t.provider_id,
            model: t.model,
        })
        .collect();

    Ok(Some(RouteForGateway { name, targets }))
}

pub(crate) fn list_enabled_names(db: &Db) -> Result<Vec<String>, String> {
    let conn = db.open_connection()?;
    let mut stmt = conn
        .prepare("SELECT name FROM fallback_routes WHERE enabled = 1 ORDER BY id ASC")
        .map_err(|e| format!("DB_ERROR: failed to prepare route name query: {e}"))?;

    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| format!("DB_ERROR: failed to list route names: {e}"))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| format!("DB_ERROR: failed to read route name: {e}"))?);
    }
    Ok(out)
}
