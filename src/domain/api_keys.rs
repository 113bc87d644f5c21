//! Usage: API key persistence (prefix-indexed digests, shown-once secrets).

use crate::db::Db;
use crate::shared::time::now_unix_seconds;
use rand::RngCore;
use rusqlite::params;
use serde::Serialize;
use sha2::{Digest, Sha256};

const KEY_RANDOM_BYTES: usize = 24;
const PREFIX_HEX_LEN: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ApiKeySummary {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub prefix: String,
    pub created_at: i64,
}

/// Returned once at creation time; the plaintext value is never stored.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreatedApiKey {
    pub id: i64,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub(crate) struct ValidatedApiKey {
    pub key_id: i64,
    pub user_id: i64,
}

fn hash_value(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Secrets look like `mg_xxxxxxxx_yyyy...`; the `mg_xxxxxxxx` prefix is stored
/// in the clear for lookup, the digest of the whole value for verification.
fn generate_value() -> (String, String) {
    let mut raw = [0u8; KEY_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut raw);
    let body = hex::encode(raw);
    let prefix = format!("mg_{}", &body[..PREFIX_HEX_LEN]);
    let value = format!("{prefix}_{}", &body[PREFIX_HEX_LEN..]);
    (prefix, value)
}

pub(crate) fn prefix_of(token: &str) -> Option<String> {
    let mut parts = token.splitn(3, '_');
    let tag = parts.next()?;
    let head = parts.next()?;
    if tag.is_empty() || head.is_empty() {
        return None;
    }
    Some(format!("{tag}_{head}"))
}

pub(crate) fn create(db: &Db, user_id: i64, name: &str) -> Result<CreatedApiKey, String> {
    let (prefix, value) = generate_value();
    let hash = hash_value(&value);

    let conn = db.open_connection()?;
    let now = now_unix_seconds();
    conn.execute(
        "INSERT INTO api_keys(user_id, name, prefix, key_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, name.trim(), prefix, hash, now],
    )
    .map_err(|e| format!("DB_ERROR: failed to insert api key: {e}"))?;

    Ok(CreatedApiKey {
        id: conn.last_insert_rowid(),
        name: name.trim().to_string(),
        value,
    })
}

pub(crate) fn list_for_user(db: &Db, user_id: i64) -> Result<Vec<ApiKeySummary>, String> {
    let conn = db.open_connection()?;
    let mut stmt = conn
        .prepare(
            "SELECT id, user_id, name, prefix, created_at FROM api_keys WHERE user_id = ?1 ORDER BY id DESC",
        )
        .map_err(|e| format!("DB_ERROR: failed to prepare api key query: {e}"))?;

    let rows = stmt
        .query_map(params![user_id], |row| {
            Ok(ApiKeySummary {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
                prefix: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .map_err(|e| format!("DB_ERROR: failed to list api keys: {e}"))?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(|e| format!("DB_ERROR: failed to read api key row: {e}"))?);
    }
    Ok(items)
}

pub(crate) fn delete_owned(db: &Db, user_id: i64, key_id: i64) -> Result<(), String> {
    let conn = db.open_connection()?;
    conn.execute(
        "DELETE FROM api_keys WHERE id = ?1 AND user_id = ?2",
        params![key_id, user_id],
    )
    .map_err(|e| format!("DB_ERROR: failed to delete api key: {e}"))?;
    Ok(())
}

/// Prefix lookup + whole-value digest comparison. Returns None for anything
/// that does not verify; the caller decides how to surface it.
pub(crate) fn validate(db: &Db, token: &str) -> Result<Option<ValidatedApiKey>, String> {
    let Some(prefix) = prefix_of(token) else {
        return Ok(None);
    };
    let hash = hash_value(token);

    let conn = db.open_connection()?;
    let mut stmt = conn
        .prepare("SELECT id, user_id, key_hash FROM api_keys WHERE prefix = ?1")
        .map_err(|e| format!("DB_ERROR: failed to prepare api key lookup: {e}"))?;

    let rows = stmt
        .query_map(params![prefix], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(|e| format!("DB_ERROR: failed to query api keys: {e}"))?;

    for row in rows {
        let (key_id, user_id, key_hash) =
            row.map_err(|e| format!("DB_ERROR: failed to read api key row: {e}"))?;
        if key_hash == hash {
            return Ok(Some(ValidatedApiKey { key_id, user_id }));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users;

    fn test_db_with_user() -> (tempfile::TempDir, Db, i64) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = crate::db::init_for_tests(dir.path());
        let user = users::create(&db, "a@b.c", "secret1", users::ROLE_USER, false).expect("user");
        (dir, db, user.id)
    }

    #[test]
    fn prefix_of_parses_expected_shape() {
        assert_eq!(
            prefix_of("mg_deadbeef_cafe").as_deref(),
            Some("mg_deadbeef")
        );
        assert_eq!(prefix_of("mg_deadbeef").as_deref(), Some("mg_deadbeef"));
        assert!(prefix_of("deadbeef").is_none());
        assert!(prefix_of("_x").is_none());
    }

    #[test]
    fn created_key_validates_and_revokes() {
        let (_dir, db, user_id) = test_db_with_user();
        let created = create(&db, user_id, "ci").expect("create");
        assert!(created.value.starts_with("mg_"));

        let validated = validate(&db, &created.value)
            .expect("validate")
            .expect("some");
        assert_eq!(validated.user_id, user_id);
        assert_eq!(validated.key_id, created.id);

        // A forged token sharing the prefix must not verify.
        let forged = format!("{}_{}", prefix_of(&created.value).unwrap(), "0".repeat(40));
        assert!(validate(&db, &forged).expect("validate forged").is_none());

        delete_owned(&db, user_id, created.id).expect("delete");
        assert!(validate(&db, &created.value).expect("validate").is_none());
    }
}
