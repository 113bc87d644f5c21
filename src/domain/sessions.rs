//! Usage: DB-backed opaque session tokens (issue, validate, revoke).

use crate::db::Db;
use crate::shared::time::now_unix_seconds;
use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Issues a fresh opaque token for the user. Only the digest is stored.
pub(crate) fn issue(db: &Db, user_id: i64, ttl_hours: u32) -> Result<String, String> {
    let mut raw = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut raw);
    let token = hex::encode(raw);

    let now = now_unix_seconds();
    let expires_at = now + i64::from(ttl_hours) * 3600;

    let conn = db.open_connection()?;
    conn.execute(
        "INSERT INTO sessions(token_hash, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![hash_token(&token), user_id, expires_at, now],
    )
    .map_err(|e| format!("DB_ERROR: failed to insert session: {e}"))?;

    // Opportunistic cleanup; failure is not an error for the caller.
    let _ = conn.execute("DELETE FROM sessions WHERE expires_at < ?1", params![now]);

    Ok(token)
}

pub(crate) fn validate(db: &Db, token: &str) -> Result<Option<i64>, String> {
    if token.is_empty() {
        return Ok(None);
    }

    let conn = db.open_connection()?;
    let now = now_unix_seconds();
    conn.query_row(
        "SELECT user_id FROM sessions WHERE token_hash = ?1 AND expires_at >= ?2",
        params![hash_token(token), now],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map_err(|e| format!("DB_ERROR: failed to query session: {e}"))
}

pub(crate) fn revoke(db: &Db, token: &str) -> Result<(), String> {
    let conn = db.open_connection()?;
    conn.execute(
        "DELETE FROM sessions WHERE token_hash = ?1",
        params![hash_token(token)],
    )
    .map_err(|e| format!("DB_ERROR: failed to delete session: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users;

    #[test]
    fn issue_validate_revoke_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = crate::db::init_for_tests(dir.path());
        let user = users::create(&db, "a@b.c", "secret1", users::ROLE_USER, false).expect("user");

        let token = issue(&db, user.id, 24).expect("issue");
        assert_eq!(validate(&db, &token).expect("validate"), Some(user.id));
        assert_eq!(validate(&db, "bogus").expect("validate bogus"), None);

        revoke(&db, &token).expect("revoke");
        assert_eq!(validate(&db, &token).expect("validate revoked"), None);
    }
}
