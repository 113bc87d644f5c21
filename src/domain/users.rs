//! Usage: User account persistence (salted password digests, admin seeding).

use crate::db::Db;
use crate::shared::time::now_unix_seconds;
use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub(crate) const ROLE_ADMIN: &str = "admin";
pub(crate) const ROLE_USER: &str = "user";
const MIN_PASSWORD_LEN: usize = 6;
const SALT_LEN: usize = 16;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct UserSummary {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub disabled: bool,
    pub must_change_password: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Internal record carrying the credential digest; never serialized.
#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub disabled: bool,
    pub must_change_password: bool,
    password_hash: String,
    password_salt: String,
}

impl UserRecord {
    pub(crate) fn check_password(&self, password: &str) -> bool {
        hash_password(&self.password_salt, password) == self.password_hash
    }
}

fn hash_password(salt_hex: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt_hex.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn new_salt() -> String {
    let mut raw = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

pub(crate) fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err("SEC_INVALID_INPUT: password too short".to_string());
    }
    Ok(())
}

fn validate_role(role: &str) -> Result<(), String> {
    match role {
        ROLE_ADMIN | ROLE_USER => Ok(()),
        _ => Err(format!("SEC_INVALID_INPUT: unknown role={role}")),
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<UserRecord, rusqlite::Error> {
    Ok(UserRecord {
        id: row.get("id")?,
        email: row.get("email")?,
        role: row.get("role")?,
        disabled: row.get::<_, i64>("disabled")? != 0,
        must_change_password: row.get::<_, i64>("must_change_password")? != 0,
        password_hash: row.get("password_hash")?,
        password_salt: row.get("password_salt")?,
    })
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> Result<UserSummary, rusqlite::Error> {
    Ok(UserSummary {
        id: row.get("id")?,
        email: row.get("email")?,
        role: row.get("role")?,
        disabled: row.get::<_, i64>("disabled")? != 0,
        must_change_password: row.get::<_, i64>("must_change_password")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const RECORD_COLUMNS: &str =
    "id, email, role, disabled, must_change_password, password_hash, password_salt";
const SUMMARY_COLUMNS: &str =
    "id, email, role, disabled, must_change_password, created_at, updated_at";

pub(crate) fn list_all(db: &Db) -> Result<Vec<UserSummary>, String> {
    let conn = db.open_connection()?;
    let mut stmt = conn
        .prepare(&format!("SELECT {SUMMARY_COLUMNS} FROM users ORDER BY id ASC"))
        .map_err(|e| format!("DB_ERROR: failed to prepare user query: {e}"))?;

    let rows = stmt
        .query_map([], row_to_summary)
        .map_err(|e| format!("DB_ERROR: failed to list users: {e}"))?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(|e| format!("DB_ERROR: failed to read user row: {e}"))?);
    }
    Ok(items)
}

pub(crate) fn get_summary(db: &Db, user_id: i64) -> Result<UserSummary, String> {
    let conn = db.open_connection()?;
    conn.query_row(
        &format!("SELECT {SUMMARY_COLUMNS} FROM users WHERE id = ?1"),
        params![user_id],
        row_to_summary,
    )
    .optional()
    .map_err(|e| format!("DB_ERROR: failed to query user: {e}"))?
    .ok_or_else(|| "DB_NOT_FOUND: user not found".to_string())
}

pub(crate) fn get_record(db: &Db, user_id: i64) -> Result<Option<UserRecord>, String> {
    let conn = db.open_connection()?;
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM users WHERE id = ?1"),
        params![user_id],
        row_to_record,
    )
    .optional()
    .map_err(|e| format!("DB_ERROR: failed to query user: {e}"))
}

pub(crate) fn get_record_by_email(db: &Db, email: &str) -> Result<Option<UserRecord>, String> {
    let conn = db.open_connection()?;
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM users WHERE email = ?1"),
        params![email],
        row_to_record,
    )
    .optional()
    .map_err(|e| format!("DB_ERROR: failed to query user: {e}"))
}

pub(crate) fn create(
    db: &Db,
    email: &str,
    password: &str,
    role: &str,
    must_change_password: bool,
) -> Result<UserSummary, String> {
    validate_password(password)?;
    insert(db, email, password, role, must_change_password)
}

fn insert(
    db: &Db,
    email: &str,
    password: &str,
    role: &str,
    must_change_password: bool,
) -> Result<UserSummary, String> {
    let email = email.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err("SEC_INVALID_INPUT: email is required".to_string());
    }
    validate_role(role)?;

    let salt = new_salt();
    let hash = hash_password(&salt, password);

    let conn = db.open_connection()?;
    let now = now_unix_seconds();
    conn.execute(
        r#"
INSERT INTO users(email, password_hash, password_salt, role, disabled, must_change_password, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)
"#,
        params![
            email,
            hash,
            salt,
            role,
            if must_change_password { 1i64 } else { 0i64 },
            now
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            format!("DB_CONSTRAINT: email already exists: {email}")
        }
        other => format!("DB_ERROR: failed to insert user: {other}"),
    })?;

    let id = conn.last_insert_rowid();
    drop(conn);
    get_summary(db, id)
}

pub(crate) fn admin_update(
    db: &Db,
    user_id: i64,
    password: Option<&str>,
    role: Option<&str>,
    disabled: Option<bool>,
) -> Result<UserSummary, String> {
    let conn = db.open_connection()?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT id FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| format!("DB_ERROR: failed to query user: {e}"))?;
    if exists.is_none() {
        return Err("DB_NOT_FOUND: user not found".to_string());
    }

    let now = now_unix_seconds();

    if let Some(password) = password {
        validate_password(password)?;
        let salt = new_salt();
        let hash = hash_password(&salt, password);
        conn.execute(
            "UPDATE users SET password_hash = ?1, password_salt = ?2, updated_at = ?3 WHERE id = ?4",
            params![hash, salt, now, user_id],
        )
        .map_err(|e| format!("DB_ERROR: failed to update password: {e}"))?;
    }

    if let Some(role) = role {
        validate_role(role)?;
        conn.execute(
            "UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3",
            params![role, now, user_id],
        )
        .map_err(|e| format!("DB_ERROR: failed to update role: {e}"))?;
    }

    if let Some(disabled) = disabled {
        conn.execute(
            "UPDATE users SET disabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![if disabled { 1i64 } else { 0i64 }, now, user_id],
        )
        .map_err(|e| format!("DB_ERROR: failed to update disabled flag: {e}"))?;
    }

    drop(conn);
    get_summary(db, user_id)
}

pub(crate) fn delete(db: &Db, user_id: i64) -> Result<(), String> {
    let conn = db.open_connection()?;
    let changed = conn
        .execute("DELETE FROM users WHERE id = ?1", params![user_id])
        .map_err(|e| format!("DB_ERROR: failed to delete user: {e}"))?;

    if changed == 0 {
        return Err("DB_NOT_FOUND: user not found".to_string());
    }
    Ok(())
}

/// Self-service password change: re-hashes with a fresh salt and clears the
/// must_change_password gate.
pub(crate) fn set_own_password(db: &Db, user_id: i64, password: &str) -> Result<(), String> {
    validate_password(password)?;
    let salt = new_salt();
    let hash = hash_password(&salt, password);

    let conn = db.open_connection()?;
    let now = now_unix_seconds();
    let changed = conn
        .execute(
            r#"
UPDATE users
SET password_hash = ?1, password_salt = ?2, must_change_password = 0, updated_at = ?3
WHERE id = ?4
"#,
            params![hash, salt, now, user_id],
        )
        .map_err(|e| format!("DB_ERROR: failed to update password: {e}"))?;

    if changed == 0 {
        return Err("DB_NOT_FOUND: user not found".to_string());
    }
    Ok(())
}

pub(crate) fn set_own_email(db: &Db, user_id: i64, email: &str) -> Result<(), String> {
    let email = email.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err("SEC_INVALID_INPUT: email is required".to_string());
    }

    let conn = db.open_connection()?;
    let now = now_unix_seconds();
    let changed = conn
        .execute(
            "UPDATE users SET email = ?1, updated_at = ?2 WHERE id = ?3",
            params![email, now, user_id],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                format!("DB_CONSTRAINT: email already exists: {email}")
            }
            other => format!("DB_ERROR: failed to update email: {other}"),
        })?;

    if changed == 0 {
        return Err("DB_NOT_FOUND: user not found".to_string());
    }
    Ok(())
}

/// Seeds the first admin account when the user table is empty. The seeded
/// admin must change their password before using administrative endpoints.
pub(crate) fn seed_admin(db: &Db, email: &str, password: &str) -> Result<bool, String> {
    let conn = db.open_connection()?;
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .map_err(|e| format!("DB_ERROR: failed to count users: {e}"))?;
    drop(conn);

    if count > 0 {
        return Ok(false);
    }

    // The seeded credential skips the length check: it must be changed before
    // the account can use administrative endpoints anyway.
    insert(db, email, password, ROLE_ADMIN, true)?;
    Ok(true)
}
