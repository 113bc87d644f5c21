//! Usage: SQLite connection setup, schema migrations, and common DB helpers.

mod migrations;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Clone)]
pub(crate) struct Db {
    pool: Pool<SqliteConnectionManager>,
}

impl Db {
    pub(crate) fn open_connection(
        &self,
    ) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, String> {
        self.pool
            .get()
            .map_err(|e| format!("DB_ERROR: failed to get connection from pool: {e}"))
    }
}

pub(crate) fn sql_placeholders(count: usize) -> String {
    if count == 0 {
        return String::new();
    }

    let mut out = String::with_capacity(count.saturating_mul(2).saturating_sub(1));
    for idx in 0..count {
        if idx > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

pub(crate) fn init(path: &Path) -> Result<Db, String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create db directory {}: {e}", parent.display()))?;
    }

    let path_hint = path.display().to_string();
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        configure_connection(conn)
    });

    let pool = Pool::new(manager).map_err(|e| format!("failed to create db pool: {e}"))?;
    let mut conn = pool
        .get()
        .map_err(|e| format!("failed to get startup connection: {e}"))?;

    migrations::apply_migrations(&mut conn)
        .map_err(|e| format!("sqlite migration failed at {path_hint}: {e}"))?;

    Ok(Db { pool })
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
"#,
    )?;

    Ok(())
}

#[cfg(test)]
pub(crate) fn init_for_tests(dir: &Path) -> Db {
    init(&dir.join("modelgate-test.db")).expect("test db init")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_placeholders_formats() {
        assert_eq!(sql_placeholders(0), "");
        assert_eq!(sql_placeholders(1), "?");
        assert_eq!(sql_placeholders(3), "?,?,?");
    }

    #[test]
    fn init_creates_schema_and_is_reentrant() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("gate.db");

        let db = init(&path).expect("first init");
        {
            let conn = db.open_connection().expect("conn");
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'providers'",
                    [],
                    |row| row.get(0),
                )
                .expect("query sqlite_master");
            assert_eq!(count, 1);
        }

        // Re-running init against an up-to-date database is a no-op.
        init(&path).expect("second init");
    }
}
