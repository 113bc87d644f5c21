//! Usage: Usage log persistence (sqlite buffered writer + aggregate queries).

use crate::db::Db;
use crate::shared::time::now_unix_seconds;
use rusqlite::{params, ErrorCode};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

const WRITE_BUFFER_CAPACITY: usize = 512;
const WRITE_BATCH_MAX: usize = 50;
const INSERT_RETRY_MAX_ATTEMPTS: u32 = 8;
const INSERT_RETRY_BASE_DELAY_MS: u64 = 20;
const INSERT_RETRY_MAX_DELAY_MS: u64 = 500;

/// One row per completed upstream attempt. Append-only; the gateway never
/// updates or deletes usage rows.
#[derive(Debug, Clone)]
pub(crate) struct UsageLogInsert {
    pub user_id: i64,
    pub api_key_id: Option<i64>,
    pub provider_id: i64,
    // Client-supplied qualified identifier, not the raw upstream name.
    pub model: String,
    // 0 means the upstream was never reached (transport failure).
    pub status: u16,
    pub latency_ms: i64,
    pub tokens_in: i64,
    pub tokens_out: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbWriteErrorKind {
    Busy,
    Other,
}

#[derive(Debug)]
struct DbWriteError {
    kind: DbWriteErrorKind,
    message: String,
}

impl DbWriteError {
    fn other(message: String) -> Self {
        Self {
            kind: DbWriteErrorKind::Other,
            message,
        }
    }

    fn from_rusqlite(context: &'static str, err: rusqlite::Error) -> Self {
        let kind = classify_rusqlite_error(&err);
        Self {
            kind,
            message: format!("DB_ERROR: {context}: {err}"),
        }
    }

    fn is_retryable(&self) -> bool {
        self.kind == DbWriteErrorKind::Busy
    }
}

fn classify_rusqlite_error(err: &rusqlite::Error) -> DbWriteErrorKind {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => DbWriteErrorKind::Busy,
            _ => DbWriteErrorKind::Other,
        },
        _ => DbWriteErrorKind::Other,
    }
}

fn retry_delay(attempt_index: u32) -> Duration {
    let exp = attempt_index.min(20);
    let raw = INSERT_RETRY_BASE_DELAY_MS.saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX));
    Duration::from_millis(raw.min(INSERT_RETRY_MAX_DELAY_MS))
}

pub(crate) fn start_buffered_writer(
    db: Db,
) -> (mpsc::Sender<UsageLogInsert>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<UsageLogInsert>(WRITE_BUFFER_CAPACITY);
    let task = tokio::task::spawn_blocking(move || {
        writer_loop(db, rx);
    });
    (tx, task)
}

/// Fire-and-forget enqueue: never blocks and never fails the caller. When the
/// channel is saturated the row is written through on a blocking thread.
pub(crate) fn enqueue(tx: &mpsc::Sender<UsageLogInsert>, db: &Db, item: UsageLogInsert) {
    let item = match tx.try_send(item) {
        Ok(()) => return,
        Err(mpsc::error::TrySendError::Full(item))
        | Err(mpsc::error::TrySendError::Closed(item)) => item,
    };

    let db = db.clone();
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(move || {
                if let Err(err) = insert_batch_with_retries(&db, &[item]) {
                    tracing::error!(error = %err.message, "usage log write-through failed");
                }
            });
        }
        Err(_) => {
            if let Err(err) = insert_batch_with_retries(&db, &[item]) {
                tracing::error!(error = %err.message, "usage log write-through failed");
            }
        }
    }
}

fn writer_loop(db: Db, mut rx: mpsc::Receiver<UsageLogInsert>) {
    let mut buffer: Vec<UsageLogInsert> = Vec::with_capacity(WRITE_BATCH_MAX);

    while let Some(item) = rx.blocking_recv() {
        buffer.push(item);

        while buffer.len() < WRITE_BATCH_MAX {
            match rx.try_recv() {
                Ok(next) => buffer.push(next),
                Err(mpsc::error::TryRecvError::Empty)
                | Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }

        if let Err(err) = insert_batch_with_retries(&db, &buffer) {
            tracing::error!(error = %err.message, "usage log batch insert failed");
        }
        buffer.clear();
    }

    if !buffer.is_empty() {
        if let Err(err) = insert_batch_with_retries(&db, &buffer) {
            tracing::error!(error = %err.message, "usage log final batch insert failed");
        }
    }
}

fn insert_batch_with_retries(db: &Db, items: &[UsageLogInsert]) -> Result<(), DbWriteError> {
    let mut attempt: u32 = 0;
    loop {
        match insert_batch_once(db, items) {
            Ok(()) => return Ok(()),
            Err(err) => {
                attempt = attempt.saturating_add(1);
                if !err.is_retryable() || attempt >= INSERT_RETRY_MAX_ATTEMPTS {
                    return Err(err);
                }
                std::thread::sleep(retry_delay(attempt.saturating_sub(1)));
            }
        }
    }
}

fn insert_batch_once(db: &Db, items: &[UsageLogInsert]) -> Result<(), DbWriteError> {
    if items.is_empty() {
        return Ok(());
    }

    let created_at = now_unix_seconds();
    let mut conn = db.open_connection().map_err(DbWriteError::other)?;
    let tx = conn
        .transaction()
        .map_err(|e| DbWriteError::from_rusqlite("failed to start transaction", e))?;

    {
        let mut stmt = tx
            .prepare(
                r#"
INSERT INTO usage_logs (
  user_id,
  api_key_id,
  provider_id,
  model,
  status,
  latency_ms,
  tokens_in,
  tokens_out,
  created_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
"#,
            )
            .map_err(|e| DbWriteError::from_rusqlite("failed to prepare insert", e))?;

        for item in items {
            stmt.execute(params![
                item.user_id,
                item.api_key_id,
                item.provider_id,
                item.model,
                item.status as i64,
                item.latency_ms,
                item.tokens_in,
                item.tokens_out,
                created_at
            ])
            .map_err(|e| DbWriteError::from_rusqlite("failed to insert usage_log", e))?;
        }
    }

    tx.commit()
        .map_err(|e| DbWriteError::from_rusqlite("failed to commit transaction", e))?;

    Ok(())
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub(crate) struct UsageSummary {
    pub requests: i64,
    pub avg_ms: i64,
    pub tokens_in: i64,
    pub tokens_out: i64,
}

pub(crate) fn summary_for_user(db: &Db, user_id: i64) -> Result<UsageSummary, String> {
    let conn = db.open_connection()?;
    conn.query_row(
        r#"
SELECT
  COUNT(1),
  COALESCE(SUM(latency_ms), 0),
  COALESCE(SUM(tokens_in), 0),
  COALESCE(SUM(tokens_out), 0)
FROM usage_logs
WHERE user_id = ?1
"#,
        params![user_id],
        |row| {
            let requests: i64 = row.get(0)?;
            let total_ms: i64 = row.get(1)?;
            let tokens_in: i64 = row.get(2)?;
            let tokens_out: i64 = row.get(3)?;
            Ok(UsageSummary {
                requests,
                avg_ms: if requests > 0 { total_ms / requests } else { 0 },
                tokens_in,
                tokens_out,
            })
        },
    )
    .map_err(|e| format!("DB_ERROR: failed to aggregate usage: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(user_id: i64, provider_id: i64, status: u16) -> UsageLogInsert {
        UsageLogInsert {
            user_id,
            api_key_id: None,
            provider_id,
            model: "acme/gpt-x".to_string(),
            status,
            latency_ms: 120,
            tokens_in: 10,
            tokens_out: 20,
        }
    }

    #[test]
    fn retry_delay_is_bounded() {
        assert_eq!(retry_delay(0), Duration::from_millis(20));
        assert_eq!(retry_delay(1), Duration::from_millis(40));
        assert_eq!(retry_delay(10), Duration::from_millis(500));
        assert_eq!(retry_delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn insert_and_aggregate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = crate::db::init_for_tests(dir.path());

        insert_batch_with_retries(&db, &[sample(1, 7, 200), sample(1, 8, 500), sample(2, 7, 200)])
            .expect("insert batch");

        let summary = summary_for_user(&db, 1).expect("summary");
        assert_eq!(summary.requests, 2);
        assert_eq!(summary.avg_ms, 120);
        assert_eq!(summary.tokens_in, 20);
        assert_eq!(summary.tokens_out, 40);

        let empty = summary_for_user(&db, 99).expect("summary empty");
        assert_eq!(empty.requests, 0);
        assert_eq!(empty.avg_ms, 0);
    }

    #[tokio::test]
    async fn buffered_writer_drains_channel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = crate::db::init_for_tests(dir.path());

        let (tx, task) = start_buffered_writer(db.clone());
        for _ in 0..5 {
            tx.send(sample(3, 1, 200)).await.expect("send");
        }
        drop(tx);
        task.await.expect("writer task");

        let summary = summary_for_user(&db, 3).expect("summary");
        assert_eq!(summary.requests, 5);
    }
}
