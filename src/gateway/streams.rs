//! Usage: Streaming relay that records usage exactly once when the stream ends.

use crate::db::Db;
use crate::usage_logs::{self, UsageLogInsert};
use axum::body::Bytes;
use futures_core::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::mpsc;

pub(crate) type UpstreamBytesStream =
    Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

pub(crate) struct StreamUsageCtx {
    pub usage_tx: mpsc::Sender<UsageLogInsert>,
    pub db: Db,
    // Prototype row; latency_ms is stamped at finalize time so it spans the
    // whole streaming duration.
    pub record: UsageLogInsert,
    pub started: Instant,
}

/// Relays upstream chunks to the client untouched. Finalizes exactly once on
/// normal end, on a stream error, or when the client goes away and the body
/// is dropped; whatever was already sent to the client stands.
pub(crate) struct UsageTeeStream {
    upstream: UpstreamBytesStream,
    ctx: StreamUsageCtx,
    finalized: bool,
}

impl UsageTeeStream {
    pub(crate) fn new(upstream: UpstreamBytesStream, ctx: StreamUsageCtx) -> Self {
        Self {
            upstream,
            ctx,
            finalized: false,
        }
    }

    fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        let mut record = self.ctx.record.clone();
        record.latency_ms = self.ctx.started.elapsed().as_millis().min(i64::MAX as u128) as i64;
        usage_logs::enqueue(&self.ctx.usage_tx, &self.ctx.db, record);
    }
}

impl Stream for UsageTeeStream {
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.as_mut().get_mut();
        match this.upstream.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.finalize();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(err))) => {
                // A transport error mid-copy is terminal; no retry, no restart.
                this.finalize();
                Poll::Ready(Some(Err(err)))
            }
        }
    }
}

impl Drop for UsageTeeStream {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ChunkStream {
        chunks: Vec<Bytes>,
    }

    impl Stream for ChunkStream {
        type Item = Result<Bytes, reqwest::Error>;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            match self.chunks.is_empty() {
                true => Poll::Ready(None),
                false => Poll::Ready(Some(Ok(self.chunks.remove(0)))),
            }
        }
    }

    fn ctx_with_channel(
        db: Db,
    ) -> (StreamUsageCtx, mpsc::Receiver<UsageLogInsert>) {
        let (tx, rx) = mpsc::channel(8);
        let ctx = StreamUsageCtx {
            usage_tx: tx,
            db,
            record: UsageLogInsert {
                user_id: 1,
                api_key_id: None,
                provider_id: 7,
                model: "router/primary".to_string(),
                status: 200,
                latency_ms: 0,
                tokens_in: 0,
                tokens_out: 0,
            },
            started: Instant::now(),
        };
        (ctx, rx)
    }

    #[tokio::test]
    async fn finalizes_once_on_stream_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = crate::db::init_for_tests(dir.path());
        let (ctx, mut rx) = ctx_with_channel(db);

        let upstream = Box::pin(ChunkStream {
            chunks: vec![Bytes::from_static(b"data: a\n\n"), Bytes::from_static(b"data: b\n\n")],
        });
        let mut tee = UsageTeeStream::new(upstream, ctx);

        let mut seen = Vec::new();
        loop {
            let next =
                std::future::poll_fn(|cx| Pin::new(&mut tee).poll_next(cx)).await;
            match next {
                Some(Ok(chunk)) => seen.push(chunk),
                Some(Err(_)) => panic!("unexpected stream error"),
                None => break,
            }
        }
        drop(tee);

        assert_eq!(seen.len(), 2);
        let record = rx.try_recv().expect("one usage record");
        assert_eq!(record.status, 200);
        assert_eq!(record.tokens_in, 0);
        assert_eq!(record.tokens_out, 0);
        assert!(rx.try_recv().is_err(), "finalize must run exactly once");
    }

    #[tokio::test]
    async fn finalizes_on_drop_when_client_disconnects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = crate::db::init_for_tests(dir.path());
        let (ctx, mut rx) = ctx_with_channel(db);

        let upstream = Box::pin(ChunkStream {
            chunks: vec![Bytes::from_static(b"data: a\n\n")],
        });
        let tee = UsageTeeStream::new(upstream, ctx);
        drop(tee);

        let record = rx.try_recv().expect("usage record on drop");
        assert_eq!(record.provider_id, 7);
    }
}
