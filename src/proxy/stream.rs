//! Streaming copy from the upstream body to the client.
//!
//! One task pulls upstream frames, feeds the capture buffer, and pushes
//! frames into a bounded channel that backs the client response body.
//! The upstream body is read exactly once; capture and client share
//! every chunk.

use std::io;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderMap};
use futures_util::FutureExt;
use http_body_util::BodyExt;
use hyper::body::{Body as HttpBody, Frame, Incoming};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::buffer::BufferPool;
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::record::capture::BodyCapture;
use crate::record::PooledRecord;

/// Frames in flight between the copy task and the client connection.
const CHANNEL_DEPTH: usize = 4;

type FrameResult = Result<Frame<Bytes>, io::Error>;

/// Response body fed by the copy task.
pub struct ChannelBody {
    rx: mpsc::Receiver<FrameResult>,
}

impl ChannelBody {
    pub fn channel() -> (mpsc::Sender<FrameResult>, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        (tx, Self { rx })
    }
}

impl HttpBody for ChannelBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FrameResult>> {
        self.rx.poll_recv(cx)
    }
}

/// When buffered bytes are handed to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Only when the copy buffer is full, or at the end.
    Buffered,
    /// At most this long after the first buffered byte.
    Interval(Duration),
    /// After every upstream chunk.
    Immediate,
}

impl FlushPolicy {
    /// `0` buffered, `>0` max latency in milliseconds, `<0` immediate.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            0 => FlushPolicy::Buffered,
            ms if ms > 0 => FlushPolicy::Interval(Duration::from_millis(ms.unsigned_abs())),
            _ => FlushPolicy::Immediate,
        }
    }

    /// Event streams and bodies of unknown length are never held back.
    pub fn for_response(self, headers: &HeaderMap) -> Self {
        let event_stream = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("text/event-stream"));
        if event_stream || !headers.contains_key(header::CONTENT_LENGTH) {
            FlushPolicy::Immediate
        } else {
            self
        }
    }
}

/// Everything the copy task owns.
pub struct CopyJob {
    pub upstream: Incoming,
    pub tx: mpsc::Sender<FrameResult>,
    pub flush: FlushPolicy,
    pub pool: Arc<BufferPool>,
    pub record: PooledRecord,
}

impl CopyJob {
    /// Copy to completion, then finish the capture and publish the record.
    pub async fn run(self) {
        let CopyJob {
            mut upstream,
            tx,
            flush,
            pool,
            mut record,
        } = self;

        let mut capture = BodyCapture::new(&pool);
        let pumped = AssertUnwindSafe(pump(
            &mut upstream,
            &tx,
            flush,
            &pool,
            &mut capture,
            &mut record,
        ))
        .catch_unwind()
        .await;

        match pumped {
            Ok(Ok(())) => {}
            Ok(Err(GatewayError::Canceled)) => {
                tracing::debug!(trace_id = %record.trace_id, "Client went away during body copy");
            }
            Ok(Err(e)) => {
                tracing::warn!(trace_id = %record.trace_id, error = %e, "Upstream body read failed");
            }
            Err(_) => {
                tracing::error!(trace_id = %record.trace_id, "Body copy panicked, aborting response");
                let _ = tx
                    .send(Err(io::Error::other(GatewayError::CopyPanicked)))
                    .await;
            }
        }

        if capture.overflowed() {
            metrics::record_capture_overflow();
        }
        capture.finish(&pool, &mut record.resp_body);
        record.publish();
    }
}

async fn send(
    tx: &mpsc::Sender<FrameResult>,
    data: Bytes,
    record: &mut PooledRecord,
) -> Result<(), GatewayError> {
    let len = data.len() as u64;
    tx.send(Ok(Frame::data(data)))
        .await
        .map_err(|_| GatewayError::Canceled)?;
    record.resp_size += len;
    Ok(())
}

async fn drain(
    tx: &mpsc::Sender<FrameResult>,
    pending: &mut Vec<u8>,
    record: &mut PooledRecord,
) -> Result<(), GatewayError> {
    if pending.is_empty() {
        return Ok(());
    }
    let data = Bytes::copy_from_slice(pending);
    pending.clear();
    send(tx, data, record).await
}

async fn pump(
    upstream: &mut Incoming,
    tx: &mpsc::Sender<FrameResult>,
    flush: FlushPolicy,
    pool: &BufferPool,
    capture: &mut BodyCapture,
    record: &mut PooledRecord,
) -> Result<(), GatewayError> {
    let mut pending = pool.get();
    let limit = pool.default_capacity();
    let mut deadline: Option<Instant> = None;

    let result = loop {
        let next = match (flush, deadline) {
            (FlushPolicy::Interval(_), Some(at)) => tokio::select! {
                frame = upstream.frame() => Some(frame),
                _ = tokio::time::sleep_until(at) => None,
            },
            _ => Some(upstream.frame().await),
        };

        let frame = match next {
            // latency timer fired
            None => {
                deadline = None;
                if let Err(e) = drain(tx, &mut pending, record).await {
                    break Err(e);
                }
                continue;
            }
            Some(None) => break drain(tx, &mut pending, record).await,
            Some(Some(Ok(frame))) => frame,
            Some(Some(Err(e))) => {
                let _ = drain(tx, &mut pending, record).await;
                let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
                break Err(GatewayError::Transport(e.to_string()));
            }
        };

        let frame = match frame.into_data() {
            Ok(data) => {
                capture.feed(&data);
                let step = match flush {
                    FlushPolicy::Immediate => send(tx, data, record).await,
                    _ if pending.is_empty() && data.len() >= limit => send(tx, data, record).await,
                    _ => {
                        pending.extend_from_slice(&data);
                        if let (FlushPolicy::Interval(every), None) = (flush, deadline) {
                            deadline = Some(Instant::now() + every);
                        }
                        if pending.len() >= limit {
                            deadline = None;
                            drain(tx, &mut pending, record).await
                        } else {
                            Ok(())
                        }
                    }
                };
                if let Err(e) = step {
                    break Err(e);
                }
                continue;
            }
            Err(frame) => frame,
        };

        if let Ok(trailers) = frame.into_trailers() {
            if let Err(e) = drain(tx, &mut pending, record).await {
                break Err(e);
            }
            if tx.send(Ok(Frame::trailers(trailers))).await.is_err() {
                break Err(GatewayError::Canceled);
            }
        }
    };

    pool.put(pending);
    result
}
