//! Bounded body capture for audit records.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method};

use crate::buffer::BufferPool;

/// Stored instead of a response body larger than the capture buffer.
pub const RESPONSE_TOO_LARGE: &str = "response body too large";

/// Stored instead of a request body larger than the capture buffer.
pub const REQUEST_TOO_LARGE: &str = "request body too large";

/// Request bodies above this declared size are never read for capture.
pub const MAX_REQUEST_CAPTURE: u64 = 1024 * 1024;

/// Capture only non-GET JSON/XML bodies with a declared length ≤ 1 MiB.
pub fn should_capture_request(method: &Method, headers: &HeaderMap) -> bool {
    if method == Method::GET {
        return false;
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !(content_type.starts_with("application/json") || content_type.starts_with("application/xml")) {
        return false;
    }

    declared_length(headers).is_some_and(|len| len <= MAX_REQUEST_CAPTURE)
}

pub fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Read a request body fully, returning the bytes for capture and a fresh
/// body carrying the same bytes for the outbound request.
pub async fn read_request_body(body: Body) -> Result<(Bytes, Body), axum::Error> {
    let bytes = axum::body::to_bytes(body, MAX_REQUEST_CAPTURE as usize).await?;
    Ok((bytes.clone(), Body::from(bytes)))
}

/// Text stored for a captured request body.
pub fn request_capture_text(bytes: &[u8], limit: usize) -> String {
    if bytes.len() > limit {
        REQUEST_TOO_LARGE.to_string()
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Keeps the first `limit` bytes of a stream, or nothing once it overflows.
///
/// The result is all-or-sentinel: a partially captured body is never
/// reported.
#[derive(Debug)]
pub struct BodyCapture {
    buf: Vec<u8>,
    limit: usize,
    overflow: bool,
}

impl BodyCapture {
    /// Borrow a buffer from `pool`; its default capacity is the limit.
    pub fn new(pool: &BufferPool) -> Self {
        Self {
            buf: pool.get(),
            limit: pool.default_capacity(),
            overflow: false,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        if self.overflow {
            return;
        }
        if self.buf.len() + chunk.len() > self.limit {
            self.overflow = true;
            self.buf.clear();
            return;
        }
        self.buf.extend_from_slice(chunk);
    }

    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    /// Write the captured text (or sentinel) into `out` and return the
    /// buffer to the pool.
    pub fn finish(self, pool: &BufferPool, out: &mut String) {
        out.clear();
        if self.overflow {
            out.push_str(RESPONSE_TOO_LARGE);
        } else {
            out.push_str(&String::from_utf8_lossy(&self.buf));
        }
        pool.put(self.buf);
    }
}
