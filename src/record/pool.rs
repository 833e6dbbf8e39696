//! Record pool and asynchronous publication.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use super::sink::Sink;
use super::Record;
use crate::observability::metrics;

/// Free-list of records plus the sink they drain to.
pub struct RecordPool {
    free: Mutex<Vec<Box<Record>>>,
    capacity: usize,
    sink: Arc<dyn Sink>,
}

impl RecordPool {
    /// `capacity` bounds the number of idle records kept.
    pub fn new(capacity: usize, sink: Arc<dyn Sink>) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(capacity.min(1024))),
            capacity,
            sink,
        })
    }

    /// Take a clean record. The guard publishes it on `publish` or drop.
    pub fn get(self: &Arc<Self>) -> PooledRecord {
        let record = self
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.pop())
            .unwrap_or_default();
        PooledRecord {
            record: Some(record),
            pool: Arc::clone(self),
        }
    }

    /// Publish on the blocking pool, then clean and return the record.
    ///
    /// Outside a runtime the work runs inline.
    pub fn recycle(self: &Arc<Self>, record: Box<Record>) {
        let pool = Arc::clone(self);
        let job = move || pool.publish_and_return(record);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => job(),
        }
    }

    fn publish_and_return(&self, mut record: Box<Record>) {
        record.derive();
        let result = self.sink.publish(&record);
        metrics::record_published(self.sink.name(), result.is_ok());
        if let Err(e) = result {
            tracing::warn!(sink = self.sink.name(), trace_id = %record.trace_id, error = %e, "Record publish failed");
        }

        record.cleanup();
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.capacity {
                free.push(record);
            }
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }
}

/// A record owned by one request handler.
///
/// Exactly one publication happens per guard: explicitly through
/// [`PooledRecord::publish`] or implicitly on drop.
pub struct PooledRecord {
    record: Option<Box<Record>>,
    pool: Arc<RecordPool>,
}

impl PooledRecord {
    /// Stamp `serve_time` and hand the record to the publisher.
    pub fn publish(mut self) {
        if let Some(mut record) = self.record.take() {
            record.mark_served();
            self.pool.recycle(record);
        }
    }

    /// Publish before the exchange is over (protocol upgrade).
    pub fn publish_early(mut self) {
        if let Some(record) = self.record.as_mut() {
            record.early = true;
        }
        self.publish();
    }
}

impl Deref for PooledRecord {
    type Target = Record;

    fn deref(&self) -> &Record {
        // `record` is only taken by methods that consume the guard.
        self.record
            .as_deref()
            .unwrap_or_else(|| unreachable!("record taken from a live guard"))
    }
}

impl DerefMut for PooledRecord {
    fn deref_mut(&mut self) -> &mut Record {
        self.record
            .as_deref_mut()
            .unwrap_or_else(|| unreachable!("record taken from a live guard"))
    }
}

impl Drop for PooledRecord {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            if record.status_code == 0 {
                record.status_code = 502;
            }
            if record.resp_body.is_empty() {
                record.resp_body.push_str("context canceled");
            }
            record.mark_served();
            tracing::debug!(trace_id = %record.trace_id, "Publishing abandoned record");
            self.pool.recycle(record);
        }
    }
}
