use std::sync::Mutex;

use super::{Sink, SinkError};
use crate::record::Record;

/// Keeps published records as JSON values. Used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<serde_json::Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn publish(&self, record: &Record) -> Result<(), SinkError> {
        let value = serde_json::to_value(record)?;
        if let Ok(mut records) = self.records.lock() {
            records.push(value);
        }
        Ok(())
    }
}
