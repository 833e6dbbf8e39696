//! Record sinks.
//!
//! Every sink takes a finished record and ships it somewhere. Sinks run on
//! the blocking pool, one call per record; those that hold a single writer
//! serialize access internally.

pub mod file;
pub mod memory;
pub mod stdout;
pub mod syslog;

use std::path::PathBuf;
use std::sync::Arc;

pub use file::FileSink;
pub use memory::MemorySink;
pub use stdout::StdoutSink;
pub use syslog::SyslogSink;

use super::Record;
use crate::config::schema::{RecordConfig, SinkKind};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("syslog: {0}")]
    Syslog(String),

    #[error("invalid syslog URL {0:?}")]
    Url(String),
}

/// Destination for published records.
pub trait Sink: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    fn publish(&self, record: &Record) -> Result<(), SinkError>;
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn name(&self) -> &'static str {
        "none"
    }

    fn publish(&self, _record: &Record) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Build the configured sink.
pub fn build_sink(config: &RecordConfig, app_name: &str) -> Result<Arc<dyn Sink>, SinkError> {
    let sink: Arc<dyn Sink> = match config.sink {
        SinkKind::Stdout => Arc::new(StdoutSink),
        SinkKind::File => Arc::new(FileSink::new(PathBuf::from(&config.file_path))),
        SinkKind::Syslog => Arc::new(SyslogSink::connect(
            &config.syslog_url,
            &syslog::tag(app_name, &config.namespace),
            config.mirror_stdout,
        )?),
        SinkKind::None => Arc::new(NullSink),
    };
    tracing::info!(sink = sink.name(), "Record sink ready");
    Ok(sink)
}
